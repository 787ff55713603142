use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::base::{InstrumentRegistry, Observation, PriceStore, RefreshType};
use super::{format_timestamp, parse_optional_price, parse_price, parse_timestamp, ArchiveError};

const ROOT: &str = "CommodityPriceData";
const GENERATED: &str = "Generated";
const COMMODITY: &str = "Commodity";
const PRICE_DATA: &str = "PriceData";
const CURRENT_PRICE: &str = "CurrentPrice";
const PREVIOUS_CLOSE: &str = "PreviousClose";

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: Option<f64>,
) -> Result<(), ArchiveError> {
    match value {
        Some(v) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            writer.write_event(Event::Text(BytesText::new(&v.to_string())))?;
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        None => writer.write_event(Event::Empty(BytesStart::new(name)))?,
    }
    Ok(())
}

pub fn encode(store: &PriceStore, generated_at: DateTime<Utc>) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new(ROOT)))?;

    let generated_ts = format_timestamp(&generated_at);
    let mut generated = BytesStart::new(GENERATED);
    generated.push_attribute(("timestamp", generated_ts.as_str()));
    writer.write_event(Event::Empty(generated))?;

    for series in store.series() {
        let mut commodity = BytesStart::new(COMMODITY);
        commodity.push_attribute(("ticker", series.instrument.ticker.as_str()));
        commodity.push_attribute(("name", series.instrument.name.as_str()));
        if series.observations.is_empty() {
            writer.write_event(Event::Empty(commodity))?;
            continue;
        }
        writer.write_event(Event::Start(commodity))?;

        for observation in &series.observations {
            let timestamp = format_timestamp(&observation.timestamp);
            let refresh_type = observation.refresh_type.to_string();
            let mut price_data = BytesStart::new(PRICE_DATA);
            price_data.push_attribute(("timestamp", timestamp.as_str()));
            price_data.push_attribute(("refresh_type", refresh_type.as_str()));
            writer.write_event(Event::Start(price_data))?;
            write_text_element(&mut writer, CURRENT_PRICE, Some(observation.price))?;
            write_text_element(&mut writer, PREVIOUS_CLOSE, observation.previous_close)?;
            writer.write_event(Event::End(BytesEnd::new(PRICE_DATA)))?;
        }

        writer.write_event(Event::End(BytesEnd::new(COMMODITY)))?;
    }

    writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn required_attribute(element: &BytesStart, name: &str) -> Result<String, ArchiveError> {
    let attribute = element.try_get_attribute(name)?
        .ok_or_else(|| ArchiveError::Malformed(format!("missing attribute {}", name)))?;
    Ok(attribute.unescape_value()?.into_owned())
}

#[derive(Clone, Copy)]
enum PriceField {
    Current,
    Previous,
}

struct PendingObservation {
    timestamp: DateTime<Utc>,
    refresh_type: RefreshType,
    price: Option<f64>,
    previous_close: Option<f64>,
}

impl PendingObservation {
    fn from_element(element: &BytesStart) -> Result<Self, ArchiveError> {
        Ok(PendingObservation {
            timestamp: parse_timestamp(&required_attribute(element, "timestamp")?)?,
            refresh_type: required_attribute(element, "refresh_type")?.parse()?,
            price: None,
            previous_close: None,
        })
    }

    fn into_observation(self) -> Result<Observation, ArchiveError> {
        let price = self.price
            .ok_or_else(|| ArchiveError::Malformed(format!("{} without {}", PRICE_DATA, CURRENT_PRICE)))?;
        Ok(Observation {
            timestamp: self.timestamp,
            price,
            previous_close: self.previous_close,
            refresh_type: self.refresh_type,
        })
    }
}

pub fn decode(text: &str, registry: &InstrumentRegistry) -> Result<PriceStore, ArchiveError> {
    let mut store = PriceStore::new(registry);
    if text.trim().is_empty() {
        return Ok(store);
    }

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut saw_root = false;
    let mut depth: usize = 0;
    let mut ticker: Option<String> = None;
    let mut pending: Option<PendingObservation> = None;
    let mut field: Option<PriceField> = None;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                depth += 1;
                match element.name().as_ref() {
                    b"CommodityPriceData" => saw_root = true,
                    b"Commodity" => ticker = Some(required_attribute(&element, "ticker")?),
                    b"PriceData" => pending = Some(PendingObservation::from_element(&element)?),
                    b"CurrentPrice" => field = Some(PriceField::Current),
                    b"PreviousClose" => field = Some(PriceField::Previous),
                    _ => {}
                }
            }
            Event::Empty(element) => match element.name().as_ref() {
                b"CommodityPriceData" => saw_root = true,
                b"PriceData" => {
                    return Err(ArchiveError::Malformed(format!("empty {} element", PRICE_DATA)));
                }
                _ => {}
            },
            Event::Text(content) => {
                if let (Some(field), Some(observation)) = (field, pending.as_mut()) {
                    let value = content.unescape()?;
                    match field {
                        PriceField::Current => observation.price = Some(parse_price(&value)?),
                        PriceField::Previous => observation.previous_close = parse_optional_price(&value)?,
                    }
                }
            }
            Event::End(element) => {
                depth = depth.saturating_sub(1);
                match element.name().as_ref() {
                    b"CurrentPrice" | b"PreviousClose" => field = None,
                    b"PriceData" => {
                        let observation = pending.take()
                            .ok_or_else(|| ArchiveError::Malformed(format!("unmatched {} end", PRICE_DATA)))?
                            .into_observation()?;
                        let ticker = ticker.as_deref()
                            .ok_or_else(|| ArchiveError::Malformed(format!("{} outside {}", PRICE_DATA, COMMODITY)))?;
                        if !store.append(ticker, observation) {
                            tracing::debug!(ticker, "Skipping observation for untracked ticker");
                        }
                    }
                    b"Commodity" => ticker = None,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(ArchiveError::Malformed(format!("missing {} root", ROOT)));
    }
    if depth != 0 {
        return Err(ArchiveError::Malformed("document is truncated".to_owned()));
    }
    Ok(store)
}
