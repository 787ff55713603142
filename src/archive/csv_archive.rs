use serde::{Deserialize, Deserializer, Serialize};

use crate::base::{InstrumentRegistry, Observation, PriceStore, RefreshType};
use super::{format_timestamp, parse_optional_price, parse_timestamp, ArchiveError};

pub const CSV_HEADER: [&str; 6] = ["Ticker", "Commodity", "Timestamp", "RefreshType", "CurrentPrice", "PreviousClose"];

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "Ticker")]
    ticker: String,
    #[serde(rename = "Commodity")]
    commodity: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "RefreshType")]
    refresh_type: RefreshType,
    #[serde(rename = "CurrentPrice")]
    current_price: f64,
    #[serde(rename = "PreviousClose", deserialize_with = "deserialize_previous_close")]
    previous_close: Option<f64>,
}

fn deserialize_previous_close<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = String::deserialize(deserializer)?;
    parse_optional_price(&value).map_err(serde::de::Error::custom)
}

/// One row per observation, registry order then insertion order. The header is always written.
pub fn encode(store: &PriceStore) -> Result<Vec<u8>, ArchiveError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    csv_writer.write_record(CSV_HEADER)?;

    for series in store.series() {
        for observation in &series.observations {
            csv_writer.serialize(CsvRow {
                ticker: series.instrument.ticker.clone(),
                commodity: series.instrument.name.clone(),
                timestamp: format_timestamp(&observation.timestamp),
                refresh_type: observation.refresh_type,
                current_price: observation.price,
                previous_close: observation.previous_close,
            })?;
        }
    }

    csv_writer.into_inner().map_err(|err| ArchiveError::Io(err.into_error()))
}

pub fn decode(text: &str, registry: &InstrumentRegistry) -> Result<PriceStore, ArchiveError> {
    let mut store = PriceStore::new(registry);
    let mut csv_reader = csv::Reader::from_reader(text.as_bytes());

    for result in csv_reader.deserialize::<CsvRow>() {
        let row = result?;
        if !store.has_ticker(&row.ticker) {
            tracing::debug!(ticker = %row.ticker, "Skipping row for untracked ticker");
            continue;
        }
        let observation = Observation {
            timestamp: parse_timestamp(&row.timestamp)?,
            price: row.current_price,
            previous_close: row.previous_close,
            refresh_type: row.refresh_type,
        };
        store.append(&row.ticker, observation);
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Instrument;
    use chrono::{TimeZone, Utc};

    fn gold_registry() -> InstrumentRegistry {
        InstrumentRegistry::new(vec![Instrument::new("GC=F", "Gold")]).unwrap()
    }

    #[test]
    fn test_encode_single_observation() {
        let registry = gold_registry();
        let mut store = PriceStore::new(&registry);
        store.append("GC=F", Observation {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            price: 1950.5,
            previous_close: Some(1945.0),
            refresh_type: RefreshType::Hourly,
        });

        let text = String::from_utf8(encode(&store).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            "Ticker,Commodity,Timestamp,RefreshType,CurrentPrice,PreviousClose",
            "GC=F,Gold,2024-03-01T09:00:00Z,hourly,1950.5,1945.0",
        ]);
    }

    #[test]
    fn test_empty_store_writes_header_only() {
        let store = PriceStore::new(&gold_registry());
        let text = String::from_utf8(encode(&store).unwrap()).unwrap();
        assert_eq!(text.trim_end(), CSV_HEADER.join(","));
    }

    #[test]
    fn test_decode_skips_untracked_and_reads_missing_close() {
        let text = "Ticker,Commodity,Timestamp,RefreshType,CurrentPrice,PreviousClose\n\
            HG=F,Copper,2024-03-01T09:00:00Z,hourly,3.9,3.8\n\
            GC=F,Gold,2024-03-01T09:00:00Z,daily,1950.5,\n";
        let store = decode(text, &gold_registry()).unwrap();
        let gold = store.observations("GC=F");
        assert_eq!(gold.len(), 1);
        assert_eq!(gold[0].refresh_type, RefreshType::Daily);
        assert_eq!(gold[0].previous_close, None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_decode_offsetless_timestamps_and_none_close() {
        let text = "Ticker,Commodity,Timestamp,RefreshType,CurrentPrice,PreviousClose\r\n\
            GC=F,Gold,2024-03-01T09:00:00.123456,hourly,1950.5,1945.0\r\n\
            GC=F,Gold,2024-03-01T10:00:00.654321,daily,1951.25,None\r\n";
        let store = decode(text, &gold_registry()).unwrap();
        let gold = store.observations("GC=F");
        assert_eq!(gold.len(), 2);
        assert_eq!(gold[0].price, 1950.5);
        assert_eq!(gold[0].previous_close, Some(1945.0));
        assert_eq!(gold[0].timestamp, parse_timestamp("2024-03-01T09:00:00.123456").unwrap());
        assert_eq!(gold[1].refresh_type, RefreshType::Daily);
        assert_eq!(gold[1].previous_close, None);
    }

    #[test]
    fn test_decode_rejects_unknown_refresh_type() {
        let text = "Ticker,Commodity,Timestamp,RefreshType,CurrentPrice,PreviousClose\n\
            GC=F,Gold,2024-03-01T09:00:00Z,weekly,1950.5,1945\n";
        assert!(decode(text, &gold_registry()).is_err());
    }
}
