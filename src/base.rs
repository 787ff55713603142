use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshType {
    Hourly,
    Daily
}

impl fmt::Display for RefreshType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RefreshType::Hourly => write!(f, "hourly"),
            RefreshType::Daily => write!(f, "daily"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown refresh type: {0}")]
pub struct UnknownRefreshType(pub String);

impl FromStr for RefreshType {
    type Err = UnknownRefreshType;

    fn from_str(input: &str) -> Result<RefreshType, Self::Err> {
        match input {
            "hourly" => Ok(RefreshType::Hourly),
            "daily" => Ok(RefreshType::Daily),
            _ => Err(UnknownRefreshType(input.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instrument {
    pub ticker: String,
    pub name: String,
}

impl Instrument {
    pub fn new(ticker: &str, name: &str) -> Self {
        Instrument { ticker: ticker.to_owned(), name: name.to_owned() }
    }
}

const DEFAULT_INSTRUMENTS: [(&str, &str); 5] = [
    ("GC=F", "Gold"),
    ("CL=F", "Crude_Oil"),
    ("SI=F", "Silver"),
    ("NG=F", "Natural_Gas"),
    ("ZC=F", "Corn"),
];

/// Ordered, immutable set of tracked instruments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrumentRegistry {
    instruments: Vec<Instrument>,
}

impl InstrumentRegistry {
    /// Returns `None` when a ticker appears twice
    pub fn new(instruments: Vec<Instrument>) -> Option<Self> {
        let mut seen = HashSet::new();
        for instrument in &instruments {
            if !seen.insert(instrument.ticker.as_str()) {
                return None;
            }
        }
        Some(InstrumentRegistry { instruments })
    }

    pub fn commodities() -> Self {
        InstrumentRegistry {
            instruments: DEFAULT_INSTRUMENTS.iter()
                .map(|(ticker, name)| Instrument::new(ticker, name))
                .collect()
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }

    pub fn get(&self, ticker: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.ticker == ticker)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.instruments.iter().map(|i| i.name.as_str()).collect()
    }
}

/// One recorded price sample
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub previous_close: Option<f64>,
    pub refresh_type: RefreshType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentSeries {
    pub instrument: Instrument,
    pub observations: Vec<Observation>,
}

/// Append-only price history for every tracked instrument, iterated in registry order
#[derive(Clone, Debug, PartialEq)]
pub struct PriceStore {
    series: Vec<InstrumentSeries>,
    index: HashMap<String, usize>,
}

impl PriceStore {
    pub fn new(registry: &InstrumentRegistry) -> Self {
        let series: Vec<InstrumentSeries> = registry.iter()
            .map(|instrument| InstrumentSeries { instrument: instrument.clone(), observations: Vec::new() })
            .collect();
        let index = series.iter().enumerate()
            .map(|(pos, s)| (s.instrument.ticker.clone(), pos))
            .collect();
        PriceStore { series, index }
    }

    pub fn has_ticker(&self, ticker: &str) -> bool {
        self.index.contains_key(ticker)
    }

    pub fn get_series(&self, ticker: &str) -> Option<&InstrumentSeries> {
        self.index.get(ticker).map(|&pos| &self.series[pos])
    }

    pub fn observations(&self, ticker: &str) -> &[Observation] {
        self.get_series(ticker)
            .map(|s| s.observations.as_slice())
            .unwrap_or(&[])
    }

    /// Returns false when the ticker is not tracked
    pub fn append(&mut self, ticker: &str, observation: Observation) -> bool {
        let pos = match self.index.get(ticker) {
            Some(&pos) => pos,
            None => return false,
        };
        let series = &mut self.series[pos];
        if let Some(last) = series.observations.last() {
            if last.timestamp > observation.timestamp {
                tracing::warn!(ticker, previous = %last.timestamp, current = %observation.timestamp,
                    "Timestamp went backwards");
            }
        }
        series.observations.push(observation);
        true
    }

    pub fn series(&self) -> impl Iterator<Item = &InstrumentSeries> {
        self.series.iter()
    }

    /// Total number of observations across all instruments
    pub fn len(&self) -> usize {
        self.series.iter().map(|s| s.observations.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
