use std::io;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

type JsonMap = serde_json::map::Map<String, Value>;

pub const DEFAULT_API_ADDRESS: &str = "https://query1.finance.yahoo.com";
const CHART_PATH: &str = "v8/finance/chart";
const USER_AGENT: &str = concat!("commodity_archiver/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] Box<ureq::Error>),
    #[error("quote API returned status {0}")]
    Status(u16),
    #[error("unable to read response body: {0}")]
    Io(#[from] io::Error),
    #[error("unable to parse response JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("quote API error: {0}")]
    Api(String),
    #[error("field unavailable: {0}")]
    FieldUnavailable(String),
    #[error("unexpected format for field: {0}")]
    FieldFormat(String),
}

impl MarketDataError {
    pub fn new_field_format_error(field: &str) -> Self {
        MarketDataError::FieldFormat(field.to_owned())
    }
}

/// Price fields read from the quote API. Missing or null fields are `None`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quote {
    pub price: Option<f64>,
    pub previous_close: Option<f64>,
}

fn get_field<'a>(map: &'a JsonMap, field: &str) -> Result<&'a Value, MarketDataError> {
    map.get(field).ok_or_else(|| MarketDataError::FieldUnavailable(field.to_owned()))
}

fn get_object<'a>(map: &'a JsonMap, field: &str) -> Result<&'a JsonMap, MarketDataError> {
    get_field(map, field)?.as_object()
        .ok_or_else(|| MarketDataError::new_field_format_error(field))
}

fn get_array<'a>(map: &'a JsonMap, field: &str) -> Result<&'a Vec<Value>, MarketDataError> {
    get_field(map, field)?.as_array()
        .ok_or_else(|| MarketDataError::new_field_format_error(field))
}

fn get_f64_or_none(map: &JsonMap, field: &str) -> Result<Option<f64>, MarketDataError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64()
            .map(Some)
            .ok_or_else(|| MarketDataError::new_field_format_error(field)),
    }
}

fn describe_api_error(error: &Value) -> String {
    match error.as_object() {
        Some(map) => {
            let code = map.get("code").and_then(Value::as_str).unwrap_or("unknown");
            let description = map.get("description").and_then(Value::as_str).unwrap_or("");
            format!("{}: {}", code, description)
        }
        None => error.to_string(),
    }
}

/// Parses a chart endpoint response into a quote.
///
/// The previous close prefers `previousClose` and falls back to `chartPreviousClose`.
pub fn parse_chart_response(body: &str) -> Result<Quote, MarketDataError> {
    let response = serde_json::from_str::<Value>(body)?;
    let response_map = response.as_object()
        .ok_or_else(|| MarketDataError::new_field_format_error("response"))?;
    let chart = get_object(response_map, "chart")?;

    if let Some(error) = chart.get("error") {
        if !error.is_null() {
            return Err(MarketDataError::Api(describe_api_error(error)));
        }
    }

    let result = get_array(chart, "result")?
        .first()
        .ok_or_else(|| MarketDataError::FieldUnavailable("result[0]".to_owned()))?
        .as_object()
        .ok_or_else(|| MarketDataError::new_field_format_error("result[0]"))?;
    let meta = get_object(result, "meta")?;

    let previous_close = match get_f64_or_none(meta, "previousClose")? {
        Some(close) => Some(close),
        None => get_f64_or_none(meta, "chartPreviousClose")?,
    };

    Ok(Quote {
        price: get_f64_or_none(meta, "regularMarketPrice")?,
        previous_close,
    })
}

pub fn new_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

pub fn fetch_api_quote(agent: &ureq::Agent, api_address: &str, ticker: &str) -> Result<Quote, MarketDataError> {
    let url = format!("{}/{}/{}", api_address.trim_end_matches('/'), CHART_PATH, ticker);
    let resp = agent.get(&url)
        .query("interval", "1d")
        .query("range", "1d")
        .call();

    match resp {
        Ok(resp) => {
            let data_string = resp.into_string()?;
            parse_chart_response(&data_string)
        }
        Err(ureq::Error::Status(code, resp)) => {
            // Unknown symbols come back as 404 with a chart.error body
            let body = resp.into_string().unwrap_or_default();
            match parse_chart_response(&body) {
                Err(MarketDataError::Api(message)) => Err(MarketDataError::Api(message)),
                _ => Err(MarketDataError::Status(code)),
            }
        }
        Err(err) => Err(MarketDataError::Http(Box::new(err))),
    }
}
