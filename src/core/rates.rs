//! Exchange rate domain types and the provider abstraction

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use thiserror::Error;

pub const MIN_DAYS: i64 = 1;
pub const MAX_DAYS: i64 = 10;

/// Client-facing marker for a day whose rates could not be fetched.
pub const FETCH_ERROR_MARKER: &str = "Error fetching data";

pub type CurrencyCode = String;

/// A calendar date in the `DD.MM.YYYY` form the bank API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        DateKey(date)
    }

    /// The date `offset` whole days before `today`.
    pub fn days_before(today: NaiveDate, offset: u64) -> Option<Self> {
        today.checked_sub_days(Days::new(offset)).map(DateKey)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl Display for DateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%d.%m.%Y"))
    }
}

/// One entry of the bank's `exchangeRate` list. Every field is optional on
/// the wire; the base currency row usually carries no rates at all.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRate {
    pub currency: Option<String>,
    #[serde(alias = "saleRate")]
    pub sale_rate: Option<f64>,
    #[serde(alias = "saleRateNB")]
    pub sale_rate_nb: Option<f64>,
    #[serde(alias = "purchaseRate")]
    pub purchase_rate: Option<f64>,
    #[serde(alias = "purchaseRateNB")]
    pub purchase_rate_nb: Option<f64>,
}

/// Parsed body of a single-day rate response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateDocument {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, alias = "exchangeRate")]
    pub exchange_rate: Vec<RawRate>,
}

impl RateDocument {
    /// False when the bank stamped the document with a date other than `date`.
    /// Documents without a date are taken at face value.
    pub fn is_for(&self, date: &DateKey) -> bool {
        self.date
            .as_deref()
            .is_none_or(|published| published == date.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateQuote {
    pub sale: Option<f64>,
    pub purchase: Option<f64>,
}

impl From<&RawRate> for RateQuote {
    /// Commercial rates win; national bank rates fill the gaps.
    fn from(raw: &RawRate) -> Self {
        RateQuote {
            sale: raw.sale_rate.or(raw.sale_rate_nb),
            purchase: raw.purchase_rate.or(raw.purchase_rate_nb),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DayOutcome {
    Rates(BTreeMap<CurrencyCode, RateQuote>),
    Failed { message: String },
}

/// Rates for one requested date. Serializes as `{"DD.MM.YYYY": {...}}`, with
/// failed days rendered as the fixed fetch error marker string.
#[derive(Debug, Clone, PartialEq)]
pub struct DayResult {
    pub date: DateKey,
    pub outcome: DayOutcome,
}

impl DayResult {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, DayOutcome::Failed { .. })
    }

    pub fn rates(&self) -> Option<&BTreeMap<CurrencyCode, RateQuote>> {
        match &self.outcome {
            DayOutcome::Rates(rates) => Some(rates),
            DayOutcome::Failed { .. } => None,
        }
    }
}

impl Serialize for DayResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let key = self.date.to_string();
        let mut map = serializer.serialize_map(Some(1))?;
        match &self.outcome {
            DayOutcome::Rates(rates) => map.serialize_entry(&key, rates)?,
            DayOutcome::Failed { .. } => map.serialize_entry(&key, FETCH_ERROR_MARKER)?,
        }
        map.end()
    }
}

/// Newest date first, one entry per requested day.
pub type BatchResult = Vec<DayResult>;

/// Renders a batch as indented JSON with non-ASCII characters left as is.
pub fn render_batch(batch: &[DayResult]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(batch)
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Error status: {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Network error: {source} for {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to parse rate response for {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("Number of days must be between {min} and {max}", min = MIN_DAYS, max = MAX_DAYS)]
    InvalidRange { days: i64 },
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Fetches the rate document published for `date`. One attempt, no retries.
    async fn fetch(&self, date: &DateKey) -> Result<RateDocument, FetchError>;
}
