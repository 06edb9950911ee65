//! Multi-day rate retrieval with per-day failure isolation.

use chrono::{Local, NaiveDate};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::core::rates::{
    BatchResult, CurrencyCode, DateKey, DayOutcome, DayResult, MAX_DAYS, MIN_DAYS, RateDocument,
    RateError, RateProvider, RateQuote,
};

pub struct RateAggregator {
    provider: Arc<dyn RateProvider>,
}

impl RateAggregator {
    pub fn new(provider: Arc<dyn RateProvider>) -> Self {
        RateAggregator { provider }
    }

    /// Rates for the last `days` days counting back from today.
    pub async fn get_rates(
        &self,
        days: i64,
        currencies: &BTreeSet<CurrencyCode>,
    ) -> Result<BatchResult, RateError> {
        self.get_rates_on(Local::now().date_naive(), days, currencies)
            .await
    }

    /// Rates for `days` days counting back from `today`, newest first.
    ///
    /// Days are fetched concurrently. A failed fetch becomes an error entry for
    /// its own date and never shifts or drops the others.
    #[instrument(name = "GetRates", skip(self, currencies), fields(today = %today))]
    pub async fn get_rates_on(
        &self,
        today: NaiveDate,
        days: i64,
        currencies: &BTreeSet<CurrencyCode>,
    ) -> Result<BatchResult, RateError> {
        let dates = date_range(today, days)?;
        debug!(count = dates.len(), "Fetching rates");

        let day_futures = dates
            .into_iter()
            .map(|date| async move { self.fetch_day(date, currencies).await });

        // join_all yields results in input order, whatever order they finish in.
        Ok(join_all(day_futures).await)
    }

    async fn fetch_day(&self, date: DateKey, currencies: &BTreeSet<CurrencyCode>) -> DayResult {
        let outcome = match self.provider.fetch(&date).await {
            Ok(document) => {
                if !document.is_for(&date) {
                    warn!(
                        requested = %date,
                        published = document.date.as_deref().unwrap_or_default(),
                        "Bank returned rates for a different date"
                    );
                }
                DayOutcome::Rates(select_rates(&document, currencies))
            }
            Err(e) => {
                warn!(date = %date, error = %e, "Error fetching data");
                DayOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };
        DayResult { date, outcome }
    }
}

/// Dates from `today` back `days - 1` days, newest first.
pub fn date_range(today: NaiveDate, days: i64) -> Result<Vec<DateKey>, RateError> {
    if !(MIN_DAYS..=MAX_DAYS).contains(&days) {
        return Err(RateError::InvalidRange { days });
    }

    // Only fails when walking back past chrono's earliest representable date.
    (0..days as u64)
        .map(|offset| DateKey::days_before(today, offset))
        .collect::<Option<Vec<_>>>()
        .ok_or(RateError::InvalidRange { days })
}

/// Keeps the requested currencies from a day's document.
pub fn select_rates(
    document: &RateDocument,
    currencies: &BTreeSet<CurrencyCode>,
) -> BTreeMap<CurrencyCode, RateQuote> {
    document
        .exchange_rate
        .iter()
        .filter_map(|raw| {
            raw.currency
                .as_ref()
                .filter(|code| currencies.contains(*code))
                .map(|code| (code.clone(), RateQuote::from(raw)))
        })
        .collect()
}
