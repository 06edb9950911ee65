use crate::aggregator::RateAggregator;
use crate::core::rates::{CurrencyCode, render_batch};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use tracing::info;

/// Fetches the requested days and renders them as pretty JSON.
pub async fn render(
    aggregator: &RateAggregator,
    days: i64,
    currencies: &BTreeSet<CurrencyCode>,
) -> Result<String> {
    info!(days, ?currencies, "Fetching exchange rates");

    let batch = aggregator
        .get_rates(days, currencies)
        .await
        .context("Invalid input")?;

    render_batch(&batch).context("Failed to render rates")
}

/// One-shot lookup printed to stdout.
pub async fn run(
    aggregator: &RateAggregator,
    days: i64,
    currencies: &BTreeSet<CurrencyCode>,
) -> Result<()> {
    let output = render(aggregator, days, currencies).await?;
    println!("{output}");
    Ok(())
}
