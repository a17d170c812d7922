//! # Transform helpers
//! Shared building blocks for the per-source transformers: period bucketing,
//! series construction from increments or cumulative snapshots, and
//! proportional rescaling onto an authoritative upstream total.

use std::collections::BTreeMap;

use crate::model::{PeriodKey, Timeseries, TimeseriesPoint};

/// Sum `(period, amount)` rows per period.
pub fn bucket<I>(rows: I) -> BTreeMap<PeriodKey, f64>
where
    I: IntoIterator<Item = (PeriodKey, f64)>,
{
    let mut out = BTreeMap::new();
    for (period, amount) in rows {
        *out.entry(period).or_insert(0.0) += amount;
    }
    out
}

/// Keep the largest snapshot per period (several releases may fall in one year).
pub fn latest_per_period<I>(snapshots: I) -> BTreeMap<PeriodKey, f64>
where
    I: IntoIterator<Item = (PeriodKey, f64)>,
{
    let mut out: BTreeMap<PeriodKey, f64> = BTreeMap::new();
    for (period, total) in snapshots {
        let slot = out.entry(period).or_insert(total);
        if total > *slot {
            *slot = total;
        }
    }
    out
}

/// Series from per-period additions; cumulative is the running sum.
pub fn series_from_increments(metric_id: &str, buckets: &BTreeMap<PeriodKey, f64>) -> Timeseries {
    let mut running = 0.0;
    let data = buckets
        .iter()
        .map(|(&period, &value)| {
            running += value;
            TimeseriesPoint::new(period, value, running)
        })
        .collect();
    Timeseries {
        metric_id: metric_id.to_string(),
        data,
    }
}

/// Series from cumulative totals (release statistics). Additions are the
/// differences between consecutive snapshots; a shrinking snapshot adds 0, so
/// the cumulative column never decreases.
pub fn series_from_snapshots(metric_id: &str, snapshots: &BTreeMap<PeriodKey, f64>) -> Timeseries {
    let mut prev = 0.0_f64;
    let increments: BTreeMap<PeriodKey, f64> = snapshots
        .iter()
        .map(|(&period, &total)| {
            let added = (total - prev).max(0.0);
            prev = prev.max(total);
            (period, added)
        })
        .collect();
    series_from_increments(metric_id, &increments)
}

/// Scale every cumulative point by `total / last_cumulative` and re-derive the
/// per-period values, so the shape is kept and the last point equals `total`.
/// Points are rounded to whole units. Returns the factor applied, or `None`
/// when the series has no positive total to scale from.
pub fn rescale_to_total(series: &mut Timeseries, total: f64) -> Option<f64> {
    let last = series.last_cumulative()?;
    if last <= 0.0 || !total.is_finite() {
        return None;
    }
    let factor = total / last;
    let mut prev = 0.0;
    for p in series.data.iter_mut() {
        let scaled = (p.cumulative * factor).round();
        p.value = scaled - prev;
        p.cumulative = scaled;
        prev = scaled;
    }
    Some(factor)
}

/// Pick the metric's `current_value`: the authoritative upstream total wins and
/// the series is rescaled onto it; otherwise the series total is used.
pub fn resolve_current_value(authoritative: Option<f64>, series: &mut Timeseries) -> f64 {
    match authoritative {
        Some(total) => {
            if let Some(factor) = rescale_to_total(series, total) {
                tracing::debug!(
                    metric = %series.metric_id,
                    factor,
                    "rescaled series onto authoritative total"
                );
            }
            total
        }
        None => series.last_cumulative().unwrap_or(0.0),
    }
}
