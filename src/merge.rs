//! # Merge engine
//! Reconciles a freshly transformed output with the persisted one.
//!
//! - Points are unioned per metric by period key; on overlap the incoming
//!   point wins.
//! - For [`SeriesBasis::Increments`] the per-period values are unioned and
//!   cumulative is recomputed in one ascending pass. For
//!   [`SeriesBasis::Snapshots`] the published running totals are unioned and
//!   the values are derived from them, so a release missing from one run
//!   cannot be counted twice.
//! - Metrics and timeseries missing from the incoming output are retained.
//! - `current_value` always comes from the incoming output, never from the
//!   merged series (see `validate::check_drift`).
//! - An incoming output without a single point never replaces existing
//!   history: the previous output is returned unchanged.

use std::collections::BTreeMap;

use crate::error::CollectError;
use crate::model::{CollectorOutput, PeriodKey, Timeseries, TimeseriesPoint};
use crate::transform::series_from_snapshots;

/// What a source's points carry as their primary number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeriesBasis {
    /// `value` is what was added in the period (counts, bucketed cells).
    #[default]
    Increments,
    /// `cumulative` is a total read from upstream release statistics.
    Snapshots,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(CollectorOutput),
    /// Incoming would have erased history; `previous` is kept as-is.
    Retained {
        previous: CollectorOutput,
        retained_points: usize,
    },
}

impl MergeOutcome {
    pub fn output(&self) -> &CollectorOutput {
        match self {
            MergeOutcome::Merged(o) => o,
            MergeOutcome::Retained { previous, .. } => previous,
        }
    }

    pub fn into_output(self) -> CollectorOutput {
        match self {
            MergeOutcome::Merged(o) => o,
            MergeOutcome::Retained { previous, .. } => previous,
        }
    }

    /// The recovered conflict, if the merge refused to overwrite.
    pub fn conflict(&self) -> Option<CollectError> {
        match self {
            MergeOutcome::Merged(_) => None,
            MergeOutcome::Retained {
                previous,
                retained_points,
            } => Some(CollectError::MergeConflict {
                source_id: previous.source.id.clone(),
                retained_points: *retained_points,
            }),
        }
    }
}

pub fn merge(previous: Option<CollectorOutput>, incoming: CollectorOutput, basis: SeriesBasis) -> MergeOutcome {
    let Some(previous) = previous else {
        let mut first = incoming;
        for ts in first.timeseries.iter_mut() {
            ts.data = merge_points(&[], &ts.data, basis);
        }
        return MergeOutcome::Merged(first);
    };

    if incoming.total_points() == 0 {
        let retained_points = previous.total_points();
        tracing::warn!(
            source = %previous.source.id,
            retained_points,
            "incoming fetch has no points; keeping persisted history"
        );
        return MergeOutcome::Retained {
            previous,
            retained_points,
        };
    }

    let CollectorOutput {
        source,
        mut metrics,
        timeseries: incoming_series,
        metadata,
    } = incoming;

    for old in &previous.metrics {
        if !metrics.iter().any(|m| m.id == old.id) {
            metrics.push(old.clone());
        }
    }

    let mut timeseries: Vec<Timeseries> = Vec::with_capacity(incoming_series.len());
    for ts in &incoming_series {
        let old = previous
            .timeseries_for(&ts.metric_id)
            .map(|t| t.data.as_slice())
            .unwrap_or(&[]);
        timeseries.push(Timeseries {
            metric_id: ts.metric_id.clone(),
            data: merge_points(old, &ts.data, basis),
        });
    }
    for old in &previous.timeseries {
        if !timeseries.iter().any(|t| t.metric_id == old.metric_id) {
            timeseries.push(Timeseries {
                metric_id: old.metric_id.clone(),
                data: merge_points(&old.data, &[], basis),
            });
        }
    }

    MergeOutcome::Merged(CollectorOutput {
        source,
        metrics,
        timeseries,
        metadata,
    })
}

/// Union by period key (incoming wins), sorted ascending, with the derived
/// column rebuilt from the unioned one.
pub fn merge_points(
    previous: &[TimeseriesPoint],
    incoming: &[TimeseriesPoint],
    basis: SeriesBasis,
) -> Vec<TimeseriesPoint> {
    let mut by_period: BTreeMap<PeriodKey, f64> = BTreeMap::new();
    for p in previous.iter().chain(incoming) {
        let primary = match basis {
            SeriesBasis::Increments => p.value,
            SeriesBasis::Snapshots => p.cumulative,
        };
        by_period.insert(p.date, primary);
    }
    if basis == SeriesBasis::Snapshots {
        return series_from_snapshots("", &by_period).data;
    }
    let mut out: Vec<TimeseriesPoint> = by_period
        .into_iter()
        .map(|(date, value)| TimeseriesPoint::new(date, value, 0.0))
        .collect();
    recompute_cumulative(&mut out);
    out
}

/// Single ascending pass: `cumulative[0] = value[0]`, then running sum.
pub fn recompute_cumulative(points: &mut [TimeseriesPoint]) {
    let mut running = 0.0;
    for p in points.iter_mut() {
        running += p.value;
        p.cumulative = running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(year: i32, value: f64, cumulative: f64) -> TimeseriesPoint {
        TimeseriesPoint::new(PeriodKey::year(year).unwrap(), value, cumulative)
    }

    #[test]
    fn overlap_takes_incoming_and_recomputes() {
        let previous = vec![pt(2020, 100.0, 100.0), pt(2021, 50.0, 150.0)];
        // Incoming cumulative values are ignored; they get recomputed.
        let incoming = vec![pt(2021, 60.0, -1.0), pt(2022, 40.0, -1.0)];
        let merged = merge_points(&previous, &incoming, SeriesBasis::Increments);
        assert_eq!(
            merged,
            vec![
                pt(2020, 100.0, 100.0),
                pt(2021, 60.0, 160.0),
                pt(2022, 40.0, 200.0)
            ]
        );
    }

    #[test]
    fn unsorted_input_is_sorted_and_unique() {
        let incoming = vec![pt(2022, 1.0, 0.0), pt(2020, 2.0, 0.0), pt(2022, 3.0, 0.0)];
        let merged = merge_points(&[], &incoming, SeriesBasis::Increments);
        let keys: Vec<_> = merged.iter().map(|p| p.date.year_number()).collect();
        assert_eq!(keys, vec![2020, 2022]);
        // Last duplicate in input order wins.
        assert_eq!(merged[1].value, 3.0);
        assert_eq!(merged[1].cumulative, 5.0);
    }

    #[test]
    fn snapshot_gap_does_not_double_count() {
        // Run 1 saw every release; run 2 could not read 2015.
        let previous = vec![pt(2014, 100.0, 100.0), pt(2015, 50.0, 150.0), pt(2016, 50.0, 200.0)];
        let incoming = vec![pt(2014, 100.0, 100.0), pt(2016, 100.0, 200.0)];
        let merged = merge_points(&previous, &incoming, SeriesBasis::Snapshots);
        assert_eq!(
            merged,
            vec![
                pt(2014, 100.0, 100.0),
                pt(2015, 50.0, 150.0),
                pt(2016, 50.0, 200.0)
            ]
        );
    }

    #[test]
    fn snapshot_totals_never_decrease_after_merge() {
        let previous = vec![pt(2020, 300.0, 300.0)];
        let incoming = vec![pt(2019, 100.0, 100.0), pt(2021, 0.0, 250.0)];
        let merged = merge_points(&previous, &incoming, SeriesBasis::Snapshots);
        let cums: Vec<_> = merged.iter().map(|p| p.cumulative).collect();
        assert_eq!(cums, vec![100.0, 300.0, 300.0]);
        assert_eq!(merged[2].value, 0.0);
    }
}
