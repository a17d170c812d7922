// tests/merge_properties.rs
use std::collections::BTreeMap;

use biodata_growth::collect::providers::cellxgene::{CellxGeneRaw, DatasetRow};
use biodata_growth::collect::providers::uniprot::UniProtRaw;
use biodata_growth::collect::providers::{CellxGeneCollector, UniProtCollector};
use biodata_growth::config::collect::{CellxGeneConfig, UniProtConfig};
use biodata_growth::format::Notation;
use biodata_growth::merge::{merge, merge_points, MergeOutcome, SeriesBasis};
use biodata_growth::model::{
    CollectorOutput, Metric, OutputMetadata, PeriodKey, SourceInfo, Timeseries, TimeseriesPoint,
};
use biodata_growth::parse::relnotes::{ReleaseId, ReleaseRecord};
use biodata_growth::validate::{check_series, validate_output};
use biodata_growth::{Collector, SourceCollector};
use chrono::{TimeZone, Utc};

fn points(rows: &[(i32, f64)]) -> Vec<TimeseriesPoint> {
    let mut running = 0.0;
    rows.iter()
        .map(|&(y, v)| {
            running += v;
            TimeseriesPoint::new(PeriodKey::year(y).unwrap(), v, running)
        })
        .collect()
}

fn output(series: &[(&str, &[(i32, f64)])], current: f64, day: u32) -> CollectorOutput {
    CollectorOutput {
        source: SourceInfo {
            id: "pdb".into(),
            name: "Protein Data Bank".into(),
            description: "structures".into(),
            url: "https://www.rcsb.org".into(),
            color: "#ef4444".into(),
            icon: None,
        },
        metrics: series
            .iter()
            .map(|(id, _)| Metric::new(id, id, "u", current, Notation::Suffix, ""))
            .collect(),
        timeseries: series
            .iter()
            .map(|(id, rows)| Timeseries {
                metric_id: id.to_string(),
                data: points(rows),
            })
            .collect(),
        metadata: OutputMetadata {
            last_updated: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            update_frequency: "weekly".into(),
            data_license: None,
        },
    }
}

fn merged(outcome: MergeOutcome) -> CollectorOutput {
    match outcome {
        MergeOutcome::Merged(o) => o,
        MergeOutcome::Retained { .. } => panic!("expected a merge"),
    }
}

#[test]
fn revised_and_new_periods_are_merged() {
    let previous = output(&[("structures", &[(2020, 100.0), (2021, 50.0)])], 150.0, 1);
    let incoming = output(&[("structures", &[(2021, 60.0), (2022, 40.0)])], 200.0, 2);

    let out = merged(merge(Some(previous), incoming, SeriesBasis::Increments));
    let got: Vec<_> = out.timeseries[0]
        .data
        .iter()
        .map(|p| (p.date.year_number(), p.value, p.cumulative))
        .collect();
    assert_eq!(
        got,
        vec![(2020, 100.0, 100.0), (2021, 60.0, 160.0), (2022, 40.0, 200.0)]
    );
    assert_eq!(out.metrics[0].current_value, 200.0);
    // Metadata comes from the newer fetch.
    assert_eq!(out.metadata.last_updated, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    check_series(&out.timeseries[0]).unwrap();
}

#[test]
fn merging_the_same_output_twice_changes_nothing() {
    let a = output(&[("structures", &[(2019, 3.0), (2020, 4.0), (2021, 5.0)])], 12.0, 3);
    let once = merged(merge(Some(a.clone()), a.clone(), SeriesBasis::Increments));
    let twice = merged(merge(Some(once.clone()), a, SeriesBasis::Increments));
    assert_eq!(once, twice);
}

#[test]
fn empty_incoming_keeps_previous_untouched() {
    let previous = output(&[("structures", &[(2020, 100.0), (2021, 50.0)])], 150.0, 1);
    let empty = output(&[("structures", &[])], 0.0, 2);

    let outcome = merge(Some(previous.clone()), empty, SeriesBasis::Increments);
    let conflict = outcome.conflict().expect("merge must refuse");
    assert_eq!(conflict.kind(), "merge_conflict");
    assert_eq!(outcome.into_output(), previous);
}

#[test]
fn first_run_sorts_and_recomputes_cumulative() {
    let mut incoming = output(&[("structures", &[(2022, 1.0), (2020, 2.0)])], 3.0, 1);
    incoming.timeseries[0].data[0].cumulative = 999.0;

    let out = merged(merge(None, incoming, SeriesBasis::Increments));
    check_series(&out.timeseries[0]).unwrap();
    assert_eq!(out.timeseries[0].last_cumulative(), Some(3.0));
}

#[test]
fn metrics_missing_from_incoming_are_retained() {
    let previous = output(
        &[("structures", &[(2020, 1.0)]), ("assemblies", &[(2020, 7.0)])],
        1.0,
        1,
    );
    let incoming = output(&[("structures", &[(2021, 2.0)])], 3.0, 2);

    let out = merged(merge(Some(previous), incoming, SeriesBasis::Increments));
    assert!(out.metric("assemblies").is_some());
    assert_eq!(out.timeseries_for("assemblies").unwrap().data.len(), 1);
    assert_eq!(out.timeseries_for("structures").unwrap().last_cumulative(), Some(3.0));
}

#[test]
fn year_and_date_keys_collapse_onto_one_period() {
    let previous: Vec<TimeseriesPoint> = serde_json::from_str(
        r#"[{"date": "2020", "value": 1.0, "cumulative": 1.0}]"#,
    )
    .unwrap();
    let incoming = points(&[(2020, 4.0)]);
    let out = merge_points(&previous, &incoming, SeriesBasis::Increments);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value, 4.0);
}

fn run_day(day: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap()
}

fn uniprot_raw(totals: &[(i32, u64)]) -> UniProtRaw {
    UniProtRaw {
        releases: totals
            .iter()
            .map(|&(year, entries)| ReleaseRecord {
                release: ReleaseId::new(year, 1).unwrap(),
                entries,
            })
            .collect(),
        skipped: 0,
        current_total: None,
        current_year: 2024,
    }
}

#[test]
fn uniprot_release_missing_from_a_later_run_keeps_the_total() {
    let c = UniProtCollector::new(UniProtConfig::default());
    let first = c
        .transform(uniprot_raw(&[(2014, 100), (2015, 150), (2016, 200)]), run_day(1))
        .unwrap();
    let second = c
        .transform(uniprot_raw(&[(2014, 100), (2016, 200)]), run_day(2))
        .unwrap();
    assert_eq!(c.merge_basis(), SeriesBasis::Snapshots);

    let out = merged(merge(Some(first), second, c.merge_basis()));
    let ts = out.timeseries_for("sequences").unwrap();
    let got: Vec<_> = ts
        .data
        .iter()
        .map(|p| (p.date.year_number(), p.value, p.cumulative))
        .collect();
    assert_eq!(
        got,
        vec![(2014, 100.0, 100.0), (2015, 50.0, 150.0), (2016, 50.0, 200.0)]
    );
    assert_eq!(ts.last_cumulative(), Some(out.metrics[0].current_value));
    check_series(ts).unwrap();
    assert!(validate_output(&out, 0.0).unwrap().is_empty());
}

#[test]
fn uniprot_new_release_extends_merged_totals() {
    let c = UniProtCollector::new(UniProtConfig::default());
    let first = c
        .transform(uniprot_raw(&[(2014, 100), (2015, 150)]), run_day(1))
        .unwrap();
    let second = c
        .transform(uniprot_raw(&[(2015, 150), (2016, 400)]), run_day(2))
        .unwrap();

    let out = merged(merge(Some(first), second, c.merge_basis()));
    let ts = out.timeseries_for("sequences").unwrap();
    assert_eq!(ts.data.len(), 3);
    assert_eq!(ts.last_cumulative(), Some(400.0));
    assert_eq!(out.metrics[0].current_value, 400.0);
    assert!(validate_output(&out, 0.0).unwrap().is_empty());
}

fn cellxgene_raw(doi_dates: BTreeMap<String, Option<String>>) -> CellxGeneRaw {
    CellxGeneRaw {
        datasets: vec![
            DatasetRow {
                dataset_id: "d1".into(),
                cell_count: 1000,
                doi: Some("10.1/a".into()),
                published_at: Some("2021-05-10T00:00:00Z".into()),
            },
            DatasetRow {
                dataset_id: "d2".into(),
                cell_count: 200,
                doi: None,
                published_at: Some("2021-05-12T00:00:00Z".into()),
            },
        ],
        doi_dates,
        unique_cell_count: 1200,
    }
}

#[test]
fn cellxgene_late_doi_date_does_not_double_count_cells() {
    let c = CellxGeneCollector::new(CellxGeneConfig::default());
    // CrossRef did not answer for 10.1/a on the first run.
    let first = c.transform(cellxgene_raw(BTreeMap::new()), run_day(1)).unwrap();
    let mut dates = BTreeMap::new();
    dates.insert("10.1/a".to_string(), Some("2020-02-03T00:00:00Z".to_string()));
    let second = c.transform(cellxgene_raw(dates), run_day(2)).unwrap();
    assert_eq!(c.merge_basis(), SeriesBasis::Increments);

    let out = merged(merge(Some(first), second, c.merge_basis()));
    let ts = out.timeseries_for("cells").unwrap();
    let got: Vec<_> = ts
        .data
        .iter()
        .map(|p| (p.date.to_string(), p.value, p.cumulative))
        .collect();
    assert_eq!(
        got,
        vec![
            ("2020-02-01".to_string(), 1000.0, 1000.0),
            ("2021-05-01".to_string(), 200.0, 1200.0)
        ]
    );
    assert_eq!(ts.last_cumulative(), Some(out.metrics[0].current_value));
    assert!(validate_output(&out, 0.0).unwrap().is_empty());
}
