// tests/providers_pdb.rs
mod common;

use biodata_growth::collect::providers::pdb::{PdbCollector, PdbRaw};
use biodata_growth::collect::{Collector, SourceCollector, RAW_PAYLOAD_FILE};
use biodata_growth::config::collect::PdbConfig;
use biodata_growth::error::{CollectError, FetchError};
use common::{context, FakeServer, Reply};
use serde_json::json;

fn year_of(req: &common::Request) -> i32 {
    req.json()["query"]["parameters"]["value"]["from"]
        .as_str()
        .and_then(|s| s.get(..4))
        .and_then(|y| y.parse().ok())
        .unwrap_or(0)
}

async fn rcsb_stub() -> FakeServer {
    FakeServer::start(|req| match year_of(req) {
        2021 => Reply::json(json!({"query_id": "q", "result_type": "entry", "total_count": 100})),
        // No hits: the search service answers 204 without a body.
        2022 => Reply::status(204),
        2023 => Reply::json(json!({"total_count": 250})),
        2024 => Reply::json(json!({"total_count": 50})),
        _ => Reply::status(400),
    })
    .await
}

#[tokio::test]
async fn counts_every_year_through_the_current_one() {
    let server = rcsb_stub().await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = context(tmp.path());
    let collector = PdbCollector::new(PdbConfig {
        search_url: server.url("/rcsbsearch/v2/query"),
        first_year: 2021,
    });

    let out = collector.fetch_output(&ctx).await.unwrap();
    let ts = &out.timeseries[0];
    let pts: Vec<_> = ts.data.iter().map(|p| (p.date.year_number(), p.value, p.cumulative)).collect();
    assert_eq!(
        pts,
        vec![
            (2021, 100.0, 100.0),
            (2022, 0.0, 100.0),
            (2023, 250.0, 350.0),
            (2024, 50.0, 400.0)
        ]
    );
    assert_eq!(out.metrics[0].current_value, 400.0);
    assert_eq!(out.metadata.last_updated, common::run_time());

    // Every request is a count-only POST.
    let reqs = server.requests();
    assert_eq!(reqs.len(), 4);
    assert!(reqs.iter().all(|r| r.method == "POST"));
    assert!(reqs.iter().all(|r| r.json()["request_options"]["paginate"]["rows"] == 0));

    // The raw payload is kept for re-running the transform.
    let raw: PdbRaw = serde_json::from_str(
        &std::fs::read_to_string(tmp.path().join("pdb").join(RAW_PAYLOAD_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(raw.years.len(), 4);
}

#[tokio::test]
async fn a_failed_year_fails_the_whole_fetch() {
    let server = rcsb_stub().await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = context(tmp.path());
    // 2020 is answered with 400.
    let collector = PdbCollector::new(PdbConfig {
        search_url: server.url("/rcsbsearch/v2/query"),
        first_year: 2020,
    });

    let err = collector.fetch_output(&ctx).await.unwrap_err();
    assert!(
        matches!(&err, CollectError::Fetch(FetchError::UpstreamFormat(m)) if m.contains("HTTP 400")),
        "{err}"
    );
}

#[tokio::test]
async fn all_zero_counts_are_an_upstream_problem() {
    let server = FakeServer::start(|_| Reply::status(204)).await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = context(tmp.path());
    let collector = PdbCollector::new(PdbConfig {
        search_url: server.url("/q"),
        first_year: 2023,
    });

    let err = collector.collect(&ctx).await.unwrap_err();
    assert!(matches!(err, FetchError::UpstreamFormat(_)), "{err}");
}
