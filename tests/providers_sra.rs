// tests/providers_sra.rs
mod common;

use biodata_growth::collect::providers::sra::SraCollector;
use biodata_growth::collect::{Collector, SourceCollector};
use biodata_growth::config::collect::SraConfig;
use biodata_growth::error::FetchError;
use common::{context, fixture, FakeServer, Reply};
use serial_test::serial;

const TOKEN_ENV: &str = "SRA_TEST_ACCESS_TOKEN";

fn page(name: &str) -> Reply {
    Reply::ok(fixture(name)).with_header("Content-Type", "application/json")
}

fn collector(server: &FakeServer) -> SraCollector {
    SraCollector::new(SraConfig {
        api_base: server.url("/bigquery/v2"),
        project: Some("growth-test".to_string()),
        token_env: TOKEN_ENV.to_string(),
        page_size: 2,
    })
}

#[tokio::test]
#[serial]
async fn follows_page_tokens_until_the_last_page() {
    std::env::set_var(TOKEN_ENV, "ya29.test-token");
    let server = FakeServer::start(|req| match (req.method.as_str(), req.query_param("pageToken")) {
        ("POST", _) => page("bigquery_page1.json"),
        ("GET", Some("page-2")) => page("bigquery_page2.json"),
        _ => Reply::status(400),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();

    let out = collector(&server).fetch_output(&context(tmp.path())).await.unwrap();
    let pts: Vec<_> = out.timeseries[0]
        .data
        .iter()
        .map(|p| (p.date.year_number(), p.value))
        .collect();
    assert_eq!(pts, vec![(2008, 1.2e12), (2009, 8.8e12), (2010, 3.0e13)]);
    assert_eq!(out.metrics[0].current_value, 4.0e13);
    assert_eq!(out.metrics[0].formatted_value, "0.0 PB");

    let reqs = server.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].path, "/bigquery/v2/projects/growth-test/queries");
    assert_eq!(reqs[0].header("authorization"), Some("Bearer ya29.test-token"));
    let body = reqs[0].json();
    assert_eq!(body["useLegacySql"], false);
    assert_eq!(body["maxResults"], 2);
    assert!(body["query"].as_str().unwrap().contains("nih-sra-datastore.sra.metadata"));
    assert_eq!(reqs[1].path, "/bigquery/v2/projects/growth-test/queries/job_sra_1");
    assert_eq!(reqs[1].query_param("location"), Some("US"));
    std::env::remove_var(TOKEN_ENV);
}

#[tokio::test]
#[serial]
async fn polls_an_unfinished_job_before_reading_rows() {
    std::env::set_var(TOKEN_ENV, "ya29.test-token");
    let server = FakeServer::start(|req| match (req.method.as_str(), req.query_param("pageToken")) {
        ("POST", _) => Reply::json(serde_json::json!({
            "jobComplete": false,
            "jobReference": {"projectId": "growth-test", "jobId": "job_sra_1", "location": "US"}
        })),
        ("GET", None) => page("bigquery_page1.json"),
        ("GET", Some("page-2")) => page("bigquery_page2.json"),
        _ => Reply::status(400),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();

    let raw = collector(&server).collect(&context(tmp.path())).await.unwrap();
    assert_eq!(raw.years.len(), 3);
    assert_eq!(raw.years[2].run_count, 40_112);
    assert_eq!(server.requests().len(), 3);
    std::env::remove_var(TOKEN_ENV);
}

#[tokio::test]
#[serial]
async fn short_result_set_is_rejected() {
    std::env::set_var(TOKEN_ENV, "ya29.test-token");
    // totalRows says 3 but the only page carries 2 rows and no pageToken.
    let mut first: serde_json::Value = serde_json::from_str(&fixture("bigquery_page1.json")).unwrap();
    first.as_object_mut().unwrap().remove("pageToken");
    let server = FakeServer::start(move |_| Reply::json(first.clone())).await;
    let tmp = tempfile::tempdir().unwrap();

    let err = collector(&server).collect(&context(tmp.path())).await.unwrap_err();
    assert!(matches!(err, FetchError::UpstreamFormat(_)), "{err}");
    std::env::remove_var(TOKEN_ENV);
}

#[tokio::test]
#[serial]
async fn missing_token_never_reaches_the_network() {
    std::env::remove_var(TOKEN_ENV);
    let server = FakeServer::start(|_| Reply::status(500)).await;
    let tmp = tempfile::tempdir().unwrap();

    let err = collector(&server).collect(&context(tmp.path())).await.unwrap_err();
    assert!(matches!(err, FetchError::Unconfigured(_)), "{err}");
    assert!(server.requests().is_empty());
}
