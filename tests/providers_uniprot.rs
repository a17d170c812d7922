// tests/providers_uniprot.rs
mod common;

use biodata_growth::collect::providers::uniprot::{releases_from_cache, UniProtCollector};
use biodata_growth::collect::raw_cache::RawCache;
use biodata_growth::collect::{Collector, SourceCollector};
use biodata_growth::config::collect::UniProtConfig;
use biodata_growth::error::FetchError;
use biodata_growth::parse::relnotes::{ReleaseId, SkipReason};
use common::{context, fixture, FakeServer, Reply};

fn notes_for(year: i32, entries: u64) -> String {
    format!(
        "                   UniProt Knowledgebase Release {year}_12\n\n\
         UniProtKB Release {year}_12 consists of {entries} entries (UniProtKB/Swiss-Prot:\n\
         550,000 entries and UniProtKB/TrEMBL: {} entries)\n",
        entries - 550_000
    )
}

fn ten_releases() -> Vec<ReleaseId> {
    (2014..2024).map(|y| ReleaseId::new(y, 12).unwrap()).collect()
}

#[test]
fn two_malformed_files_out_of_ten_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = RawCache::new(tmp.path().join("uniprot"));
    let releases = ten_releases();
    for (i, r) in releases.iter().enumerate() {
        let text = match i {
            3 => fixture("uniprot_relnotes_malformed.txt"),
            7 => "release notes moved\n".to_string(),
            _ => notes_for(r.year, 100_000_000 + i as u64 * 10_000_000),
        };
        cache.write_text(&r.notes_file_name(), &text).unwrap();
    }

    let parsed = releases_from_cache(&cache, &releases).unwrap();
    assert_eq!(parsed.records.len(), 8);
    assert_eq!(parsed.skipped.len(), 2);
    assert!(parsed
        .skipped
        .contains(&SkipReason::NoEntryCount { release: releases[3] }));
    assert!(parsed.records.iter().all(|r| r.release != releases[7]));
}

#[test]
fn nothing_parseable_is_an_upstream_format_error() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = RawCache::new(tmp.path().join("uniprot"));
    let releases = ten_releases();
    for r in &releases {
        cache
            .write_text(&r.notes_file_name(), &fixture("uniprot_relnotes_malformed.txt"))
            .unwrap();
    }

    let err = releases_from_cache(&cache, &releases).unwrap_err();
    assert!(matches!(err, FetchError::UpstreamFormat(_)), "{err}");
}

async fn uniprot_stub(live_total: &'static str) -> FakeServer {
    FakeServer::start(move |req| match req.path.as_str() {
        "/pub/previous_releases/" => Reply::ok(fixture("uniprot_listing.html")),
        "/pub/previous_releases/release-2021_04/relnotes.txt" => {
            Reply::ok(fixture("uniprot_relnotes_2021_04.txt"))
        }
        "/pub/previous_releases/release-2022_05/relnotes.txt" => {
            Reply::ok(fixture("uniprot_relnotes_2022_05.txt"))
        }
        "/pub/previous_releases/release-2023_01/relnotes.txt" => {
            Reply::ok(fixture("uniprot_relnotes_2023_01.txt"))
        }
        "/uniprotkb/search" => Reply::json(serde_json::json!({"results": []}))
            .with_header("X-Total-Results", live_total),
        _ => Reply::status(404),
    })
    .await
}

fn collector(server: &FakeServer) -> UniProtCollector {
    UniProtCollector::new(UniProtConfig {
        releases_url: server.url("/pub/previous_releases/"),
        rest_url: server.url("/uniprotkb/search"),
        first_year: 2021,
    })
}

#[tokio::test]
async fn latest_release_per_year_plus_live_total() {
    let server = uniprot_stub("250322721").await;
    let tmp = tempfile::tempdir().unwrap();

    let out = collector(&server).fetch_output(&context(tmp.path())).await.unwrap();
    let pts: Vec<_> = out.timeseries[0]
        .data
        .iter()
        .map(|p| (p.date.year_number(), p.cumulative))
        .collect();
    assert_eq!(
        pts,
        vec![
            (2021, 219_174_961.0),
            (2022, 229_580_745.0),
            (2023, 248_272_897.0),
            (2024, 250_322_721.0),
        ]
    );
    assert_eq!(out.metrics[0].formatted_value, "250M");

    // Only the latest release of each year was downloaded.
    assert_eq!(server.count("/pub/previous_releases/release-2021_01"), 0);
    assert_eq!(server.count("/pub/previous_releases/release-2022_02"), 0);
    let search = server
        .requests()
        .into_iter()
        .find(|r| r.path == "/uniprotkb/search")
        .unwrap();
    assert_eq!(search.query_param("size"), Some("0"));
}

#[tokio::test]
async fn cached_release_notes_are_not_downloaded_again() {
    let server = uniprot_stub("250322721").await;
    let tmp = tempfile::tempdir().unwrap();
    let c = collector(&server);

    c.collect(&context(tmp.path())).await.unwrap();
    let first = server.count("/pub/previous_releases/release-");
    assert_eq!(first, 3);

    let raw = c.collect(&context(tmp.path())).await.unwrap();
    assert_eq!(raw.releases.len(), 3);
    assert_eq!(server.count("/pub/previous_releases/release-"), first);
}

#[tokio::test]
async fn live_total_below_history_is_ignored() {
    let server = uniprot_stub("1000").await;
    let tmp = tempfile::tempdir().unwrap();

    let out = collector(&server).fetch_output(&context(tmp.path())).await.unwrap();
    assert_eq!(out.timeseries[0].data.len(), 3);
    assert_eq!(out.metrics[0].current_value, 248_272_897.0);
}

#[tokio::test]
async fn unreachable_archive_is_a_network_error() {
    let server = FakeServer::start(|req| match req.path.as_str() {
        "/pub/previous_releases/" => Reply::ok(fixture("uniprot_listing.html")),
        _ => Reply::status(503),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();

    let err = collector(&server).collect(&context(tmp.path())).await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)), "{err}");
}
