// src/collect/mod.rs
pub mod http;
pub mod providers;
pub mod raw_cache;
pub mod registry;
pub mod types;

pub use types::{CollectContext, Collector, SourceCollector, RAW_PAYLOAD_FILE};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up in the textfile).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("collect_runs_total", "Collection runs started.");
        describe_counter!(
            "collect_source_errors_total",
            "Sources that failed to fetch, transform, validate or persist."
        );
        describe_histogram!("collect_fetch_ms", "Source fetch time in milliseconds.");
        describe_counter!(
            "collect_points_total",
            "Timeseries points persisted across sources."
        );
        describe_gauge!(
            "collect_last_run_ts",
            "Unix ts when the collection pipeline last ran."
        );
    });
}
