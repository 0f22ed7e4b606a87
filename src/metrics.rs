//! Prometheus metrics for fedstats.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants and the recording helpers the scheduler
//! calls. fedstats is a one-shot poller, so instead of serving `/metrics`
//! the exposition text can be written to a node-exporter textfile.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::status::State;

// -- Metric name constants ----------------------------------------------------

/// Completed endpoint polls (counter). Labels: protocol, outcome.
pub const POLLS_TOTAL: &str = "fedstats_polls_total";

/// Physical endpoints answered from a fresh cache entry (counter).
pub const CACHE_HITS_TOTAL: &str = "fedstats_cache_hits_total";

/// Time spent polling one physical endpoint (histogram). Labels: protocol.
pub const POLL_DURATION_SECONDS: &str = "fedstats_poll_duration_seconds";

/// Physical endpoints skipped because they are flagged offline (counter).
pub const ENDPOINTS_OFFLINE_TOTAL: &str = "fedstats_endpoints_offline_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(POLLS_TOTAL, "Completed endpoint polls by protocol and outcome");
    describe_counter!(CACHE_HITS_TOTAL, "Physical endpoints served from a fresh cache entry");
    describe_histogram!(
        POLL_DURATION_SECONDS,
        "Time spent polling one physical endpoint in seconds"
    );
    describe_counter!(ENDPOINTS_OFFLINE_TOTAL, "Physical endpoints skipped as offline");
}

// -- Recording helpers --------------------------------------------------------

pub fn record_poll(protocol: &'static str, state: State, elapsed: Duration) {
    counter!(POLLS_TOTAL, "protocol" => protocol, "outcome" => outcome_label(state)).increment(1);
    histogram!(POLL_DURATION_SECONDS, "protocol" => protocol).record(elapsed.as_secs_f64());
}

pub fn record_cache_hit() {
    counter!(CACHE_HITS_TOTAL).increment(1);
}

pub fn record_offline() {
    counter!(ENDPOINTS_OFFLINE_TOTAL).increment(1);
}

fn outcome_label(state: State) -> &'static str {
    match state {
        State::Ok => "ok",
        State::Warning => "warning",
        State::Error => "error",
        State::Offline => "offline",
    }
}

// -- Textfile export ----------------------------------------------------------

/// Render the current exposition text, `None` before `init_metrics()`.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Atomically replace `path` with the current exposition text.
pub fn write_textfile(path: &Path) -> anyhow::Result<()> {
    let body = render().ok_or_else(|| anyhow::anyhow!("metrics recorder not initialized"))?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(State::Ok), "ok");
        assert_eq!(outcome_label(State::Warning), "warning");
        assert_eq!(outcome_label(State::Offline), "offline");
    }

    #[test]
    fn test_textfile_contains_polls() {
        init_metrics();
        describe_metrics();
        record_poll("S3", State::Ok, Duration::from_millis(250));
        record_offline();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fedstats.prom");
        write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(POLLS_TOTAL));
        assert!(text.contains(ENDPOINTS_OFFLINE_TOTAL));
        assert!(!dir.path().join("fedstats.prom.tmp").exists());
    }
}
