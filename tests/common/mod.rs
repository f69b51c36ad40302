//! Shared helpers for the integration tests

#![allow(dead_code)]

use crash_triage::{
    config::Config,
    models::{Bucket, CrashEntry, RawCrash},
    state::InMemoryStore,
    TriageService,
};
use std::sync::Arc;

/// Trace text with one frame per line
pub fn trace(frames: &[&str]) -> String {
    frames.join("\n")
}

/// Service over a fresh in-memory store
pub fn service_with(config: Config) -> TriageService {
    TriageService::new(Arc::new(InMemoryStore::new()), &config).unwrap()
}

pub fn service() -> TriageService {
    service_with(Config::default())
}

pub async fn submit(service: &TriageService, frames: &[&str]) -> CrashEntry {
    service
        .submit_crash(RawCrash::new(trace(frames)))
        .await
        .unwrap()
}

/// Bucket whose signature and single member come from a crash with `frames`
pub async fn seed_bucket(service: &TriageService, frames: &[&str]) -> Bucket {
    let crash = submit(service, frames).await;
    service
        .create_bucket_from_crash(crash.id, Some(format!("Crash in {}", frames[0])))
        .await
        .unwrap()
}

/// Value of a sample line such as `name{label="x"} 3`
pub fn sample_value(output: &str, prefix: &str) -> Option<f64> {
    output
        .lines()
        .find(|line| line.starts_with(prefix))
        .and_then(|line| line.split_whitespace().last())
        .and_then(|value| value.parse().ok())
}

/// Check if a metric exists in Prometheus output
pub fn metric_exists(output: &str, metric_name: &str) -> bool {
    output.lines().any(|line| {
        line.starts_with(&format!("# HELP {}", metric_name)) || line.starts_with(metric_name)
    })
}
