//! Crash triage bucket matcher.
//!
//! Given a crash report, decides whether it matches an existing crash
//! signature bucket, ranks similar buckets by difference count, measures
//! how broadly each candidate's signature would capture other buckets'
//! crashes, and renders the result as flat display records.

pub mod bugs;
pub mod config;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod presentation;
pub mod signature;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
pub use matching::{FindSignaturesResult, TriageService};
