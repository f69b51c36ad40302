pub mod foreign;
pub mod matcher;
pub mod models;
pub mod service;

pub use foreign::{classify, percentage, ForeignMatchAnalyzer, Representative};
pub use matcher::Matcher;
pub use models::*;
pub use service::TriageService;
