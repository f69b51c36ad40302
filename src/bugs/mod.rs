/// External bug tracker references
///
/// Buckets may link to an issue in an external tracker. The tracker is
/// described by a URL template with a single `%s` placeholder that is
/// replaced by the (percent-encoded) external bug id.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Placeholder substituted by the external bug id
pub const ID_PLACEHOLDER: &str = "%s";

/// Errors raised while turning a template into a bug URL
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlTemplateError {
    #[error("template has no '%s' placeholder")]
    MissingPlaceholder,

    #[error("template has {0} '%s' placeholders, expected exactly one")]
    MultiplePlaceholders(usize),

    #[error("external bug id is empty")]
    EmptyId,

    #[error("'{url}' is not a valid URL: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// A bug tracker type (e.g. a Bugzilla or GitHub instance)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugProvider {
    pub name: String,
    pub url_template: String,
}

/// Reference to an issue in an external tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalBug {
    pub external_id: String,
    pub provider: BugProvider,
    pub closed: bool,
}

impl ExternalBug {
    pub fn new(external_id: impl Into<String>, provider: BugProvider) -> Self {
        Self {
            external_id: external_id.into(),
            provider,
            closed: false,
        }
    }

    /// Link to the issue
    pub fn url(&self) -> Result<Url, UrlTemplateError> {
        format_bug_url(&self.provider.url_template, &self.external_id)
    }
}

/// Check that a template carries exactly one placeholder
pub fn validate_template(template: &str) -> Result<(), UrlTemplateError> {
    match template.matches(ID_PLACEHOLDER).count() {
        0 => Err(UrlTemplateError::MissingPlaceholder),
        1 => Ok(()),
        n => Err(UrlTemplateError::MultiplePlaceholders(n)),
    }
}

/// Percent-encode an id so it is one opaque component in a path or a query.
///
/// Form encoding writes a space as `+`, which paths read literally. A literal
/// `+` is always encoded as `%2B`, so every remaining `+` stands for a space.
fn encode_id(external_id: &str) -> String {
    url::form_urlencoded::byte_serialize(external_id.as_bytes())
        .map(|chunk| if chunk == "+" { "%20" } else { chunk })
        .collect()
}

/// Substitute `external_id` into `template` and validate the result
pub fn format_bug_url(template: &str, external_id: &str) -> Result<Url, UrlTemplateError> {
    validate_template(template)?;

    let external_id = external_id.trim();
    if external_id.is_empty() {
        return Err(UrlTemplateError::EmptyId);
    }

    let encoded = encode_id(external_id);
    let candidate = template.replacen(ID_PLACEHOLDER, &encoded, 1);

    Url::parse(&candidate).map_err(|e| UrlTemplateError::InvalidUrl {
        url: candidate.clone(),
        reason: e.to_string(),
    })
}
