use crate::bugs::ExternalBug;
use crate::signature::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A named group of crashes sharing a signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Bucket {
    /// Unique identifier
    pub id: u64,

    /// Human-readable summary shown in bucket lists
    #[validate(length(min = 1, max = 1023))]
    pub short_description: String,

    /// Matching rule
    pub signature: Signature,

    /// Linked tracker issue
    #[serde(default)]
    pub bug: Option<ExternalBug>,

    /// Number of crashes assigned to this bucket
    #[serde(default)]
    pub member_count: u64,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last modification (signature edit, bug link, new member)
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Bucket {
    /// Create a new empty bucket
    pub fn new(id: u64, short_description: String, signature: Signature) -> Self {
        let now = Utc::now();

        Self {
            id,
            short_description,
            signature,
            bug: None,
            member_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a newly assigned crash
    pub fn add_member(&mut self) {
        self.member_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn link_bug(&mut self, bug: ExternalBug) {
        self.bug = Some(bug);
        self.updated_at = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.member_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bugs::BugProvider;
    use crate::signature::{FramePattern, Symptom};

    fn signature() -> Signature {
        Signature::new(vec![Symptom::StackFrames {
            function_names: vec![FramePattern::parse("main").unwrap()],
        }])
    }

    #[test]
    fn test_bucket_creation() {
        let bucket = Bucket::new(5, "Crash in main".to_string(), signature());
        assert_eq!(bucket.id, 5);
        assert!(bucket.is_empty());
        assert!(bucket.bug.is_none());
        assert!(bucket.validate().is_ok());
    }

    #[test]
    fn test_empty_description_rejected() {
        let bucket = Bucket::new(5, String::new(), signature());
        assert!(bucket.validate().is_err());
    }

    #[test]
    fn test_add_member_touches_bucket() {
        let mut bucket = Bucket::new(5, "Crash in main".to_string(), signature());
        let before = bucket.updated_at;
        bucket.add_member();
        bucket.add_member();
        assert_eq!(bucket.member_count, 2);
        assert!(bucket.updated_at >= before);
    }

    #[test]
    fn test_link_bug() {
        let mut bucket = Bucket::new(5, "Crash in main".to_string(), signature());
        bucket.link_bug(ExternalBug::new(
            "1",
            BugProvider {
                name: "github".to_string(),
                url_template: "https://github.com/o/r/issues/%s".to_string(),
            },
        ));
        assert_eq!(bucket.bug.as_ref().unwrap().external_id, "1");
    }
}
