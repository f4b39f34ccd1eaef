//! Configuration for the vector store client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the collection lives and how its documents are shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Database base URL as seen from the remote host.
    pub base_url: String,

    /// Collection (class) holding the documents.
    pub class_name: String,

    /// Property with the document text.
    pub content_field: String,

    /// Identity properties returned with every search result.
    pub fields: Vec<String>,

    /// Property that names the member a document belongs to.
    pub member_field: String,

    /// Properties fetched once per member when listing members.
    pub member_detail_fields: Vec<String>,

    /// Minimum similarity for search results.
    pub certainty: f64,

    pub existence_ttl_secs: u64,
    pub search_ttl_secs: u64,
    pub members_ttl_secs: u64,
    pub stats_ttl_secs: u64,

    /// Request timeout.
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            class_name: "Document".to_string(),
            content_field: "content".to_string(),
            fields: vec![
                "title".to_string(),
                "member".to_string(),
                "party".to_string(),
                "date".to_string(),
                "url".to_string(),
            ],
            member_field: "member".to_string(),
            member_detail_fields: vec!["party".to_string(), "constituency".to_string()],
            certainty: 0.7,
            existence_ttl_secs: 300,
            search_ttl_secs: 900,
            members_ttl_secs: 3600,
            stats_ttl_secs: 3600,
            timeout_secs: 30,
        }
    }
}

impl VectorStoreConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_certainty(mut self, certainty: f64) -> Self {
        self.certainty = certainty;
        self
    }

    pub fn existence_ttl(&self) -> Duration {
        Duration::from_secs(self.existence_ttl_secs)
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }

    pub fn members_ttl(&self) -> Duration {
        Duration::from_secs(self.members_ttl_secs)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
