//! Vector database client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ragbridge_bridge::{HttpRequest, HttpResponse, HttpTransport, redact_for_log};
use ragbridge_store::{Cache, CacheExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::VectorStoreConfig;
use crate::error::{Result, VectorStoreError};
use crate::filter::{SearchFilter, validate_field};
use crate::query::{
    GroupCount, MemberSummary, NearVectorQuery, SearchResult, extract_rows, graphql_body,
    group_by_query, representative_query, to_group_count, to_search_result,
};

/// Cache key for collection existence.
pub const EXISTS_KEY: &str = "vs:exists";
/// Cache key for the member list.
pub const MEMBERS_KEY: &str = "vs:members";
/// Tag carried by every grouped-statistics entry.
pub const STATS_TAG: &str = "vs:stats";
const SEARCH_PREFIX: &str = "vs:search:";

/// Cache key for grouped statistics on `field`.
pub fn stats_key(field: &str) -> String {
    format!("{STATS_TAG}:{field}")
}

/// Queries the collection through an [`HttpTransport`].
///
/// Existence, member list and per-field statistics are cached under fixed
/// keys with their own invalidation hooks. Search results are cached under
/// parameter hashes that cannot be enumerated, so they only expire.
pub struct VectorStoreClient {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<dyn Cache>,
    config: VectorStoreConfig,
}

#[derive(Serialize)]
struct SearchKey<'a> {
    class_name: &'a str,
    vector: &'a [f32],
    limit: usize,
    certainty: f64,
    filter: Option<&'a SearchFilter>,
    fields: &'a [String],
}

impl VectorStoreClient {
    pub fn new(config: VectorStoreConfig, transport: Arc<dyn HttpTransport>, cache: Arc<dyn Cache>) -> Self {
        Self {
            transport,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    /// Whether the configured collection exists.
    pub async fn collection_exists(&self) -> Result<bool> {
        if let Some(exists) = self.cached::<bool>(EXISTS_KEY).await {
            return Ok(exists);
        }

        let url = format!("{}/v1/schema/{}", self.base_url(), self.config.class_name);
        let response = self.send(HttpRequest::get(url)).await?;
        let exists = match response.status {
            200..=299 => true,
            404 => false,
            status => {
                return Err(VectorStoreError::Http {
                    status,
                    body: redact_for_log(&response.body, 500),
                });
            }
        };

        if !exists {
            info!("Collection {} does not exist", self.config.class_name);
        }
        self.store(EXISTS_KEY, &exists, self.config.existence_ttl(), &[])
            .await;
        Ok(exists)
    }

    /// Nearest-neighbour search.
    ///
    /// Returns nothing without querying if the collection is missing.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        let query = NearVectorQuery {
            class_name: &self.config.class_name,
            vector,
            limit,
            certainty: self.config.certainty,
            filter,
            content_field: &self.config.content_field,
            fields: &self.config.fields,
        };
        // Render first so malformed filters fail before any I/O.
        let graphql = query.to_graphql()?;

        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = self.search_key(&query)?;
        if let Some(results) = self.cached::<Vec<SearchResult>>(&key).await {
            debug!("Search cache hit ({} results)", results.len());
            return Ok(results);
        }

        if !self.collection_exists().await? {
            return Ok(Vec::new());
        }

        let rows = self.graphql(&graphql, "Get").await?;
        let results: Vec<SearchResult> = rows
            .iter()
            .map(|row| to_search_result(row, &self.config.content_field, &self.config.fields))
            .collect();
        debug!("Search returned {} results", results.len());

        self.store(&key, &results, self.config.search_ttl(), &[])
            .await;
        Ok(results)
    }

    /// Document counts per distinct value of `field`, largest first.
    pub async fn grouped_stats(&self, field: &str) -> Result<Vec<GroupCount>> {
        validate_field(field)?;
        let key = stats_key(field);
        if let Some(stats) = self.cached::<Vec<GroupCount>>(&key).await {
            return Ok(stats);
        }

        if !self.collection_exists().await? {
            return Ok(Vec::new());
        }

        let stats = self.group_counts(field).await?;
        self.store(&key, &stats, self.config.stats_ttl(), &[STATS_TAG])
            .await;
        Ok(stats)
    }

    /// Every member with their document count and representative details.
    ///
    /// Members whose detail lookup fails are left out.
    pub async fn list_members(&self) -> Result<Vec<MemberSummary>> {
        if let Some(members) = self.cached::<Vec<MemberSummary>>(MEMBERS_KEY).await {
            return Ok(members);
        }

        if !self.collection_exists().await? {
            return Ok(Vec::new());
        }

        let groups = self.group_counts(&self.config.member_field).await?;
        let mut members = Vec::with_capacity(groups.len());
        for group in groups {
            match self.member_details(&group.value).await {
                Ok(details) => members.push(MemberSummary {
                    name: group.value,
                    document_count: group.count,
                    details,
                }),
                Err(e) => warn!("Skipping member {}: {e}", group.value),
            }
        }
        members.sort_by(|a, b| a.name.cmp(&b.name));

        self.store(MEMBERS_KEY, &members, self.config.members_ttl(), &[])
            .await;
        Ok(members)
    }

    /// Forget whether the collection exists.
    pub async fn invalidate_existence(&self) -> Result<()> {
        self.cache.delete(EXISTS_KEY).await?;
        Ok(())
    }

    /// Forget the member list.
    pub async fn invalidate_members(&self) -> Result<()> {
        self.cache.delete(MEMBERS_KEY).await?;
        Ok(())
    }

    /// Forget the statistics for `field`.
    pub async fn invalidate_stats(&self, field: &str) -> Result<()> {
        self.cache.delete(&stats_key(field)).await?;
        Ok(())
    }

    /// Forget all statistics. Needs a cache backend with tag support.
    pub async fn invalidate_all_stats(&self) -> Result<usize> {
        Ok(self.cache.invalidate_tag(STATS_TAG).await?)
    }

    async fn group_counts(&self, field: &str) -> Result<Vec<GroupCount>> {
        let query = group_by_query(&self.config.class_name, field)?;
        let rows = self.graphql(&query, "Aggregate").await?;
        let mut counts: Vec<GroupCount> = rows.iter().filter_map(to_group_count).collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
        Ok(counts)
    }

    async fn member_details(
        &self,
        member: &str,
    ) -> Result<BTreeMap<String, Value>> {
        let query = representative_query(
            &self.config.class_name,
            &self.config.member_field,
            member,
            &self.config.member_detail_fields,
        )?;
        let rows = self.graphql(&query, "Get").await?;
        let row = rows.first().ok_or_else(|| {
            VectorStoreError::InvalidResponse(format!("no document for member {member}"))
        })?;
        Ok(self
            .config
            .member_detail_fields
            .iter()
            .filter_map(|field| match row.get(field) {
                None | Some(Value::Null) => None,
                Some(value) => Some((field.clone(), value.clone())),
            })
            .collect())
    }

    async fn graphql(&self, query: &str, operation: &str) -> Result<Vec<Value>> {
        let url = format!("{}/v1/graphql", self.base_url());
        let request = HttpRequest::post_json(url, &graphql_body(query));
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(VectorStoreError::Http {
                status: response.status,
                body: redact_for_log(&response.body, 500),
            });
        }
        extract_rows(&response.body, operation, &self.config.class_name)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = request.with_timeout(self.config.timeout());
        Ok(self.transport.send(request).await?)
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn search_key(&self, query: &NearVectorQuery<'_>) -> Result<String> {
        let key = SearchKey {
            class_name: query.class_name,
            vector: query.vector,
            limit: query.limit,
            certainty: query.certainty,
            filter: query.filter,
            fields: query.fields,
        };
        let encoded = serde_json::to_vec(&key)?;
        let digest = Sha256::digest(&encoded);
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok(format!("{SEARCH_PREFIX}{hex}"))
    }

    async fn cached<T: DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        match self.cache.get_json::<T>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache read for {key} failed: {e}");
                None
            }
        }
    }

    async fn store<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration, tags: &[&str]) {
        if let Err(e) = self.cache.set_json(key, value, ttl, tags).await {
            warn!("Cache write for {key} failed: {e}");
        }
    }
}
