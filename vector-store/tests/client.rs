#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use pretty_assertions::assert_eq;
use ragbridge_bridge::testing::ScriptedTransport;
use ragbridge_bridge::{HttpRequest, HttpResponse};
use ragbridge_store::MemoryCache;
use ragbridge_vector_store::{
    GroupCount, SearchFilter, VectorStoreClient, VectorStoreConfig, VectorStoreError,
};
use serde_json::{Value, json};

fn graphql_query(request: &HttpRequest) -> String {
    let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    body["query"].as_str().unwrap().to_string()
}

/// Simulates a database with two members; details for "Broken Record" fail.
fn database(collection_exists: bool) -> ScriptedTransport {
    ScriptedTransport::new(move |request| {
        if request.url.ends_with("/v1/schema/Document") {
            return Ok(if collection_exists {
                HttpResponse::new(200, r#"{"class":"Document"}"#)
            } else {
                HttpResponse::new(404, "")
            });
        }

        assert!(request.url.ends_with("/v1/graphql"), "{}", request.url);
        let query = graphql_query(request);

        let body = if query.contains("Aggregate") {
            json!({"data": {"Aggregate": {"Document": [
                {"groupedBy": {"value": "Jane Doe"}, "meta": {"count": 4}},
                {"groupedBy": {"value": "Broken Record"}, "meta": {"count": 9}},
                {"groupedBy": {"value": "Ann Lee"}, "meta": {"count": 4}},
            ]}}})
        } else if query.contains("limit: 1,") {
            if query.contains("Broken Record") {
                json!({"errors": [{"message": "shard unavailable"}]})
            } else {
                json!({"data": {"Get": {"Document": [
                    {"member": "x", "party": "Green", "constituency": "North"}
                ]}}})
            }
        } else {
            json!({"data": {"Get": {"Document": [
                {
                    "content": "Housing is a priority.",
                    "title": "Debate",
                    "member": "Jane Doe",
                    "_additional": {"id": "1", "certainty": 0.9, "distance": 0.2}
                }
            ]}}})
        };
        Ok(HttpResponse::new(200, body.to_string()))
    })
}

fn client(transport: &ScriptedTransport) -> VectorStoreClient {
    VectorStoreClient::new(
        VectorStoreConfig::default().with_base_url("http://vectors:8080/"),
        Arc::new(transport.clone()),
        Arc::new(MemoryCache::default()),
    )
}

#[tokio::test]
async fn test_repeated_search_is_served_from_cache() {
    let transport = database(true);
    let client = client(&transport);
    let filter = SearchFilter::equal("member", "Jane Doe");

    let first = client.search(&[0.1, 0.2], 5, Some(&filter)).await.unwrap();
    let second = client.search(&[0.1, 0.2], 5, Some(&filter)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].content, "Housing is a priority.");
    assert_eq!(transport.count("/v1/graphql"), 1);

    // Any change in parameters is a new query.
    client.search(&[0.1, 0.2], 6, Some(&filter)).await.unwrap();
    client.search(&[0.1, 0.3], 5, Some(&filter)).await.unwrap();
    client.search(&[0.1, 0.2], 5, None).await.unwrap();
    client
        .search(&[0.1, 0.2], 5, Some(&SearchFilter::equal("member", "Ann Lee")))
        .await
        .unwrap();
    assert_eq!(transport.count("/v1/graphql"), 5);

    // Existence was checked once and cached.
    assert_eq!(transport.count("/v1/schema/Document"), 1);
}

#[tokio::test]
async fn test_search_without_collection_is_empty() {
    let transport = database(false);
    let client = client(&transport);
    let results = client.search(&[0.1], 5, None).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(transport.count("/v1/graphql"), 0);
    assert!(!client.collection_exists().await.unwrap());
}

#[tokio::test]
async fn test_invalid_filter_fails_before_any_request() {
    let transport = database(true);
    let client = client(&transport);
    let err = client
        .search(&[0.1], 5, Some(&SearchFilter::equal("member name", "x")))
        .await
        .unwrap_err();
    assert!(matches!(err, VectorStoreError::Validation(_)), "{err:?}");
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_list_members_skips_failed_details() {
    let transport = database(true);
    let client = client(&transport);

    let members = client.list_members().await.unwrap();
    let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Ann Lee", "Jane Doe"]);
    assert_eq!(members[1].document_count, 4);
    assert_eq!(members[1].details["party"], json!("Green"));

    let before = transport.requests().len();
    client.list_members().await.unwrap();
    assert_eq!(transport.requests().len(), before);

    client.invalidate_members().await.unwrap();
    client.list_members().await.unwrap();
    assert!(transport.requests().len() > before);
}

#[tokio::test]
async fn test_grouped_stats_and_invalidation() {
    let transport = database(true);
    let client = client(&transport);

    let stats = client.grouped_stats("party").await.unwrap();
    assert_eq!(
        stats[0],
        GroupCount {
            value: "Broken Record".to_string(),
            count: 9
        }
    );
    // Ties are ordered by value.
    assert_eq!(stats[1].value, "Ann Lee");

    client.grouped_stats("party").await.unwrap();
    assert_eq!(transport.count("/v1/graphql"), 1);

    client.invalidate_stats("party").await.unwrap();
    client.grouped_stats("party").await.unwrap();
    assert_eq!(transport.count("/v1/graphql"), 2);

    assert_eq!(client.invalidate_all_stats().await.unwrap(), 1);
    client.grouped_stats("party").await.unwrap();
    assert_eq!(transport.count("/v1/graphql"), 3);
}

#[tokio::test]
async fn test_existence_invalidation() {
    let transport = database(true);
    let client = client(&transport);
    assert!(client.collection_exists().await.unwrap());
    assert!(client.collection_exists().await.unwrap());
    assert_eq!(transport.count("/v1/schema"), 1);

    client.invalidate_existence().await.unwrap();
    assert!(client.collection_exists().await.unwrap());
    assert_eq!(transport.count("/v1/schema"), 2);
}

#[tokio::test]
async fn test_query_errors_surface() {
    let transport = ScriptedTransport::new(|request| {
        if request.url.contains("/v1/schema/") {
            Ok(HttpResponse::new(200, "{}"))
        } else {
            Ok(HttpResponse::new(200, r#"{"errors":[{"message":"bad vector length"}]}"#))
        }
    });
    let client = client(&transport);
    let err = client.search(&[0.1], 5, None).await.unwrap_err();
    assert!(matches!(err, VectorStoreError::Query(ref m) if m == "bad vector length"), "{err:?}");
}

#[tokio::test]
async fn test_http_error_on_schema_check() {
    let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(503, "down")));
    let client = client(&transport);
    let err = client.collection_exists().await.unwrap_err();
    assert!(matches!(err, VectorStoreError::Http { status: 503, .. }), "{err:?}");
}
