//! GraphQL query construction and response decoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VectorStoreError};
use crate::filter::{SearchFilter, validate_field};

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Object id in the database.
    pub id: Option<String>,

    /// Document text.
    pub content: String,

    /// Identity properties (title, member, date, ...), absent ones omitted.
    pub fields: BTreeMap<String, Value>,

    pub certainty: Option<f64>,

    pub distance: Option<f64>,
}

impl SearchResult {
    /// A text property, if present.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Document count for one value of a grouped property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub value: String,
    pub count: u64,
}

/// A member with document count and representative details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub name: String,
    pub document_count: u64,
    pub details: BTreeMap<String, Value>,
}

/// Parameters of a nearest-neighbour query.
#[derive(Debug, Clone, Copy)]
pub struct NearVectorQuery<'a> {
    pub class_name: &'a str,
    pub vector: &'a [f32],
    pub limit: usize,
    pub certainty: f64,
    pub filter: Option<&'a SearchFilter>,
    pub content_field: &'a str,
    pub fields: &'a [String],
}

impl NearVectorQuery<'_> {
    pub fn to_graphql(&self) -> Result<String> {
        validate_field(self.class_name)?;
        if self.vector.is_empty() {
            return Err(VectorStoreError::Validation("empty query vector".to_string()));
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err(VectorStoreError::Validation(
                "query vector contains non-finite values".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.certainty) {
            return Err(VectorStoreError::Validation(format!(
                "certainty {} outside 0..=1",
                self.certainty
            )));
        }

        let vector = serde_json::to_string(self.vector)?;
        let certainty = serde_json::to_string(&self.certainty)?;
        let mut arguments = format!(
            "nearVector: {{vector: {vector}, certainty: {certainty}}}, limit: {}",
            self.limit
        );
        if let Some(filter) = self.filter {
            arguments.push_str(", where: ");
            arguments.push_str(&filter.to_graphql()?);
        }

        let selection = selection(self.content_field, self.fields)?;
        Ok(format!(
            "{{ Get {{ {}({arguments}) {{ {selection} _additional {{ id certainty distance }} }} }} }}",
            self.class_name
        ))
    }
}

fn selection(content_field: &str, fields: &[String]) -> Result<String> {
    validate_field(content_field)?;
    let mut names = vec![content_field];
    for field in fields {
        validate_field(field)?;
        if !names.contains(&field.as_str()) {
            names.push(field.as_str());
        }
    }
    Ok(names.join(" "))
}

/// Aggregate document counts grouped by `field`.
pub fn group_by_query(class_name: &str, field: &str) -> Result<String> {
    validate_field(class_name)?;
    validate_field(field)?;
    Ok(format!(
        "{{ Aggregate {{ {class_name}(groupBy: [\"{field}\"]) {{ groupedBy {{ value }} meta {{ count }} }} }} }}"
    ))
}

/// Fetch one document whose `field` equals `value`.
pub fn representative_query(
    class_name: &str,
    field: &str,
    value: &str,
    fields: &[String],
) -> Result<String> {
    validate_field(class_name)?;
    let filter = SearchFilter::equal(field, value).to_graphql()?;
    let selection = selection(field, fields)?;
    Ok(format!(
        "{{ Get {{ {class_name}(limit: 1, where: {filter}) {{ {selection} }} }} }}"
    ))
}

/// The JSON body posted to the GraphQL endpoint.
pub fn graphql_body(query: &str) -> Value {
    serde_json::json!({ "query": query })
}

#[derive(Debug, Deserialize)]
struct GraphqlReply {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Decode a GraphQL reply and return `data.<operation>.<class_name>`.
pub fn extract_rows(body: &str, operation: &str, class_name: &str) -> Result<Vec<Value>> {
    let reply: GraphqlReply = serde_json::from_str(body)
        .map_err(|e| VectorStoreError::InvalidResponse(format!("not a GraphQL reply: {e}")))?;

    if let Some(errors) = reply.errors.filter(|errors| !errors.is_empty()) {
        let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
        return Err(VectorStoreError::Query(messages.join("; ")));
    }

    let rows = reply
        .data
        .as_ref()
        .and_then(|data| data.get(operation))
        .and_then(|op| op.get(class_name))
        .ok_or_else(|| {
            VectorStoreError::InvalidResponse(format!("missing data.{operation}.{class_name}"))
        })?;

    match rows {
        Value::Array(rows) => Ok(rows.clone()),
        Value::Null => Ok(Vec::new()),
        other => Err(VectorStoreError::InvalidResponse(format!(
            "expected a list of rows, got {other}"
        ))),
    }
}

/// Normalize one `Get` row into a [`SearchResult`].
pub fn to_search_result(row: &Value, content_field: &str, fields: &[String]) -> SearchResult {
    let additional = row.get("_additional");
    let content = match row.get(content_field) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let fields = fields
        .iter()
        .filter(|name| name.as_str() != content_field)
        .filter_map(|name| match row.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => Some((name.clone(), value.clone())),
        })
        .collect();

    SearchResult {
        id: additional
            .and_then(|a| a.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        content,
        fields,
        certainty: additional.and_then(|a| a.get("certainty")).and_then(Value::as_f64),
        distance: additional.and_then(|a| a.get("distance")).and_then(Value::as_f64),
    }
}

/// Decode one `Aggregate ... groupBy` row.
pub fn to_group_count(row: &Value) -> Option<GroupCount> {
    let value = match row.get("groupedBy")?.get("value")? {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    let count = row.get("meta")?.get("count")?.as_u64()?;
    Some(GroupCount { value, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_near_vector_query() {
        let filter = SearchFilter::equal("party", "Green");
        let fields = vec!["title".to_string(), "content".to_string()];
        let query = NearVectorQuery {
            class_name: "Document",
            vector: &[0.5, -1.0],
            limit: 3,
            certainty: 0.75,
            filter: Some(&filter),
            content_field: "content",
            fields: &fields,
        };
        assert_eq!(
            query.to_graphql().unwrap(),
            concat!(
                r#"{ Get { Document(nearVector: {vector: [0.5,-1.0], certainty: 0.75}, limit: 3, "#,
                r#"where: {path: ["party"], operator: Equal, valueText: "Green"}) "#,
                r#"{ content title _additional { id certainty distance } } } }"#
            )
        );
    }

    #[test]
    fn test_near_vector_rejects_bad_input() {
        let base = NearVectorQuery {
            class_name: "Document",
            vector: &[0.1],
            limit: 3,
            certainty: 0.7,
            filter: None,
            content_field: "content",
            fields: &[],
        };
        assert!(base.to_graphql().is_ok());
        assert!(NearVectorQuery { vector: &[], ..base }.to_graphql().is_err());
        assert!(NearVectorQuery { vector: &[f32::NAN], ..base }.to_graphql().is_err());
        assert!(NearVectorQuery { certainty: 1.5, ..base }.to_graphql().is_err());
        assert!(NearVectorQuery { class_name: "Doc ument", ..base }.to_graphql().is_err());
    }

    #[test]
    fn test_group_by_query() {
        assert_eq!(
            group_by_query("Document", "member").unwrap(),
            r#"{ Aggregate { Document(groupBy: ["member"]) { groupedBy { value } meta { count } } } }"#
        );
        assert!(group_by_query("Document", "member}").is_err());
    }

    #[test]
    fn test_extract_rows_and_errors() {
        let body = json!({"data": {"Get": {"Document": [{"content": "a"}]}}}).to_string();
        assert_eq!(extract_rows(&body, "Get", "Document").unwrap().len(), 1);

        let body = json!({"data": {"Get": {"Document": null}}}).to_string();
        assert!(extract_rows(&body, "Get", "Document").unwrap().is_empty());

        let body = json!({"errors": [{"message": "no such class"}]}).to_string();
        let err = extract_rows(&body, "Get", "Document").unwrap_err();
        assert!(matches!(err, VectorStoreError::Query(ref m) if m == "no such class"));

        assert!(matches!(
            extract_rows("<html>", "Get", "Document").unwrap_err(),
            VectorStoreError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_to_search_result() {
        let row = json!({
            "content": "We will build more homes.",
            "title": "Housing debate",
            "member": "Jane Doe",
            "date": null,
            "_additional": {"id": "abc", "certainty": 0.91, "distance": 0.18}
        });
        let fields = vec!["title".to_string(), "member".to_string(), "date".to_string()];
        let result = to_search_result(&row, "content", &fields);

        assert_eq!(result.id.as_deref(), Some("abc"));
        assert_eq!(result.content, "We will build more homes.");
        assert_eq!(result.field_str("member"), Some("Jane Doe"));
        assert!(!result.fields.contains_key("date"));
        assert_eq!(result.certainty, Some(0.91));
    }

    #[test]
    fn test_to_group_count() {
        let row = json!({"groupedBy": {"value": "Jane Doe"}, "meta": {"count": 12}});
        assert_eq!(
            to_group_count(&row),
            Some(GroupCount {
                value: "Jane Doe".to_string(),
                count: 12
            })
        );
        assert_eq!(to_group_count(&json!({"meta": {"count": 1}})), None);
    }
}
