//! Structured search filters.
//!
//! A [`SearchFilter`] is a tree of predicates combined with AND/OR. It is
//! rendered into the vector database's GraphQL `where` argument; field names
//! are validated as identifiers and every value is emitted as a typed,
//! escaped literal, so user input never reaches the query as raw text.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VectorStoreError};

/// A literal compared against a document property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Boolean(bool),
    Int(i64),
    Number(f64),
    Text(String),
}

impl FilterValue {
    /// The GraphQL value key for this type.
    fn value_key(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "valueBoolean",
            Self::Int(_) => "valueInt",
            Self::Number(_) => "valueNumber",
            Self::Text(_) => "valueText",
        }
    }

    fn render(&self) -> Result<String> {
        match self {
            Self::Boolean(b) => Ok(b.to_string()),
            Self::Int(i) => Ok(i.to_string()),
            Self::Number(n) if n.is_finite() => Ok(serde_json::to_string(n)?),
            Self::Number(n) => Err(VectorStoreError::Validation(format!(
                "non-finite number {n} in filter"
            ))),
            Self::Text(s) => Ok(serde_json::to_string(s)?),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Comparison applied to one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equal(FilterValue),
    /// Wildcard text match (`*` and `?`).
    Like(String),
    /// Inclusive bounds; at least one must be set.
    Range {
        min: Option<FilterValue>,
        max: Option<FilterValue>,
    },
    ContainsAny(Vec<FilterValue>),
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchFilter {
    And(Vec<SearchFilter>),
    Or(Vec<SearchFilter>),
    Predicate {
        field: String,
        operator: FilterOperator,
    },
}

impl SearchFilter {
    pub fn equal(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Predicate {
            field: field.into(),
            operator: FilterOperator::Equal(value.into()),
        }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Predicate {
            field: field.into(),
            operator: FilterOperator::Like(pattern.into()),
        }
    }

    pub fn range(
        field: impl Into<String>,
        min: Option<FilterValue>,
        max: Option<FilterValue>,
    ) -> Self {
        Self::Predicate {
            field: field.into(),
            operator: FilterOperator::Range { min, max },
        }
    }

    pub fn contains_any<V: Into<FilterValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::Predicate {
            field: field.into(),
            operator: FilterOperator::ContainsAny(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn and(filters: impl IntoIterator<Item = SearchFilter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = SearchFilter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    /// Render as a GraphQL `where` argument value.
    pub fn to_graphql(&self) -> Result<String> {
        match self {
            Self::And(children) => render_group("And", children),
            Self::Or(children) => render_group("Or", children),
            Self::Predicate { field, operator } => render_predicate(field, operator),
        }
    }
}

fn render_group(operator: &str, children: &[SearchFilter]) -> Result<String> {
    match children {
        [] => Err(VectorStoreError::Validation(format!(
            "{operator} filter needs at least one operand"
        ))),
        [only] => only.to_graphql(),
        _ => {
            let operands = children
                .iter()
                .map(SearchFilter::to_graphql)
                .collect::<Result<Vec<_>>>()?;
            Ok(format!(
                "{{operator: {operator}, operands: [{}]}}",
                operands.join(", ")
            ))
        }
    }
}

fn render_predicate(field: &str, operator: &FilterOperator) -> Result<String> {
    validate_field(field)?;

    match operator {
        FilterOperator::Equal(value) => typed_comparison(field, "Equal", value),
        FilterOperator::Like(pattern) => Ok(comparison(
            field,
            "Like",
            "valueText",
            &serde_json::to_string(pattern)?,
        )),
        FilterOperator::Range { min, max } => {
            let lower = min
                .as_ref()
                .map(|v| typed_comparison(field, "GreaterThanEqual", v))
                .transpose()?;
            let upper = max
                .as_ref()
                .map(|v| typed_comparison(field, "LessThanEqual", v))
                .transpose()?;
            match (lower, upper) {
                (Some(lower), Some(upper)) => {
                    Ok(format!("{{operator: And, operands: [{lower}, {upper}]}}"))
                }
                (Some(bound), None) | (None, Some(bound)) => Ok(bound),
                (None, None) => Err(VectorStoreError::Validation(format!(
                    "range filter on {field} has no bounds"
                ))),
            }
        }
        FilterOperator::ContainsAny(values) => {
            let Some(first) = values.first() else {
                return Err(VectorStoreError::Validation(format!(
                    "containsAny filter on {field} has no values"
                )));
            };
            let key = first.value_key();
            if values.iter().any(|v| v.value_key() != key) {
                return Err(VectorStoreError::Validation(format!(
                    "containsAny filter on {field} mixes value types"
                )));
            }
            let rendered = values
                .iter()
                .map(FilterValue::render)
                .collect::<Result<Vec<_>>>()?;
            Ok(comparison(
                field,
                "ContainsAny",
                key,
                &format!("[{}]", rendered.join(", ")),
            ))
        }
    }
}

fn typed_comparison(field: &str, operator: &str, value: &FilterValue) -> Result<String> {
    Ok(comparison(field, operator, value.value_key(), &value.render()?))
}

fn comparison(field: &str, operator: &str, value_key: &str, literal: &str) -> String {
    format!("{{path: [\"{field}\"], operator: {operator}, {value_key}: {literal}}}")
}

/// Property names must be plain identifiers.
pub fn validate_field(field: &str) -> Result<()> {
    let mut chars = field.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(VectorStoreError::Validation(format!(
            "invalid field name {field:?}"
        )))
    }
}
