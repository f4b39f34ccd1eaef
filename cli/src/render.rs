//! Plain-text rendering of command results.

use std::fmt::Write as _;

use ragbridge_bridge::{HealthReport, HealthStatus};
use ragbridge_rag::{Answer, ModelDetails, ModelInfo, Source};
use serde_json::Value;

const SOURCE_FIELDS: [&str; 4] = ["title", "member", "party", "date"];

/// The numbered source list printed under an answer.
pub fn sources(sources: &[Source]) -> String {
    let mut out = String::new();
    if sources.is_empty() {
        return out;
    }
    out.push_str("\nSources:\n");
    for (i, source) in sources.iter().enumerate() {
        let label = SOURCE_FIELDS
            .iter()
            .filter_map(|field| source.fields.get(*field).and_then(Value::as_str))
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        let label = if label.is_empty() {
            source.id.clone().unwrap_or_else(|| "untitled".to_string())
        } else {
            label
        };
        let _ = write!(out, "  [{}] {label}", i + 1);
        if let Some(certainty) = source.certainty {
            let _ = write!(out, " ({certainty:.2})");
        }
        out.push('\n');
    }
    out
}

/// Footer with model, timing and conversation id.
pub fn footer(answer: &Answer) -> String {
    let mut out = format!(
        "\n{} | {} ms | {} prompt + {} completion tokens",
        answer.model,
        answer.timing_ms,
        answer.usage.prompt_tokens,
        answer.usage.completion_tokens
    );
    if answer.cache_hit {
        out.push_str(" | cached");
    }
    let _ = write!(out, "\nconversation: {}\n", answer.conversation_id);
    out
}

pub fn answer(answer: &Answer) -> String {
    format!(
        "{}\n{}{}",
        answer.answer.trim_end(),
        sources(&answer.sources),
        footer(answer)
    )
}

pub fn health(report: &HealthReport) -> String {
    let mut out = format!("overall: {}\n", status_label(report.status));
    for component in &report.components {
        let _ = write!(
            out,
            "  {:<14} {:<8} {}",
            component.name,
            status_label(component.status),
            component.message
        );
        if let Some(latency) = component.latency_ms {
            let _ = write!(out, " ({latency} ms)");
        }
        out.push('\n');
    }
    out
}

pub fn models(models: &[ModelInfo]) -> String {
    if models.is_empty() {
        return "No models are installed.\n".to_string();
    }
    let mut out = String::new();
    for model in models {
        let _ = write!(out, "{:<32}", model.name);
        for detail in [&model.parameter_size, &model.quantization_level, &model.family]
            .into_iter()
            .flatten()
        {
            let _ = write!(out, " {detail}");
        }
        out.push('\n');
    }
    out
}

pub fn model_details(details: &ModelDetails) -> String {
    let mut out = format!("{}\n", details.name);
    let rows = [
        ("family", details.family.clone()),
        ("parameters", details.parameter_size.clone()),
        ("quantization", details.quantization_level.clone()),
        ("context", details.context_length.map(|n| n.to_string())),
    ];
    for (label, value) in rows {
        if let Some(value) = value {
            let _ = writeln!(out, "  {label:<13} {value}");
        }
    }
    out
}

fn status_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => "ok",
        HealthStatus::Warning => "warning",
        HealthStatus::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ragbridge_bridge::ComponentHealth;
    use ragbridge_rag::TokenUsage;
    use serde_json::json;

    fn source(fields: serde_json::Value, certainty: Option<f64>) -> Source {
        Source {
            id: Some("doc-1".to_string()),
            fields: serde_json::from_value(fields).unwrap(),
            certainty,
            distance: None,
            excerpt: String::new(),
        }
    }

    #[test]
    fn test_answer_layout() {
        let answer = Answer {
            answer: "Member X supports public housing [1].\n".to_string(),
            sources: vec![
                source(
                    json!({"title": "Housing debate", "member": "Member X", "party": ""}),
                    Some(0.913),
                ),
                source(json!({}), None),
            ],
            model: "llama3.1:8b".to_string(),
            conversation_id: "c-1".to_string(),
            usage: TokenUsage {
                prompt_tokens: 120,
                completion_tokens: 9,
                ..TokenUsage::default()
            },
            timing_ms: 42,
            cache_hit: true,
        };

        assert_eq!(
            super::answer(&answer),
            "Member X supports public housing [1].\n\
             \nSources:\n  [1] Housing debate, Member X (0.91)\n  [2] doc-1\n\
             \nllama3.1:8b | 42 ms | 120 prompt + 9 completion tokens | cached\
             \nconversation: c-1\n"
        );
    }

    #[test]
    fn test_health_lists_components() {
        let report = HealthReport::from_components(vec![
            ComponentHealth::ok("bridge", "connected", 12),
            ComponentHealth::error("vector_store", "HTTP 503", None),
        ]);
        let text = health(&report);
        assert!(text.starts_with("overall: error\n"), "{text}");
        assert!(text.contains("bridge         ok       connected (12 ms)"), "{text}");
        assert!(text.contains("vector_store   error    HTTP 503\n"), "{text}");
    }

    #[test]
    fn test_empty_model_list() {
        assert_eq!(models(&[]), "No models are installed.\n");
    }
}
