//! Prompt assembly.

use ragbridge_vector_store::SearchResult;

use crate::config::PromptConfig;
use crate::conversation::ConversationTurn;

const NO_CONTEXT: &str = "(no relevant documents were found)";

/// Render search results as numbered context blocks, in relevance order,
/// each document cut to `max_chars` characters.
pub fn format_context(results: &[SearchResult], max_chars: usize) -> Vec<String> {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let mut header = format!("[{}]", i + 1);
            if let Some(title) = result.field_str("title") {
                header.push(' ');
                header.push_str(title);
            }

            let attribution: Vec<&str> = ["member", "party", "date"]
                .iter()
                .filter_map(|field| result.field_str(field))
                .collect();
            if !attribution.is_empty() {
                header.push_str(" (");
                header.push_str(&attribution.join(", "));
                header.push(')');
            }

            format!("{header}\n{}", truncate_chars(result.content.trim(), max_chars))
        })
        .collect()
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    cut
}

/// Assemble the full prompt: instructions, context, the most recent
/// `history_turns` turns, then the question.
pub fn build_prompt(
    config: &PromptConfig,
    context: &[String],
    history: &[ConversationTurn],
    question: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(config.system_prompt.trim());
    prompt.push_str("\n\nContext:\n");
    if context.is_empty() {
        prompt.push_str(NO_CONTEXT);
    } else {
        prompt.push_str(&context.join("\n\n"));
    }

    let recent = &history[history.len().saturating_sub(config.history_turns)..];
    if !recent.is_empty() {
        prompt.push_str("\n\nPrevious conversation:");
        for turn in recent {
            prompt.push_str("\nUser: ");
            prompt.push_str(turn.question.trim());
            prompt.push_str("\nAssistant: ");
            prompt.push_str(turn.answer.trim());
        }
    }

    prompt.push_str("\n\n");
    prompt.push_str(&config.question_marker);
    prompt.push(' ');
    prompt.push_str(question);
    prompt.push_str("\nAnswer:");
    prompt
}
