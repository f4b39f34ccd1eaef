//! Context-window sizing and prompt fitting.

/// Window used for models missing from [`CONTEXT_WINDOWS`].
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Known context windows by model family, matched on the name before the
/// tag (`llama3.1:8b` is looked up as `llama3.1`). Longest prefix wins.
pub const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("llama2", 4096),
    ("llama3", 8192),
    ("llama3.1", 131_072),
    ("llama3.2", 131_072),
    ("llama3.3", 131_072),
    ("mistral", 32_768),
    ("mixtral", 32_768),
    ("gemma", 8192),
    ("gemma2", 8192),
    ("phi3", 4096),
    ("qwen2", 32_768),
    ("qwen2.5", 32_768),
    ("codellama", 16_384),
];

const TRUNCATION_NOTICE: &str = "\n\n[Context truncated to fit the model's context window.]\n\n";

/// Context window of `model` in tokens.
pub fn context_window(model: &str) -> usize {
    let family = model.split(':').next().unwrap_or(model).to_ascii_lowercase();
    CONTEXT_WINDOWS
        .iter()
        .filter(|(prefix, _)| family.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map_or(DEFAULT_CONTEXT_WINDOW, |(_, window)| *window)
}

/// Character-based token estimate, rounded up.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

/// Limits for [`fit_prompt`].
#[derive(Debug, Clone, Copy)]
pub struct WindowBudget {
    pub window: usize,
    pub reserved: usize,
    pub margin: usize,
    pub chars_per_token: usize,
}

impl WindowBudget {
    /// Tokens available to the prompt.
    pub fn prompt_tokens(&self) -> usize {
        self.window
            .saturating_sub(self.reserved)
            .saturating_sub(self.margin)
    }
}

/// Result of fitting a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FittedPrompt {
    pub prompt: String,
    pub estimated_tokens: usize,
    pub budget: usize,
    pub truncated: bool,
}

/// Shrink `prompt` to the budget by cutting the end of everything before
/// the question.
///
/// The prompt is split right before `marker` followed by `question`; that
/// tail is kept verbatim even when it alone exceeds the budget. Without the
/// marker, only the trailing part of the prompt is kept.
pub fn fit_prompt(prompt: &str, question: &str, marker: &str, budget: WindowBudget) -> FittedPrompt {
    let limit = budget.prompt_tokens();
    let estimated = estimate_tokens(prompt, budget.chars_per_token);
    if estimated <= limit {
        return FittedPrompt {
            prompt: prompt.to_string(),
            estimated_tokens: estimated,
            budget: limit,
            truncated: false,
        };
    }

    let split = prompt
        .rfind(&format!("{marker} {question}"))
        .or_else(|| prompt.rfind(marker));
    let max_chars = limit.saturating_mul(budget.chars_per_token.max(1));
    let notice_chars = TRUNCATION_NOTICE.chars().count();

    let fitted = match split {
        Some(at) => {
            let (head, tail) = prompt.split_at(at);
            let keep = max_chars
                .saturating_sub(tail.chars().count())
                .saturating_sub(notice_chars);
            let head: String = head.chars().take(keep).collect();
            format!("{}{TRUNCATION_NOTICE}{tail}", head.trim_end())
        }
        None => {
            let total = prompt.chars().count();
            let keep = max_chars.saturating_sub(notice_chars.saturating_sub(2));
            let tail: String = prompt.chars().skip(total.saturating_sub(keep)).collect();
            format!("{}{tail}", TRUNCATION_NOTICE.trim_start())
        }
    };

    FittedPrompt {
        estimated_tokens: estimate_tokens(&fitted, budget.chars_per_token),
        prompt: fitted,
        budget: limit,
        truncated: true,
    }
}
