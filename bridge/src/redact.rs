//! Masking of credential-like substrings before anything reaches a log line.

use std::sync::LazyLock;

use regex_lite::Regex;

const MASK: &str = "***";

#[allow(clippy::unwrap_used)]
static HEADER_SECRETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)((?:authorization|x-api-key|api-key|cookie)\s*:\s*)(?:bearer\s+|basic\s+)?[^'\s]+").unwrap()
});

#[allow(clippy::unwrap_used)]
static BEARER_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+").unwrap()
});

#[allow(clippy::unwrap_used)]
static KEY_VALUE_SECRETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:api[_-]?key|access[_-]?token|token|secret|password|passwd)["']?\s*[=:]\s*["']?)[^"'&\s,}]+"#)
        .unwrap()
});

/// Replace credential-like substrings in `text` with `***`.
pub fn redact(text: &str) -> String {
    let text = HEADER_SECRETS.replace_all(text, format!("${{1}}{MASK}").as_str());
    let text = BEARER_TOKENS.replace_all(&text, format!("${{1}}{MASK}").as_str());
    KEY_VALUE_SECRETS
        .replace_all(&text, format!("${{1}}{MASK}").as_str())
        .into_owned()
}

/// Redact and shorten `text` to at most `max_chars` characters for logging.
pub fn redact_for_log(text: &str, max_chars: usize) -> String {
    let redacted = redact(text);
    if redacted.chars().count() <= max_chars {
        return redacted;
    }
    let mut short: String = redacted.chars().take(max_chars).collect();
    short.push_str("...");
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_authorization_header() {
        let cmd = "curl -H 'Authorization: Bearer abc.def-123' https://svc/v1";
        let out = redact(cmd);
        assert!(!out.contains("abc.def-123"), "{out}");
        assert!(out.contains("Authorization: ***"));
    }

    #[test]
    fn test_masks_key_value_pairs() {
        let out = redact("url?api_key=s3cr3t&x=1 password=hunter2");
        assert!(!out.contains("s3cr3t"));
        assert!(!out.contains("hunter2"));
        assert!(out.contains("x=1"));
    }

    #[test]
    fn test_masks_json_style_tokens() {
        let out = redact(r#"{"token": "zzz-999", "model": "llama3"}"#);
        assert!(!out.contains("zzz-999"));
        assert!(out.contains("llama3"));
    }

    #[test]
    fn test_leaves_plain_text_alone() {
        let text = "echo hello world";
        assert_eq!(redact(text), text);
    }

    #[test]
    fn test_redact_for_log_truncates() {
        let text = "a".repeat(50);
        let out = redact_for_log(&text, 10);
        assert_eq!(out, format!("{}...", "a".repeat(10)));
    }
}
