//! Secret redaction: scrubs credentials and image payloads from text
//! before it is logged or shown in the overlay.
//!
//! Error bodies from the chat endpoint sometimes echo the request back,
//! which would put the bearer key and a megabyte of base64 into the log.

use regex::Regex;
use std::sync::LazyLock;

pub struct RedactionResult {
    pub cleaned_text: String,
    pub redactions: Vec<Redaction>,
    pub has_redactions: bool,
}

pub struct Redaction {
    pub label: String,
    pub count: usize,
}

static SENSITIVE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // Inline image payloads (data:image/...;base64,....)
        (
            Regex::new(r"data:image/[a-zA-Z0-9.+-]+;base64,[A-Za-z0-9+/=]+").unwrap(),
            "image_data",
        ),
        // Authorization headers
        (Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]{8,}=*").unwrap(), "bearer_token"),
        // API keys (sk-or-v1-..., sk-..., pk-..., api-..., etc.)
        (
            Regex::new(r"\b(sk|pk|api|key|token|secret)[-_][a-zA-Z0-9_-]{20,}\b").unwrap(),
            "api_key",
        ),
        // AWS access keys (AKIA + 16 alphanumeric)
        (Regex::new(r"\bAKIA[0-9A-Z]{16}\b").unwrap(), "aws_key"),
        // Private key blocks
        (
            Regex::new(r"-----BEGIN (RSA |EC |DSA )?PRIVATE KEY-----").unwrap(),
            "private_key",
        ),
    ]
});

/// Replaces every sensitive match with a `[REDACTED:<label>]` placeholder.
pub fn redact_sensitive_data(text: &str) -> RedactionResult {
    let mut cleaned = text.to_string();
    let mut redactions = Vec::new();

    for (pattern, label) in SENSITIVE_PATTERNS.iter() {
        let count = pattern.find_iter(&cleaned).count();
        if count > 0 {
            redactions.push(Redaction {
                label: label.to_string(),
                count,
            });
            cleaned = pattern
                .replace_all(&cleaned, format!("[REDACTED:{}]", label).as_str())
                .to_string();
        }
    }

    let has_redactions = !redactions.is_empty();

    if has_redactions {
        let summary: Vec<String> = redactions
            .iter()
            .map(|r| format!("{} {}", r.count, r.label))
            .collect();
        log::debug!("[SAFETY] Redacted {}", summary.join(", "));
    }

    RedactionResult {
        cleaned_text: cleaned,
        redactions,
        has_redactions,
    }
}

/// Redacts and truncates to at most `max_chars` characters.
pub fn redact_for_display(text: &str, max_chars: usize) -> String {
    let cleaned = redact_sensitive_data(text).cleaned_text;
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    let mut truncated: String = cleaned.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}
