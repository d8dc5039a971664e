//! Prompt text for the vision model.

/// Sent with the screenshot when the user did not type a question.
pub const DEFAULT_ANALYSIS_PROMPT: &str = "Please analyze this screenshot and tell me what you \
see. What's the main content and purpose of this screen?";

/// The question to send alongside the image.
pub fn analysis_question(question: Option<&str>) -> &str {
    match question.map(str::trim) {
        Some(q) if !q.is_empty() => q,
        _ => DEFAULT_ANALYSIS_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_question_uses_default() {
        assert_eq!(analysis_question(None), DEFAULT_ANALYSIS_PROMPT);
        assert_eq!(analysis_question(Some("   ")), DEFAULT_ANALYSIS_PROMPT);
    }

    #[test]
    fn question_is_trimmed() {
        assert_eq!(analysis_question(Some("  what app is this? ")), "what app is this?");
    }
}
