//! Validation helpers for inbound WebSocket payloads.

use validator::ValidationError;

/// Validates that a submitted answer is non-empty and reasonably sized.
pub fn validate_answer(answer: &str) -> Result<(), ValidationError> {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("answer_empty");
        err.message = Some("Answer must not be empty".into());
        return Err(err);
    }
    if trimmed.chars().count() > 200 {
        let mut err = ValidationError::new("answer_too_long");
        err.message = Some("Answer must not exceed 200 characters".into());
        return Err(err);
    }
    Ok(())
}

/// Validates a chat line against the configured length cap.
pub fn validate_chat(message: &str, max_length: usize) -> Result<(), ValidationError> {
    if message.trim().is_empty() {
        let mut err = ValidationError::new("chat_empty");
        err.message = Some("Chat message must not be empty".into());
        return Err(err);
    }
    if message.chars().count() > max_length {
        let mut err = ValidationError::new("chat_too_long");
        err.message =
            Some(format!("Chat message must not exceed {max_length} characters").into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_answer() {
        assert!(validate_answer("ankara").is_ok());
        assert!(validate_answer("   ").is_err());
        assert!(validate_answer(&"a".repeat(201)).is_err());
    }

    #[test]
    fn test_validate_chat_length_cap() {
        assert!(validate_chat("selam", 500).is_ok());
        assert!(validate_chat("", 500).is_err());
        assert!(validate_chat(&"x".repeat(501), 500).is_err());
        assert!(validate_chat(&"x".repeat(500), 500).is_ok());
    }
}
