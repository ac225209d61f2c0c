use shared::domain::{QUESTION_MAX_CHARS, QUESTION_MIN_CHARS};

use crate::error::MutationError;

/// Trim and bound-check question content. Runs before any store write,
/// so a rejection here leaves no trace.
pub fn validate_question_content(raw: &str) -> Result<String, MutationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MutationError::Validation(
            "question content is required".into(),
        ));
    }
    let chars = trimmed.chars().count();
    if chars < QUESTION_MIN_CHARS {
        return Err(MutationError::Validation(format!(
            "question content must be at least {QUESTION_MIN_CHARS} characters"
        )));
    }
    if chars > QUESTION_MAX_CHARS {
        return Err(MutationError::Validation(format!(
            "question content must be at most {QUESTION_MAX_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace_only_content() {
        assert!(matches!(
            validate_question_content(""),
            Err(MutationError::Validation(_))
        ));
        assert!(matches!(
            validate_question_content("   \n\t  "),
            Err(MutationError::Validation(_))
        ));
    }

    #[test]
    fn rejects_content_below_minimum_after_trim() {
        // nine characters once the padding is trimmed
        let result = validate_question_content("  too short  ");
        assert!(matches!(result, Err(MutationError::Validation(_))));
    }

    #[test]
    fn accepts_exactly_minimum_and_maximum_lengths() {
        let min = "q".repeat(QUESTION_MIN_CHARS);
        assert_eq!(validate_question_content(&min).expect("min ok"), min);

        let max = "q".repeat(QUESTION_MAX_CHARS);
        assert_eq!(validate_question_content(&max).expect("max ok"), max);
    }

    #[test]
    fn rejects_content_above_maximum() {
        let over = "q".repeat(QUESTION_MAX_CHARS + 1);
        assert!(matches!(
            validate_question_content(&over),
            Err(MutationError::Validation(_))
        ));
    }

    #[test]
    fn trims_surrounding_whitespace_from_accepted_content() {
        let out = validate_question_content("  what is the plan for the next release?  ")
            .expect("valid");
        assert_eq!(out, "what is the plan for the next release?");
    }

    #[test]
    fn counts_characters_not_bytes() {
        // ten multibyte characters must pass the minimum bound
        let content = "é".repeat(QUESTION_MIN_CHARS);
        assert_eq!(
            validate_question_content(&content).expect("chars counted"),
            content
        );
    }
}
