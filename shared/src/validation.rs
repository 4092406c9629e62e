//! Input normalization and custom validators.

use validator::{ValidationError, ValidationErrors};

pub const MAX_TAGS: usize = 20;
pub const MAX_TAG_LEN: usize = 50;
/// Upper bound on document content, in bytes.
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Flatten validator output into one client-facing message.
pub fn describe(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();
    messages.sort();
    messages.dedup();

    if messages.is_empty() {
        "Validation failed".to_string()
    } else {
        messages.join("; ")
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trim, lowercase and de-duplicate tags, keeping first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}

pub fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        let mut err = ValidationError::new("too_many_tags");
        err.message = Some(format!("At most {} tags are allowed", MAX_TAGS).into());
        return Err(err);
    }
    if tags.iter().any(|t| t.trim().is_empty() || t.chars().count() > MAX_TAG_LEN) {
        let mut err = ValidationError::new("tag_length");
        err.message = Some(format!("Tags must be between 1 and {} characters", MAX_TAG_LEN).into());
        return Err(err);
    }
    Ok(())
}

pub fn validate_content_size(content: &str) -> Result<(), ValidationError> {
    if content.len() > MAX_CONTENT_BYTES {
        let mut err = ValidationError::new("content_size");
        err.message = Some("Content must not exceed 1 MiB".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            " Rust ".to_string(),
            "rust".to_string(),
            "".to_string(),
            "AWS".to_string(),
        ];
        assert_eq!(normalize_tags(tags), vec!["rust", "aws"]);
    }

    #[test]
    fn test_validate_tags() {
        assert!(validate_tags(&["ok".to_string()]).is_ok());
        assert!(validate_tags(&["x".repeat(51)]).is_err());

        let many: Vec<String> = (0..21).map(|i| format!("t{}", i)).collect();
        assert!(validate_tags(&many).is_err());
    }

    #[test]
    fn test_content_size() {
        assert!(validate_content_size("short").is_ok());
        assert!(validate_content_size(&"a".repeat(MAX_CONTENT_BYTES + 1)).is_err());
    }

    #[test]
    fn test_describe_collects_messages() {
        let mut errors = ValidationErrors::new();
        let mut err = ValidationError::new("length");
        err.message = Some("Title must be between 3 and 100 characters".into());
        errors.add("title", err);
        errors.add("content", ValidationError::new("length"));

        let message = describe(&errors);
        assert!(message.contains("Title must be between 3 and 100 characters"));
        assert!(message.contains("content is invalid"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}
