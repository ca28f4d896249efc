//! Validation Utilities
//!
//! Input validation functions for platform data and service requests.

use regex::Regex;
use std::sync::OnceLock;
use validator::{ValidationError, ValidationErrors};

/// Validates email address format
pub fn validate_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    regex.is_match(email)
}

/// Normalizes email address to lowercase and removes whitespace
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validates a display name: 1-255 characters of letters, spaces, hyphens,
/// apostrophes and dots. Letters from any script are accepted.
pub fn validate_name(name: &str) -> bool {
    let trimmed = name.trim();

    if trimmed.is_empty() || trimmed.chars().count() > 255 {
        return false;
    }

    static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = NAME_REGEX
        .get_or_init(|| Regex::new(r"^[\p{L}\s\-'.]+$").expect("Failed to compile name regex"));

    regex.is_match(trimmed)
}

/// Validates a language tag such as `en`, `vi` or `zh-CN`
pub fn validate_language_code(code: &str) -> bool {
    static LANGUAGE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = LANGUAGE_REGEX.get_or_init(|| {
        Regex::new(r"^[a-z]{2,3}(-[A-Z]{2})?$").expect("Failed to compile language regex")
    });

    regex.is_match(code)
}

/// Validates a course title: 3-200 characters once surrounding whitespace is removed
pub fn validate_course_title(title: &str) -> bool {
    let length = title.trim().chars().count();
    (3..=200).contains(&length)
}

/// Validates URL format for certificates, thumbnails and other links
pub fn validate_url(url: &str) -> bool {
    if url.is_empty() {
        return true; // Empty URLs are allowed for optional fields
    }

    static URL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = URL_REGEX.get_or_init(|| {
        Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("Failed to compile URL regex")
    });

    regex.is_match(url) && url.len() <= 512
}

/// Custom validator for email fields using the validator crate
pub fn email_validator(email: &str) -> Result<(), ValidationError> {
    if validate_email(email) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_email").with_message(messages::INVALID_EMAIL.into()))
    }
}

/// Custom validator for name fields using the validator crate
pub fn name_validator(name: &str) -> Result<(), ValidationError> {
    if validate_name(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_name").with_message(messages::INVALID_NAME.into()))
    }
}

/// Custom validator for language tag fields
pub fn language_validator(code: &str) -> Result<(), ValidationError> {
    if validate_language_code(code) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_language")
            .with_message(messages::INVALID_LANGUAGE.into()))
    }
}

/// Custom validator for course titles
pub fn title_validator(title: &str) -> Result<(), ValidationError> {
    if validate_course_title(title) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_title").with_message(messages::INVALID_TITLE.into()))
    }
}

/// Custom validator for URL fields using the validator crate
pub fn url_validator(url: &str) -> Result<(), ValidationError> {
    if validate_url(url) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_url").with_message(messages::INVALID_URL.into()))
    }
}

/// Flattens validator errors into a single `field: message` list
pub fn describe_validation_errors(err: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    for (field, errors) in err.field_errors() {
        for error in errors {
            let message = error
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("Invalid value for field '{}'", field));
            messages.push(format!("{}: {}", field, message));
        }
    }

    messages.sort();
    messages.join(", ")
}

/// Validation error messages for user-friendly responses
pub mod messages {
    pub const INVALID_EMAIL: &str = "Please enter a valid email address";
    pub const INVALID_NAME: &str =
        "Name must contain only letters, spaces, hyphens, dots, and apostrophes";
    pub const INVALID_LANGUAGE: &str = "Language must be a tag like 'en' or 'zh-CN'";
    pub const INVALID_TITLE: &str = "Title must be 3-200 characters";
    pub const INVALID_URL: &str = "Please enter a valid URL starting with http:// or https://";
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("test.user+tag@domain.co.uk"));
        assert!(!validate_email("invalid.email"));
        assert!(!validate_email("@domain.com"));
        assert!(!validate_email("user@"));
        assert!(!validate_email(""));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  USER@EXAMPLE.COM  "), "user@example.com");
        assert_eq!(normalize_email("Test@Domain.org"), "test@domain.org");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("John Doe"));
        assert!(validate_name("Mary-Jane O'Connor"));
        assert!(validate_name("Nguyễn Văn An"));
        assert!(!validate_name(""));
        assert!(!validate_name("   "));
        assert!(!validate_name("John123"));
        assert!(!validate_name("John@Doe"));
        assert!(!validate_name(&"a".repeat(256)));
    }

    #[test]
    fn test_validate_language_code() {
        assert!(validate_language_code("en"));
        assert!(validate_language_code("vi"));
        assert!(validate_language_code("zh-CN"));
        assert!(validate_language_code("yue"));
        assert!(!validate_language_code("EN"));
        assert!(!validate_language_code("english"));
        assert!(!validate_language_code("zh_cn"));
    }

    #[test]
    fn test_validate_course_title() {
        assert!(validate_course_title("Everyday Spanish"));
        assert!(validate_course_title("  Kanji  "));
        assert!(validate_course_title("Tiếng"));
        assert!(!validate_course_title("   "));
        assert!(!validate_course_title("  ab  "));
        assert!(!validate_course_title(&"a".repeat(201)));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/cert.pdf"));
        assert!(validate_url("http://example.com/path?query=1"));
        assert!(validate_url(""));
        assert!(!validate_url("ftp://example.com"));
        assert!(!validate_url("not-a-url"));
        assert!(!validate_url(&format!("https://example.com/{}", "a".repeat(600))));
    }

    #[derive(Validate)]
    struct ContactForm {
        #[validate(custom(function = "email_validator"))]
        email: String,
        #[validate(length(min = 3, message = "too short"))]
        title: String,
    }

    #[test]
    fn test_describe_validation_errors() {
        let form = ContactForm {
            email: "nope".to_string(),
            title: "ab".to_string(),
        };
        let errors = form.validate().unwrap_err();
        let description = describe_validation_errors(&errors);
        assert!(description.contains("email: Please enter a valid email address"));
        assert!(description.contains("title: too short"));
    }
}
