/// Case-insensitive substring match
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// The part of an email address before the `@`, if non-empty
pub fn email_local_part(email: &str) -> Option<&str> {
    email.split('@').next().filter(|part| !part.is_empty())
}

/// Accepts `local@domain.tld` shapes: no whitespace, exactly one `@`,
/// and a dot inside the domain with characters on both sides.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    match domain.rfind('.') {
        Some(dot) => dot > 0 && dot < domain.len() - 1,
        None => false,
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last@sub.domain.ph"));

        assert!(!is_valid_email("")); // empty
        assert!(!is_valid_email("user@example")); // no dot in domain
        assert!(!is_valid_email("@example.com")); // no local part
        assert!(!is_valid_email("user@.com")); // dot first
        assert!(!is_valid_email("user@example.")); // dot last
        assert!(!is_valid_email("us er@example.com")); // whitespace
        assert!(!is_valid_email("a@b@c.com")); // two @
    }

    #[test]
    fn test_email_local_part() {
        assert_eq!(email_local_part("maria@example.com"), Some("maria"));
        assert_eq!(email_local_part("@example.com"), None);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Hello", 10), "Hello");
        assert_eq!(truncate("Hello World", 8), "Hello...");
        assert_eq!(truncate("Hi", 2), "Hi");
    }

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("Carcar City", "carcar"));
        assert!(!contains_ignore_case("Mandaue", "liloan"));
    }
}
