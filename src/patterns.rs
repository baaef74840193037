//! Generates potential email address patterns based on names and domain.

use regex::Regex;
use std::collections::BTreeSet;

/// Removes whitespace and converts to lowercase.
fn sanitize_name_part(part: &str) -> String {
    part.trim().replace(char::is_whitespace, "").to_lowercase()
}

fn char_prefix(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Generates a deterministic, sorted list of common email address patterns for
/// a given name and domain.
///
/// Returns an empty vector if names or domain are empty or the domain has no dot.
pub(crate) fn generate_email_patterns(
    first_name: &str,
    last_name: &str,
    domain: &str,
    email_regex: &Regex,
) -> Vec<String> {
    tracing::debug!(
        "Generating patterns for {} {} @ {}",
        first_name,
        last_name,
        domain
    );

    if first_name.is_empty() || last_name.is_empty() || domain.is_empty() || !domain.contains('.') {
        tracing::warn!(
            "Cannot generate patterns due to empty name/domain or invalid domain: '{} {} @ {}'",
            first_name,
            last_name,
            domain
        );
        return Vec::new();
    }

    let first = sanitize_name_part(first_name);
    let last = sanitize_name_part(last_name);

    if first.is_empty() || last.is_empty() {
        tracing::warn!(
            "Cannot generate patterns after sanitizing names: '{} {} @ {}'",
            first,
            last,
            domain
        );
        return Vec::new();
    }

    // For single-character names the initial equals the name itself.
    let first_initial = char_prefix(&first, 1);
    let last_initial = char_prefix(&last, 1);

    let mut local_parts = BTreeSet::new();

    local_parts.insert(first.clone()); // john
    local_parts.insert(format!("{}.{}", first, last)); // john.doe
    local_parts.insert(format!("{}{}", first, last)); // johndoe
    local_parts.insert(format!("{}.{}", last, first)); // doe.john
    local_parts.insert(format!("{}{}", last, first)); // doejohn
    local_parts.insert(format!("{}{}", first_initial, last)); // jdoe
    local_parts.insert(format!("{}.{}", first_initial, last)); // j.doe
    local_parts.insert(format!("{}{}", first, last_initial)); // johnd
    local_parts.insert(format!("{}.{}", first, last_initial)); // john.d
    local_parts.insert(format!("{}_{}", first, last)); // john_doe
    local_parts.insert(format!("{}-{}", first, last)); // john-doe
    local_parts.insert(format!("{}_{}", last, first)); // doe_john
    local_parts.insert(format!("{}-{}", last, first)); // doe-john

    if first.chars().count() >= 3 {
        local_parts.insert(format!("{}{}", char_prefix(&first, 3), last)); // johdoe
    }
    if last.chars().count() >= 3 {
        local_parts.insert(format!("{}{}", first, char_prefix(&last, 3))); // johndoe
    }

    // BTreeSet keeps the output deduplicated and lexicographically sorted.
    let final_patterns: Vec<String> = local_parts
        .into_iter()
        .map(|lp| format!("{}@{}", lp, domain))
        .filter(|email| email_regex.is_match(email))
        .collect();

    tracing::debug!("Generated {} unique valid patterns.", final_patterns.len());
    final_patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EMAIL_REGEX;

    fn regex() -> Regex {
        Regex::new(DEFAULT_EMAIL_REGEX).unwrap()
    }

    #[test]
    fn test_generate_patterns_basic() {
        let patterns = generate_email_patterns("John", "Doe", "example.com", &regex());
        assert!(!patterns.is_empty());
        assert!(patterns.contains(&"john.doe@example.com".to_string()));
        assert!(patterns.contains(&"jdoe@example.com".to_string()));
        assert!(patterns.contains(&"john@example.com".to_string()));
        assert!(patterns.contains(&"doe.john@example.com".to_string()));
        assert!(patterns.contains(&"johnd@example.com".to_string()));
        assert!(patterns.contains(&"john_doe@example.com".to_string()));
        assert!(patterns.contains(&"john-doe@example.com".to_string()));
        assert!(patterns.contains(&"johdoe@example.com".to_string()));
        assert!(patterns.contains(&"johndoe@example.com".to_string()));
    }

    #[test]
    fn test_generate_patterns_deterministic_and_sorted() {
        let a = generate_email_patterns("John", "Doe", "example.com", &regex());
        let b = generate_email_patterns(" John ", "doe", "example.com", &regex());
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(a, sorted, "patterns must come out lexicographically sorted");
    }

    #[test]
    fn test_generate_patterns_with_spaces() {
        let patterns = generate_email_patterns(" John ", " Van Der Beek ", "test.co.uk", &regex());
        assert!(patterns.contains(&"john.vanderbeek@test.co.uk".to_string()));
        assert!(patterns.contains(&"jvanderbeek@test.co.uk".to_string()));
        assert!(patterns.contains(&"john.v@test.co.uk".to_string()));
    }

    #[test]
    fn test_generate_patterns_empty_input() {
        let re = regex();
        assert!(generate_email_patterns("", "Doe", "example.com", &re).is_empty());
        assert!(generate_email_patterns("John", "", "example.com", &re).is_empty());
        assert!(generate_email_patterns("John", "Doe", "", &re).is_empty());
        assert!(generate_email_patterns("John", "Doe", "nodot", &re).is_empty());
        assert!(generate_email_patterns(" ", "Doe", "example.com", &re).is_empty());
    }

    #[test]
    fn test_generate_patterns_single_character_names() {
        let patterns = generate_email_patterns("A", "B", "x.io", &regex());
        // Initial == name, so the collapsed patterns still come out valid.
        assert!(patterns.contains(&"a@x.io".to_string()));
        assert!(patterns.contains(&"a.b@x.io".to_string()));
        assert!(patterns.contains(&"ab@x.io".to_string()));
    }

    #[test]
    fn test_generate_patterns_identical_names_deduplicated() {
        let patterns = generate_email_patterns("Test", "Test", "test.com", &regex());
        let count_test_test = patterns
            .iter()
            .filter(|&p| p == "test.test@test.com")
            .count();
        assert_eq!(count_test_test, 1, "Duplicate patterns should be removed");
        let count_ttest = patterns.iter().filter(|&p| p == "ttest@test.com").count();
        assert_eq!(count_ttest, 1, "Duplicate patterns should be removed");
    }
}
