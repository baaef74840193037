//! Validates and processes individual contact records.

use crate::beacon::MailBeacon;
use crate::domain::{extract_domain, normalize_url};
use crate::error::AppError;
use crate::models::{Contact, ProcessingResult, ValidatedContact};
use std::time::Instant;

/// Derives first and last names from explicit fields, falling back to
/// splitting the full name on whitespace.
fn derive_names(record: &Contact) -> (String, String) {
    let mut first_name = record
        .first_name
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_string();
    let mut last_name = record.last_name.as_deref().unwrap_or("").trim().to_string();
    let full_name = record.full_name.as_deref().unwrap_or("").trim();

    if (first_name.is_empty() || last_name.is_empty()) && !full_name.is_empty() {
        let name_parts: Vec<&str> = full_name.split_whitespace().collect();
        match name_parts.as_slice() {
            [] => {}
            [single] => {
                if first_name.is_empty() {
                    first_name = single.to_string();
                }
                if last_name.is_empty() {
                    last_name = single.to_string();
                }
            }
            [head, .., tail] => {
                if first_name.is_empty() {
                    first_name = head.to_string();
                }
                if last_name.is_empty() {
                    last_name = tail.to_string();
                }
            }
        }
    }

    (first_name, last_name)
}

/// Parses the raw contact into a `ValidatedContact`, or explains why it
/// cannot be processed.
fn validate_contact(record: &Contact) -> Result<ValidatedContact, AppError> {
    let (first_name, last_name) = derive_names(record);
    let domain_input = record
        .domain
        .as_deref()
        .or(record.company_domain.as_deref())
        .unwrap_or("")
        .trim()
        .to_string();

    let mut missing_parts = Vec::new();
    if first_name.is_empty() {
        missing_parts.push("first name");
    }
    if last_name.is_empty() {
        missing_parts.push("last name");
    }
    if domain_input.is_empty() {
        missing_parts.push("domain");
    }
    if !missing_parts.is_empty() {
        return Err(AppError::InsufficientInput(format!(
            "Missing {}",
            missing_parts.join(", ")
        )));
    }

    let website_url = normalize_url(&domain_input)?;
    let domain = extract_domain(&domain_input)?;

    let full_name = match record.full_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{} {}", first_name, last_name),
    };

    Ok(ValidatedContact {
        first_name,
        last_name,
        full_name,
        website_url,
        domain,
        original_contact: record.clone(),
    })
}

/// Processes a single contact record to find and verify an email address.
///
/// Validation and normalization failures produce a skipped result; discovery
/// errors produce an error result. This function never raises to its caller.
pub(crate) async fn process_record(beacon: &MailBeacon, record: Contact) -> ProcessingResult {
    let start_time = Instant::now();
    let record_id = record
        .full_name
        .as_deref()
        .or(record.first_name.as_deref())
        .or(record.domain.as_deref())
        .unwrap_or("Unknown Record")
        .to_string();
    tracing::info!(target: "process_task", "[{}] Starting processing.", record_id);

    let validated = match validate_contact(&record) {
        Ok(validated) => validated,
        Err(e) => {
            let reason = e.to_string();
            tracing::warn!(target: "process_task", "[{}] Skipping record. Reason: {}", record_id, reason);
            return ProcessingResult::skipped(
                record,
                reason,
                start_time.elapsed().as_secs_f64() * 1000.0,
            );
        }
    };

    tracing::debug!(target: "process_task",
        "[{}] Validated input: FN='{}', LN='{}', Domain='{}', URL='{}'",
        record_id, validated.first_name, validated.last_name, validated.domain, validated.website_url
    );

    match beacon.find_email(&validated).await {
        Ok(results) => {
            let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
            let most_likely = results.most_likely_email.clone();

            let mut final_record = ProcessingResult::empty(record);
            final_record.email = most_likely.clone();
            final_record.email_confidence = most_likely.as_ref().map(|_| results.confidence_score);
            final_record.email_verification_method = if results.methods_used.is_empty() {
                None
            } else {
                Some(results.methods_used.join(", "))
            };
            final_record.email_alternatives = results
                .found_emails
                .iter()
                .filter(|e| Some(&e.email) != most_likely.as_ref())
                .take(beacon.config().max_alternatives)
                .map(|e| e.email.clone())
                .collect();
            final_record.email_verification_failed =
                most_likely.is_none() && !results.found_emails.is_empty();
            final_record.email_discovery_results = Some(results);
            final_record.processing_time_ms = Some(elapsed_ms);

            if let Some(ref email) = final_record.email {
                tracing::info!(target: "process_task",
                    "[{}] Found likely email: {} (Confidence: {}/10)",
                    record_id, email, final_record.email_confidence.unwrap_or_default()
                );
            } else {
                tracing::info!(target: "process_task", "[{}] No high-confidence email found.", record_id);
            }
            tracing::info!(target: "process_task", "[{}] Finished processing in {:.2}ms.", record_id, elapsed_ms);
            final_record
        }
        Err(e) => {
            tracing::error!(target: "process_task",
                "[{}] Unexpected error during discovery: {}", record_id, e
            );
            ProcessingResult::errored(
                record,
                format!("Core processing error: {}", e),
                start_time.elapsed().as_secs_f64() * 1000.0,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::testing::{StubResolver, StubScraper, ScriptedVerifier, beacon};
    use std::collections::HashMap;

    fn record(
        first: Option<&str>,
        last: Option<&str>,
        full: Option<&str>,
        domain: Option<&str>,
    ) -> Contact {
        Contact {
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            full_name: full.map(str::to_string),
            domain: domain.map(str::to_string),
            company_domain: None,
            company: None,
            other_fields: HashMap::new(),
        }
    }

    #[test]
    fn test_derive_names_from_full_name() {
        let (first, last) = derive_names(&record(None, None, Some("John Doe"), None));
        assert_eq!((first.as_str(), last.as_str()), ("John", "Doe"));

        let (first, last) =
            derive_names(&record(None, None, Some("Anna Maria van der Berg"), None));
        assert_eq!((first.as_str(), last.as_str()), ("Anna", "Berg"));

        // A single token fills both slots.
        let (first, last) = derive_names(&record(None, None, Some("Alice"), None));
        assert_eq!((first.as_str(), last.as_str()), ("Alice", "Alice"));

        // Explicit fields win over the full name.
        let (first, last) = derive_names(&record(Some("Jo"), None, Some("John Doe"), None));
        assert_eq!((first.as_str(), last.as_str()), ("Jo", "Doe"));
    }

    #[test]
    fn test_validate_contact_reports_missing_parts() {
        let err = validate_contact(&record(None, None, None, Some("example.com"))).unwrap_err();
        assert!(err.to_string().contains("first name"));
        assert!(err.to_string().contains("last name"));

        let err = validate_contact(&record(Some("John"), Some("Doe"), None, None)).unwrap_err();
        assert!(err.to_string().contains("domain"));
    }

    #[test]
    fn test_validate_contact_normalizes_domain() {
        let validated = validate_contact(&record(
            Some("John"),
            Some("Doe"),
            None,
            Some("https://www.Example.com/about"),
        ))
        .unwrap();
        assert_eq!(validated.domain, "example.com");
        assert_eq!(validated.full_name, "John Doe");
        assert_eq!(validated.website_url.host_str(), Some("www.example.com"));
    }

    #[tokio::test]
    async fn test_process_record_single_token_full_name() {
        let beacon = beacon(
            StubScraper::with(&[]),
            StubResolver::nxdomain(),
            ScriptedVerifier::catch_all(),
        );
        let result = process_record(
            &beacon,
            record(None, None, Some("Alice"), Some("x.io")),
        )
        .await;

        assert!(!result.email_finding_skipped);
        assert!(result.email_finding_error.is_none());
        let discovery = result.email_discovery_results.unwrap();
        assert!(
            discovery
                .found_emails
                .iter()
                .any(|e| e.email == "alice@x.io"),
            "expected alice@x.io among {:?}",
            discovery.found_emails
        );
        assert!(result.processing_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_process_record_empty_domain_is_skipped() {
        let beacon = beacon(
            StubScraper::with(&[]),
            StubResolver::nxdomain(),
            ScriptedVerifier::catch_all(),
        );
        let result = process_record(
            &beacon,
            record(Some("John"), Some("Doe"), None, Some("")),
        )
        .await;

        assert!(result.email_finding_skipped);
        let reason = result.email_finding_reason.unwrap();
        assert!(reason.contains("domain"), "reason: {}", reason);
        assert!(result.email_discovery_results.is_none());
    }

    #[tokio::test]
    async fn test_process_record_caps_alternatives() {
        let beacon = beacon(
            StubScraper::with(&[]),
            StubResolver::nxdomain(),
            ScriptedVerifier::catch_all(),
        );
        let result = process_record(
            &beacon,
            record(Some("John"), Some("Doe"), None, Some("example.com")),
        )
        .await;

        let discovery = result.email_discovery_results.as_ref().unwrap();
        assert!(discovery.found_emails.len() > beacon.config().max_alternatives);
        assert!(result.email_alternatives.len() <= beacon.config().max_alternatives);
        if let Some(selected) = &result.email {
            assert!(!result.email_alternatives.contains(selected));
        }
    }

    #[tokio::test]
    async fn test_process_record_populates_convenience_fields() {
        let beacon = beacon(
            StubScraper::with(&[]),
            StubResolver::with_mx("mx.example.com"),
            ScriptedVerifier::verifying("john.doe@example.com"),
        );
        let result = process_record(
            &beacon,
            record(Some("John"), Some("Doe"), None, Some("example.com")),
        )
        .await;

        assert_eq!(result.email.as_deref(), Some("john.doe@example.com"));
        assert_eq!(result.email_confidence, Some(9));
        let methods = result.email_verification_method.unwrap();
        assert!(methods.contains("pattern_generation"));
        assert!(methods.contains("smtp_verification"));
        assert!(!result.email_verification_failed);
    }
}
