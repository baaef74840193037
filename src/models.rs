//! Defines the core data structures used in the mailbeacon application.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Represents the input contact record supplied by the caller.
/// Allows for flexibility if some fields are missing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct Contact {
    /// The contact's first name.
    pub first_name: Option<String>,
    /// The contact's last name.
    pub last_name: Option<String>,
    /// The contact's full name (optional input).
    pub full_name: Option<String>,
    /// The company domain (e.g., "example.com") or a full URL ("https://example.com").
    pub domain: Option<String>,
    /// Alias for the domain field to support the legacy request format.
    #[serde(alias = "company_domain")]
    #[serde(skip_serializing)]
    pub company_domain: Option<String>,
    /// Company name (optional, informational only).
    pub company: Option<String>,
    // Allow capturing other fields from the input JSON
    #[serde(flatten)]
    pub other_fields: HashMap<String, serde_json::Value>,
}

/// The discovery method that produced a candidate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DiscoverySource {
    Pattern,
    Scraped,
}

/// The three SMTP verdict states. Untested candidates stay inconclusive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub(crate) enum VerificationStatus {
    Verified,
    Rejected,
    #[default]
    Inconclusive,
}

impl VerificationStatus {
    /// Conclusive verdicts end the retry loop.
    pub(crate) fn is_conclusive(self) -> bool {
        !matches!(self, VerificationStatus::Inconclusive)
    }
}

/// Represents a single email address found and its associated metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FoundEmailData {
    /// The discovered email address.
    pub email: String,
    /// A score indicating the likelihood of this email being correct (0-10).
    pub confidence: u8,
    /// The method used to discover this email.
    pub source: DiscoverySource,
    /// Indicates if the email address uses a common generic prefix (e.g., info@, contact@).
    pub is_generic: bool,
    /// The result of the SMTP verification attempt.
    pub verification_status: VerificationStatus,
    /// A message accompanying the verification status (e.g., error details, OK message).
    pub verification_message: String,
}

/// Contains the results of the email finding process for a single contact.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub(crate) struct EmailResult {
    /// A list of all potentially valid emails found, ordered by likelihood.
    pub found_emails: Vec<FoundEmailData>,
    /// The single email address deemed most likely to be correct.
    pub most_likely_email: Option<String>,
    /// The confidence score associated with the most_likely_email.
    pub confidence_score: u8,
    /// List of methods used during the discovery process (e.g., "pattern_generation",
    /// "website_scraping", "smtp_verification").
    pub methods_used: Vec<String>,
    /// A log of verification attempts and their outcomes for specific emails.
    pub verification_log: HashMap<String, String>,
}

/// Represents the final output structure for each record, combining input and results.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct ProcessingResult {
    // Include all fields from the original Contact input
    #[serde(flatten)]
    pub contact_input: Contact,

    /// The results of the email discovery process. Absent if skipped or errored out early.
    pub email_discovery_results: Option<EmailResult>,
    /// The primary email found (convenience field, mirrors EmailResult.most_likely_email).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Confidence score for the primary email (convenience field).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_confidence: Option<u8>,
    /// A comma-separated list of methods used (convenience field).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verification_method: Option<String>,
    /// List of alternative emails found, capped at the configured maximum.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub email_alternatives: Vec<String>,

    /// Flag indicating if the record was skipped due to missing input.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[serde(default)]
    pub email_finding_skipped: bool,
    /// Reason why the record was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_finding_reason: Option<String>,
    /// Flag indicating verification failed definitively for the top choices.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[serde(default)]
    pub email_verification_failed: bool,
    /// Error message if processing failed unexpectedly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_finding_error: Option<String>,
    /// Time taken to process the record in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
}

impl ProcessingResult {
    /// A result shell carrying only the original input, with all outcome fields unset.
    pub(crate) fn empty(contact: Contact) -> Self {
        Self {
            contact_input: contact,
            email_discovery_results: None,
            email: None,
            email_confidence: None,
            email_verification_method: None,
            email_alternatives: vec![],
            email_finding_skipped: false,
            email_finding_reason: None,
            email_verification_failed: false,
            email_finding_error: None,
            processing_time_ms: None,
        }
    }

    /// A skipped result carrying the reason the input was rejected.
    pub(crate) fn skipped(contact: Contact, reason: String, elapsed_ms: f64) -> Self {
        let mut result = Self::empty(contact);
        result.email_finding_skipped = true;
        result.email_finding_reason = Some(reason);
        result.processing_time_ms = Some(elapsed_ms);
        result
    }

    /// An error result for unexpected failures inside discovery.
    pub(crate) fn errored(contact: Contact, error: String, elapsed_ms: f64) -> Self {
        let mut result = Self::empty(contact);
        result.email_finding_error = Some(error);
        result.processing_time_ms = Some(elapsed_ms);
        result
    }
}

/// Internal representation after validating an input Contact.
#[derive(Debug, Clone)]
pub(crate) struct ValidatedContact {
    pub first_name: String,
    pub last_name: String,
    /// Guaranteed to be populated (either from input or constructed).
    pub full_name: String,
    /// The base URL derived from the input domain, used for scraping.
    pub website_url: Url,
    /// The extracted, lowercase domain name used for patterns and verification.
    pub domain: String,
    // Keep original contact for outputting all original fields.
    pub original_contact: Contact,
}

/// Outcome of a full SMTP verification (after retries) for one candidate.
#[derive(Debug, Clone)]
pub(crate) struct VerificationOutcome {
    pub status: VerificationStatus,
    pub message: String,
    pub is_catch_all: bool,
}

impl VerificationOutcome {
    pub(crate) fn skipped_dns() -> Self {
        Self {
            status: VerificationStatus::Inconclusive,
            message: "SMTP check skipped (DNS lookup failed)".to_string(),
            is_catch_all: false,
        }
    }
}

/// Internal representation of a single SMTP verification attempt.
#[derive(Debug, Clone)]
pub(crate) struct SmtpVerificationResult {
    /// The verdict for this attempt.
    pub status: VerificationStatus,
    /// Detailed message about the outcome.
    pub message: String,
    /// Suggests if retrying might yield a different result (e.g., for temporary errors).
    pub should_retry: bool,
    /// Indicates if the domain seems to accept all emails.
    pub is_catch_all: bool,
}

impl SmtpVerificationResult {
    /// Creates a conclusive result (email definitely exists or not).
    pub(crate) fn conclusive(exists: bool, message: String, is_catch_all: bool) -> Self {
        Self {
            status: if exists {
                VerificationStatus::Verified
            } else {
                VerificationStatus::Rejected
            },
            message,
            should_retry: false,
            is_catch_all,
        }
    }

    /// Creates an inconclusive result where retrying might help.
    pub(crate) fn inconclusive_retry(message: String) -> Self {
        Self {
            status: VerificationStatus::Inconclusive,
            message,
            should_retry: true,
            is_catch_all: false,
        }
    }

    /// Creates an inconclusive result where retrying is unlikely to help.
    pub(crate) fn inconclusive_no_retry(message: String) -> Self {
        Self {
            status: VerificationStatus::Inconclusive,
            message,
            should_retry: false,
            is_catch_all: false,
        }
    }

    /// Marks the attempt as having observed a catch-all acceptance.
    pub(crate) fn with_catch_all(mut self) -> Self {
        self.is_catch_all = true;
        self
    }
}
