//! Core logic for finding and verifying email addresses.

use crate::config::Config;
use crate::dns::{MailServer, Resolver};
use crate::error::{AppError, Result};
use crate::models::{
    DiscoverySource, EmailResult, FoundEmailData, ValidatedContact, VerificationOutcome,
    VerificationStatus,
};
use crate::patterns::generate_email_patterns;
use crate::scraper::Scraper;
use crate::smtp::SmtpVerifier;
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use url::Url;

/// Collaborator seam for website scraping.
pub(crate) trait SiteScraper: Send + Sync {
    fn scrape<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Vec<String>>>;
}

impl SiteScraper for Scraper {
    fn scrape<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Vec<String>>> {
        self.scrape_site(url).boxed()
    }
}

/// Collaborator seam for mail server resolution.
pub(crate) trait MailServerLookup: Send + Sync {
    fn resolve<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Result<MailServer>>;
}

impl MailServerLookup for Resolver {
    fn resolve<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Result<MailServer>> {
        self.resolve_mail_server(domain).boxed()
    }
}

/// Collaborator seam for SMTP candidate verification.
pub(crate) trait AddressVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        email: &'a str,
        mail_server: &'a MailServer,
    ) -> BoxFuture<'a, VerificationOutcome>;
}

impl AddressVerifier for SmtpVerifier {
    fn verify<'a>(
        &'a self,
        email: &'a str,
        mail_server: &'a MailServer,
    ) -> BoxFuture<'a, VerificationOutcome> {
        self.verify_email(email, mail_server).boxed()
    }
}

/// Orders ranked candidates: confidence descending, non-generic before
/// generic, scraped before pattern.
fn rank_found_emails(emails: &mut [FoundEmailData]) {
    emails.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.is_generic.cmp(&b.is_generic))
            .then_with(|| {
                (b.source == DiscoverySource::Scraped).cmp(&(a.source == DiscoverySource::Scraped))
            })
    });
}

/// The discovery orchestrator. Holds the long-lived HTTP client and DNS
/// resolver (behind collaborator traits) and no per-request state.
#[derive(Clone)]
pub(crate) struct MailBeacon {
    config: Arc<Config>,
    scraper: Arc<dyn SiteScraper>,
    resolver: Arc<dyn MailServerLookup>,
    verifier: Arc<dyn AddressVerifier>,
}

impl MailBeacon {
    /// Creates a new MailBeacon instance with shared HTTP and DNS clients.
    pub(crate) fn new(config: Arc<Config>) -> Result<Self> {
        let http_client = Arc::new(
            Client::builder()
                .user_agent(&config.user_agent)
                .timeout(config.request_timeout)
                .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
                .build()
                .map_err(|e| {
                    AppError::Generic(anyhow::anyhow!("Failed to build HTTP client: {}", e))
                })?,
        );

        let resolver = Arc::new(Resolver::new(&config)?);
        let scraper = Arc::new(Scraper::new(http_client, config.clone()));
        let verifier = Arc::new(SmtpVerifier::new(config.clone()));

        Ok(Self {
            config,
            scraper,
            resolver,
            verifier,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_collaborators(
        config: Arc<Config>,
        scraper: Arc<dyn SiteScraper>,
        resolver: Arc<dyn MailServerLookup>,
        verifier: Arc<dyn AddressVerifier>,
    ) -> Self {
        Self {
            config,
            scraper,
            resolver,
            verifier,
        }
    }

    pub(crate) fn config(&self) -> &Arc<Config> {
        &self.config
    }

    fn is_generic_prefix(&self, email: &str) -> bool {
        email
            .split('@')
            .next()
            .map(|local_part| {
                self.config
                    .generic_email_prefixes
                    .contains(local_part.to_lowercase().as_str())
            })
            .unwrap_or(false)
    }

    /// Finds and verifies email addresses for a validated contact.
    pub(crate) async fn find_email(&self, contact: &ValidatedContact) -> Result<EmailResult> {
        tracing::info!(target: "beacon_task",
            "Finding email for: {} {}, Website: {}",
            contact.first_name,
            contact.last_name,
            contact.website_url
        );

        let mut results = EmailResult::default();
        let domain = &contact.domain;
        let first_lower = contact.first_name.to_lowercase();
        let last_lower = contact.last_name.to_lowercase();

        // --- 1. Generate patterns ---
        let generated_patterns = generate_email_patterns(
            &contact.first_name,
            &contact.last_name,
            domain,
            &self.config.email_regex,
        );
        if !generated_patterns.is_empty() {
            results.methods_used.push("pattern_generation".to_string());
            tracing::debug!(target: "beacon_task", "Finished pattern generation ({} patterns).", generated_patterns.len());
        }

        // --- 2. Scrape website ---
        let scraped_emails_raw = match self.scraper.scrape(&contact.website_url).await {
            Ok(emails) => emails,
            Err(e) => {
                tracing::warn!(target: "beacon_task",
                    "Website scraping failed for {}: {}. Proceeding without scraped emails.",
                    contact.website_url, e
                );
                results
                    .verification_log
                    .insert("scraping_error".to_string(), format!("Scraping failed: {}", e));
                Vec::new()
            }
        };

        // Keep addresses on the primary domain, plus generics from any domain
        // (cross-domain generics often represent legitimate contact points).
        let scraped_emails: Vec<String> = scraped_emails_raw
            .iter()
            .map(|email| email.to_lowercase())
            .filter(|email| {
                email.ends_with(&format!("@{}", domain)) || self.is_generic_prefix(email)
            })
            .collect();

        if !scraped_emails.is_empty() {
            results.methods_used.push("website_scraping".to_string());
            tracing::info!(target: "beacon_task",
                "Found {} relevant emails via scraping.",
                scraped_emails.len()
            );
        }

        // --- 3. Combine and order candidates ---
        let name_in_local = |email: &str| {
            let local = email.split('@').next().unwrap_or("");
            local.contains(&first_lower) || local.contains(&last_lower)
        };

        let mut all_candidates: Vec<String> = Vec::new();
        let mut seen_candidates: HashSet<String> = HashSet::new();
        let mut add_candidate = |email: &str| {
            let email_lower = email.to_lowercase();
            if !email_lower.is_empty() && seen_candidates.insert(email_lower.clone()) {
                all_candidates.push(email_lower);
            }
        };

        for p in &generated_patterns {
            if name_in_local(p) {
                add_candidate(p);
            }
        }
        for s in &scraped_emails {
            if name_in_local(s) {
                add_candidate(s);
            }
        }
        for p in &generated_patterns {
            if !name_in_local(p) {
                add_candidate(p);
            }
        }
        for s in &scraped_emails {
            if !name_in_local(s) {
                add_candidate(s);
            }
        }

        tracing::info!(target: "beacon_task",
            "Total unique candidates to assess: {}",
            all_candidates.len()
        );
        tracing::debug!(target: "beacon_task", "Candidate list (ordered): {:?}", all_candidates);

        // --- 4. Score and verify candidates ---
        let mail_server = match self.resolver.resolve(domain).await {
            Ok(ms) => {
                tracing::info!(target: "beacon_task", "Using mail server {} for domain {}", ms.exchange, domain);
                Some(ms)
            }
            Err(e) => {
                tracing::warn!(target: "beacon_task",
                    "Failed to resolve mail server for {}: {}. SMTP verification will be skipped.",
                    domain, e
                );
                results
                    .verification_log
                    .insert(domain.to_string(), format!("DNS resolution failed: {}", e));
                None
            }
        };

        let mut verified_emails_data: Vec<FoundEmailData> = Vec::new();

        for email in all_candidates {
            if !self.config.email_regex.is_match(&email) {
                tracing::warn!(target: "beacon_task", "Skipping invalid candidate format: {}", email);
                continue;
            }

            tracing::debug!(target: "beacon_task", "Assessing candidate: {}", email);

            let (email_local_part, email_domain_part) =
                email.split_once('@').unwrap_or((email.as_str(), ""));

            let is_scraped = scraped_emails.iter().any(|s| s == &email);
            let is_pattern = generated_patterns.iter().any(|p| p == &email);
            let is_generic = self.is_generic_prefix(&email);
            let matches_primary_domain = email_domain_part == domain;

            if !matches_primary_domain && !(is_scraped && is_generic) {
                tracing::debug!(target: "beacon_task",
                   "Skipping candidate {}: Non-primary domain ({}) and not a scraped generic.",
                   email, email_domain_part
                );
                continue;
            }

            let name_in_email =
                email_local_part.contains(&first_lower) || email_local_part.contains(&last_lower);

            let mut confidence: i16 = 0;
            if is_pattern && name_in_email {
                confidence += 3;
            }
            if is_scraped && name_in_email {
                confidence += 5;
            }
            if is_scraped && !name_in_email {
                confidence += 2;
            }
            if is_pattern && !name_in_email {
                confidence += 1;
            }
            if matches_primary_domain {
                confidence += 1;
            }

            tracing::debug!(target: "beacon_task",
               "Base confidence for {}: {} (Scraped: {}, Pattern: {}, NameIn: {}, Generic: {}, DomainMatch: {})",
               email, confidence, is_scraped, is_pattern, name_in_email, is_generic, matches_primary_domain
            );

            if is_generic && name_in_email && confidence > 1 {
                confidence = std::cmp::max(1, confidence - 5);
                tracing::debug!(target: "beacon_task",
                   "Applied penalty for generic prefix '{}'. New confidence: {}",
                   email_local_part, confidence
                );
            } else if is_generic && !name_in_email && confidence > 2 {
                confidence = std::cmp::max(1, confidence - 2);
                tracing::debug!(target: "beacon_task",
                    "Applied smaller penalty for generic prefix '{}'. New confidence: {}",
                    email_local_part, confidence
                );
            }

            let should_verify_smtp = mail_server.is_some()
                && (confidence >= 3 || (is_scraped && name_in_email && confidence > 1));

            tracing::debug!(target: "beacon_task",
               "Should verify {}? {} (Confidence: {}, MailServer: {})",
               email, should_verify_smtp, confidence, mail_server.is_some()
            );

            let verification_status;
            let verification_message;
            let verify_start_time = Instant::now();

            if should_verify_smtp {
                if !results
                    .methods_used
                    .contains(&"smtp_verification".to_string())
                {
                    results.methods_used.push("smtp_verification".to_string());
                }

                let current_mail_server = mail_server.as_ref().unwrap();
                let outcome = self.verifier.verify(&email, current_mail_server).await;

                verification_status = outcome.status;
                verification_message = outcome.message.clone();

                match outcome.status {
                    VerificationStatus::Verified => {
                        confidence += 5;
                        tracing::debug!(target: "beacon_task", "Applied boost (5) for successful verification. New confidence: {}", confidence);
                    }
                    VerificationStatus::Rejected => {
                        confidence = 0;
                        tracing::debug!(target: "beacon_task", "Reset confidence to 0 due to failed verification.");
                    }
                    VerificationStatus::Inconclusive => {
                        let boost = if outcome.is_catch_all { 0 } else { 1 };
                        confidence += boost;
                        tracing::debug!(target: "beacon_task",
                            "Applied boost ({}) for inconclusive verification (CatchAll: {}). New confidence: {}",
                            boost, outcome.is_catch_all, confidence
                        );
                    }
                }
            } else if mail_server.is_none() {
                let skipped = VerificationOutcome::skipped_dns();
                verification_status = skipped.status;
                verification_message = skipped.message;
            } else {
                verification_status = VerificationStatus::Inconclusive;
                verification_message = "Verification skipped (low initial confidence)".to_string();
            }

            let verification_duration_secs = verify_start_time.elapsed().as_secs_f64();
            results.verification_log.insert(
                email.clone(),
                format!(
                    "{} (Took {:.2}s)",
                    verification_message, verification_duration_secs
                ),
            );

            let final_confidence = confidence.clamp(0, 10) as u8;

            if final_confidence > 0 {
                tracing::debug!(target: "beacon_task",
                   "Storing final data for {}: Confidence={}, Status={:?}",
                   email, final_confidence, verification_status
                );
                verified_emails_data.push(FoundEmailData {
                    email: email.clone(),
                    confidence: final_confidence,
                    source: if is_scraped {
                        DiscoverySource::Scraped
                    } else {
                        DiscoverySource::Pattern
                    },
                    is_generic,
                    verification_status,
                    verification_message,
                });
            } else {
                tracing::debug!(target: "beacon_task",
                   "Discarding candidate {} due to zero final confidence.", email
                );
            }

            if should_verify_smtp {
                let sleep_duration = self.config.random_sleep();
                if !sleep_duration.is_zero() {
                    tracing::debug!(target: "beacon_task",
                        "Sleeping {:?} after verification attempt for {}", sleep_duration, email
                    );
                    sleep(sleep_duration).await;
                }
            }
        }

        // --- 5. Rank and select ---
        rank_found_emails(&mut verified_emails_data);
        results.found_emails = verified_emails_data;
        tracing::debug!(target: "beacon_task", "Sorted results: {:?}", results.found_emails);

        results.most_likely_email = None;
        results.confidence_score = 0;

        let best_non_generic = results
            .found_emails
            .iter()
            .find(|e| !e.is_generic && e.confidence >= self.config.confidence_threshold);

        if let Some(email_data) = best_non_generic {
            results.most_likely_email = Some(email_data.email.clone());
            results.confidence_score = email_data.confidence;
            tracing::info!(target: "beacon_task",
               "Selected best non-generic: {} (Conf: {})",
               email_data.email, email_data.confidence
            );
        } else if let Some(top_candidate) = results.found_emails.first() {
            if top_candidate.confidence >= self.config.confidence_threshold
                && (!top_candidate.is_generic
                    || top_candidate.confidence >= self.config.generic_confidence_threshold)
            {
                results.most_likely_email = Some(top_candidate.email.clone());
                results.confidence_score = top_candidate.confidence;
                tracing::info!(target: "beacon_task",
                    "Selected top candidate ({}): {} (Conf: {})",
                    if top_candidate.is_generic { "generic" } else { "non-generic" },
                    top_candidate.email, top_candidate.confidence
                );
            } else {
                tracing::info!(target: "beacon_task",
                   "Top candidate '{}' confidence ({}) or type (Generic: {}) did not meet threshold(s). Not selected.",
                   top_candidate.email, top_candidate.confidence, top_candidate.is_generic
                );
            }
        } else {
            tracing::info!(target: "beacon_task", "No candidates found with confidence > 0.");
        }

        tracing::info!(target: "beacon_task",
            "Finished finding email for: {} {}. Result: {:?}",
            contact.first_name, contact.last_name, results.most_likely_email
        );

        Ok(results)
    }
}
