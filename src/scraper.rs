//! Scrapes website content to find published email addresses.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::extract::extract_emails_from_html;
use reqwest::Client;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

fn host_sans_www(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.strip_prefix("www.").unwrap_or(h).to_lowercase())
}

/// Fetches a site's landing page plus the configured common sub-pages and
/// extracts every email address published on them.
#[derive(Debug, Clone)]
pub(crate) struct Scraper {
    client: Arc<Client>,
    config: Arc<Config>,
}

impl Scraper {
    pub(crate) fn new(client: Arc<Client>, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    /// The visit set: base URL plus each common page joined onto it, restricted
    /// to URLs staying on the base domain. Order is preserved, duplicates dropped.
    fn plan_urls(&self, base_url: &Url) -> Vec<Url> {
        let base_domain = host_sans_www(base_url);
        let mut planned = Vec::new();
        let mut seen = HashSet::new();

        if seen.insert(base_url.to_string()) {
            planned.push(base_url.clone());
        }

        for page_path in &self.config.common_pages_to_scrape {
            match base_url.join(page_path) {
                Ok(full_url) => {
                    if host_sans_www(&full_url) == base_domain {
                        if seen.insert(full_url.to_string()) {
                            planned.push(full_url);
                        }
                    } else {
                        tracing::debug!("Skipping generated URL (different domain): {}", full_url);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to join base URL {} with page {}: {}",
                        base_url,
                        page_path,
                        e
                    );
                }
            }
        }

        planned
    }

    /// Scrapes a website (starting URL + common pages) for email addresses.
    ///
    /// Per-page failures are non-fatal; the site as a whole fails only when
    /// every URL failed. Returns the sorted unique addresses found.
    pub(crate) async fn scrape_site(&self, base_url: &Url) -> Result<Vec<String>> {
        let start_time = Instant::now();
        tracing::info!(target: "scrape_task", "Starting scrape for: {}", base_url);

        let urls_to_visit = self.plan_urls(base_url);
        tracing::debug!(target: "scrape_task", "Planning to scrape {} potential URLs.", urls_to_visit.len());

        let mut found_emails: BTreeSet<String> = BTreeSet::new();
        let mut successful_pages = 0usize;
        let mut failed_pages = 0usize;
        let mut any_page_successful = false;
        let attempted = urls_to_visit.len();

        // Pages are fetched strictly in sequence to bound the rate hitting one site.
        let inter_request_delay = Duration::from_secs_f32(self.config.sleep_between_requests.0);

        for (index, page_url) in urls_to_visit.into_iter().enumerate() {
            if index > 0 && !inter_request_delay.is_zero() {
                tokio::time::sleep(inter_request_delay).await;
            }

            tracing::debug!(target: "scrape_task", "Attempting to GET: {}", page_url);
            let response_result = self
                .client
                .get(page_url.clone())
                .timeout(self.config.request_timeout)
                .send()
                .await;

            let response = match response_result {
                Ok(response) => response,
                Err(e) => {
                    failed_pages += 1;
                    if e.is_timeout() {
                        tracing::warn!(target: "scrape_task", "Timeout scraping {}: {}", page_url, e);
                    } else if e.is_connect() || e.is_request() {
                        tracing::warn!(target: "scrape_task", "Request/Connection error scraping {}: {}", page_url, e);
                    } else {
                        tracing::warn!(target: "scrape_task", "Unexpected error scraping {}: {}", page_url, e);
                    }
                    continue;
                }
            };

            let status = response.status();
            tracing::debug!(target: "scrape_task", "GET {} status: {}", page_url, status);

            if !status.is_success() {
                failed_pages += 1;
                if status == reqwest::StatusCode::NOT_FOUND {
                    tracing::debug!(target: "scrape_task", "Page not found (404): {}", page_url);
                } else {
                    tracing::warn!(target: "scrape_task", "HTTP error scraping {}: {}", page_url, status);
                }
                continue;
            }

            any_page_successful = true;

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|val| val.to_str().ok())
                .unwrap_or("")
                .to_lowercase();
            if !content_type.contains("html") {
                tracing::debug!(
                    target: "scrape_task",
                    "Skipping non-HTML content at {} ({})", page_url, content_type
                );
                continue;
            }

            // reqwest decodes using the response charset when present, falling
            // back to lossy UTF-8.
            match response.text().await {
                Ok(html_content) => {
                    successful_pages += 1;
                    let page_url_str = page_url.to_string();
                    for email in extract_emails_from_html(
                        &html_content,
                        &page_url_str,
                        &self.config.email_regex,
                    ) {
                        found_emails.insert(email);
                    }
                }
                Err(e) => {
                    failed_pages += 1;
                    tracing::warn!(target: "scrape_task", "Failed to read text content from {}: {}", page_url, e);
                }
            }
        }

        if !any_page_successful && attempted > 0 {
            tracing::warn!(target: "scrape_task", "Could not successfully scrape any pages for {}", base_url);
            return Err(AppError::Scrape(format!(
                "Failed to fetch any page from {}",
                base_url
            )));
        }

        let filtered_emails: Vec<String> = found_emails
            .into_iter()
            .filter(|email| {
                if let Some((_local, domain_part)) = email.rsplit_once('@') {
                    // Basic validity check on domain part
                    domain_part.contains('.') && domain_part.len() > 3
                } else {
                    false
                }
            })
            .collect();

        let elapsed = start_time.elapsed();
        tracing::info!(
            target: "scrape_task",
            "Scrape for {} finished in {:.2?}. Attempted {} URLs ({} successful, {} failed). Found {} potentially valid emails.",
            base_url,
            elapsed,
            attempted,
            successful_pages,
            failed_pages,
            filtered_emails.len()
        );

        Ok(filtered_emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_config(common_pages: Vec<&str>) -> Arc<Config> {
        let mut config = Config::default();
        config.sleep_between_requests = (0.0, 0.0);
        config.common_pages_to_scrape = common_pages.iter().map(|s| s.to_string()).collect();
        Arc::new(config)
    }

    fn test_scraper(config: Arc<Config>) -> Scraper {
        let client = Arc::new(Client::builder().build().unwrap());
        Scraper::new(client, config)
    }

    #[tokio::test]
    async fn test_plan_urls_stays_on_domain() {
        let scraper = test_scraper(test_config(vec![
            "/contact",
            "/about",
            "https://elsewhere.org/contact",
        ]));
        let base = Url::parse("https://www.example.com").unwrap();
        let planned = scraper.plan_urls(&base);

        let planned_strs: Vec<String> = planned.iter().map(|u| u.to_string()).collect();
        assert_eq!(planned_strs[0], "https://www.example.com/");
        assert!(planned_strs.contains(&"https://www.example.com/contact".to_string()));
        assert!(planned_strs.contains(&"https://www.example.com/about".to_string()));
        assert!(
            !planned_strs.iter().any(|u| u.contains("elsewhere.org")),
            "cross-domain URLs must be dropped"
        );
    }

    #[tokio::test]
    async fn test_plan_urls_deduplicates() {
        let scraper = test_scraper(test_config(vec!["/contact", "/contact"]));
        let base = Url::parse("https://example.com").unwrap();
        assert_eq!(scraper.plan_urls(&base).len(), 2);
    }

    async fn serve_one(listener: &TcpListener, status_line: &str, content_type: &str, body: &str) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 2048];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            content_type,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_scrape_site_collects_emails_and_tolerates_404() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            serve_one(
                &listener,
                "200 OK",
                "text/html; charset=utf-8",
                r#"<html><body><a href="mailto:Info@Example.com">mail</a></body></html>"#,
            )
            .await;
            serve_one(&listener, "404 Not Found", "text/html", "gone").await;
        });

        let scraper = test_scraper(test_config(vec!["/contact"]));
        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        let emails = scraper.scrape_site(&base).await.unwrap();

        assert_eq!(emails, vec!["info@example.com".to_string()]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_scrape_site_skips_non_html() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            serve_one(
                &listener,
                "200 OK",
                "application/json",
                r#"{"contact":"hidden@example.com"}"#,
            )
            .await;
        });

        let scraper = test_scraper(test_config(vec![]));
        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        let emails = scraper.scrape_site(&base).await.unwrap();

        assert!(emails.is_empty(), "non-HTML bodies must not be parsed");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_scrape_site_fails_when_every_url_fails() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let scraper = test_scraper(test_config(vec![]));
        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        assert!(matches!(
            scraper.scrape_site(&base).await,
            Err(AppError::Scrape(_))
        ));
    }
}
