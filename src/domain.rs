//! Utility functions for handling domain names and URLs.

use crate::error::{AppError, Result};
use url::Url;

fn with_scheme(website_url_str: &str) -> String {
    if !website_url_str.starts_with("http://") && !website_url_str.starts_with("https://") {
        format!("https://{}", website_url_str)
    } else {
        website_url_str.to_string()
    }
}

/// Parses the input website string into a valid Url, adding an https scheme if necessary.
pub(crate) fn normalize_url(website_url_str: &str) -> Result<Url> {
    if website_url_str.is_empty() {
        return Err(AppError::InsufficientInput(
            "Website URL is empty".to_string(),
        ));
    }

    let url = Url::parse(&with_scheme(website_url_str))?;
    if url.host_str().is_none() {
        return Err(AppError::UrlParse(url::ParseError::EmptyHost));
    }
    Ok(url)
}

/// Extracts the base domain name (e.g., "example.com") from a given URL string.
/// Handles missing schemes, "www." prefixes, and ports.
pub(crate) fn extract_domain(website_url_str: &str) -> Result<String> {
    tracing::debug!("Attempting to extract domain from URL: {}", website_url_str);
    if website_url_str.is_empty() {
        tracing::warn!("Received empty website URL for domain extraction.");
        return Err(AppError::DomainExtraction(
            "Input URL string is empty".to_string(),
        ));
    }

    let url_str_with_scheme = with_scheme(website_url_str);
    let url = Url::parse(&url_str_with_scheme).map_err(|e| {
        tracing::error!(
            "Failed to parse URL '{}' (original: {}): {}",
            url_str_with_scheme,
            website_url_str,
            e
        );
        AppError::DomainExtraction(format!("Could not parse URL: {}", url_str_with_scheme))
    })?;

    // host_str excludes the port; only the www. prefix is left to strip.
    let host = url.host_str().ok_or_else(|| {
        tracing::warn!(
            "Could not extract host from parsed URL: {}",
            url_str_with_scheme
        );
        AppError::DomainExtraction(format!(
            "Could not extract host from parsed URL: {}",
            url_str_with_scheme
        ))
    })?;

    let domain = host.strip_prefix("www.").unwrap_or(host);
    let final_domain = domain.to_lowercase();

    if final_domain.is_empty() {
        return Err(AppError::DomainExtraction(format!(
            "Extracted domain is empty for URL: {}",
            website_url_str
        )));
    }

    tracing::debug!(
        "Extracted domain '{}' from '{}'",
        final_domain,
        website_url_str
    );
    Ok(final_domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain_simple() {
        assert_eq!(
            extract_domain("https://www.example.com").unwrap(),
            "example.com"
        );
        assert_eq!(extract_domain("http://example.com").unwrap(), "example.com");
        assert_eq!(extract_domain("example.com").unwrap(), "example.com");
    }

    #[test]
    fn test_extract_domain_edge_cases() {
        assert_eq!(extract_domain("www.example.com").unwrap(), "example.com");
        assert_eq!(
            extract_domain("https://EXAMPLE.com/path?query=1").unwrap(),
            "example.com"
        );
        assert_eq!(
            extract_domain("http://example.com:8080").unwrap(),
            "example.com"
        );
        assert_eq!(
            extract_domain("https://sub.domain.example.co.uk").unwrap(),
            "sub.domain.example.co.uk"
        );
    }

    #[test]
    fn test_extract_domain_invalid() {
        assert!(extract_domain("").is_err());
        assert!(extract_domain("http://").is_err());
    }

    #[test]
    fn test_normalize_url_adds_scheme() {
        let url = normalize_url("example.com").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("example.com"));

        let url = normalize_url("http://example.com/contact").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.path(), "/contact");
    }

    #[test]
    fn test_normalize_url_rejects_empty() {
        assert!(matches!(
            normalize_url(""),
            Err(AppError::InsufficientInput(_))
        ));
        assert!(matches!(normalize_url("http://"), Err(AppError::UrlParse(_))));
    }
}
