//! DNS lookups for mail routing (MX records with A-record fallback).

use crate::config::Config;
use crate::error::{AppError, Result};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{
    LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts,
};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::proto::op::ResponseCode;

/// Preference assigned when falling back to an A record (lowest priority).
pub(crate) const A_RECORD_FALLBACK_PREFERENCE: u16 = u16::MAX;

/// Represents the result of a mail server lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MailServer {
    /// The domain name or IP address of the mail server.
    pub exchange: String,
    /// The preference value (lower is more preferred), typically from MX records.
    /// Will be `u16::MAX` if derived from an A record.
    pub preference: u16,
}

/// A configured DNS resolver, constructed once and shared across requests.
pub(crate) struct Resolver {
    inner: TokioAsyncResolver,
}

impl Resolver {
    /// Builds a resolver against the configured nameservers, allowing UDP with
    /// TCP fallback for each.
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let mut resolver_config = ResolverConfig::new();

        for server_str in &config.dns_servers {
            let ip_addr = IpAddr::from_str(server_str).map_err(|e| {
                tracing::error!(
                    "Invalid DNS server IP address in config: '{}' - {}",
                    server_str,
                    e
                );
                AppError::Config(format!("Invalid DNS server IP address: {}", server_str))
            })?;
            let socket_addr = SocketAddr::new(ip_addr, 53);
            for protocol in [Protocol::Udp, Protocol::Tcp] {
                resolver_config.add_name_server(NameServerConfig {
                    socket_addr,
                    protocol,
                    tls_dns_name: None,
                    trust_negative_responses: true,
                    bind_addr: None,
                });
            }
        }

        let mut resolver_opts = ResolverOpts::default();
        resolver_opts.timeout = config.dns_timeout;
        resolver_opts.attempts = 2;
        resolver_opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

        let inner = TokioAsyncResolver::tokio(resolver_config, resolver_opts);
        tracing::debug!("DNS resolver configured with {} nameservers.", config.dns_servers.len());
        Ok(Self { inner })
    }

    /// Resolves the mail server for a domain, checking MX records first and
    /// falling back to an A record when the MX set is empty.
    pub(crate) async fn resolve_mail_server(&self, domain: &str) -> Result<MailServer> {
        tracing::debug!("Performing DNS MX lookup for {}", domain);

        match self.inner.mx_lookup(domain).await {
            Ok(mx_response) => {
                let mut mx_records: Vec<_> = mx_response.iter().collect();
                if mx_records.is_empty() {
                    tracing::warn!(
                        "No MX records returned by resolver for {}, though lookup succeeded.",
                        domain
                    );
                    return self.a_record_fallback(domain).await;
                }

                mx_records.sort_by_key(|r| r.preference());

                let best_mx = mx_records[0];
                let exchange = best_mx
                    .exchange()
                    .to_utf8()
                    .trim_end_matches('.')
                    .to_string();
                let preference = best_mx.preference();

                if exchange.is_empty() {
                    tracing::error!(
                        "Empty mail server name found in highest priority MX record for {}",
                        domain
                    );
                    return Err(AppError::NoDnsRecords(format!(
                        "Empty exchange in MX record for {}",
                        domain
                    )));
                }

                tracing::info!("Found MX for {}: {} (Pref: {})", domain, exchange, preference);
                Ok(MailServer {
                    exchange,
                    preference,
                })
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. }
                    if *response_code == ResponseCode::NXDomain =>
                {
                    tracing::error!("Domain {} does not exist (NXDOMAIN)", domain);
                    Err(AppError::NxDomain(domain.to_string()))
                }
                ResolveErrorKind::NoRecordsFound { .. } => {
                    tracing::warn!(
                        "No MX records found (NoAnswer) for {}. Trying A record fallback...",
                        domain
                    );
                    self.a_record_fallback(domain).await
                }
                ResolveErrorKind::Timeout => {
                    tracing::error!("DNS resolution timeout for {}", domain);
                    Err(AppError::DnsTimeout(domain.to_string()))
                }
                _ => {
                    tracing::error!("Unexpected DNS resolution error for {}: {}", domain, e);
                    Err(AppError::Dns(e))
                }
            },
        }
    }

    /// Attempts to resolve an A record for the domain as a fallback mail server.
    async fn a_record_fallback(&self, domain: &str) -> Result<MailServer> {
        tracing::debug!("Attempting A record fallback for {}", domain);
        match self.inner.lookup_ip(domain).await {
            Ok(a_response) => match a_response.iter().next() {
                Some(ip_addr) => {
                    let mail_server_ip = ip_addr.to_string();
                    tracing::info!(
                        "Using A record for {} as mail server: {}",
                        domain,
                        mail_server_ip
                    );
                    Ok(MailServer {
                        exchange: mail_server_ip,
                        preference: A_RECORD_FALLBACK_PREFERENCE,
                    })
                }
                None => {
                    tracing::error!("No MX or A records found for {}", domain);
                    Err(AppError::NoDnsRecords(domain.to_string()))
                }
            },
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. }
                    if *response_code == ResponseCode::NXDomain =>
                {
                    tracing::error!(
                        "Domain {} does not exist (NXDOMAIN) during A record fallback",
                        domain
                    );
                    Err(AppError::NxDomain(domain.to_string()))
                }
                ResolveErrorKind::NoRecordsFound { .. } => {
                    tracing::error!("No MX records found, and no A records found either for {}", domain);
                    Err(AppError::NoDnsRecords(domain.to_string()))
                }
                ResolveErrorKind::Timeout => {
                    tracing::error!("DNS timeout during A record fallback for {}", domain);
                    Err(AppError::DnsTimeout(format!(
                        "A record fallback for {}",
                        domain
                    )))
                }
                _ => {
                    tracing::error!(
                        "A record fallback failed for {} after NoAnswer MX: {}",
                        domain,
                        e
                    );
                    Err(AppError::Dns(e))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_resolver_rejects_invalid_nameserver() {
        let mut config = Config::default();
        config.dns_servers = vec!["not-an-ip".to_string()];
        assert!(matches!(Resolver::new(&config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_resolver_builds_from_defaults() {
        let config = Config::default();
        assert!(Resolver::new(&config).is_ok());
    }

    #[test]
    fn test_a_record_fallback_preference_is_sentinel() {
        assert_eq!(A_RECORD_FALLBACK_PREFERENCE, 65535);
    }
}
