//! # MailBeacon
//!
//! A service that discovers and verifies professional email addresses from
//! contact names and company websites. Runs as an HTTP API by default, or as
//! a one-shot CLI lookup with `--name` and `--domain`.

#![warn(missing_docs, unreachable_pub, rust_2018_idioms)]

mod api;
mod beacon;
mod config;
mod dns;
mod domain;
mod error;
mod extract;
mod models;
mod patterns;
mod processor;
mod scraper;
mod smtp;

use crate::beacon::MailBeacon;
use crate::config::AppArgs;
use crate::models::Contact;
use crate::processor::process_record;

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default tracing subscriber failed");

    tracing::info!(
        "Logging initialized. Starting MailBeacon v{}...",
        env!("CARGO_PKG_VERSION")
    );

    let args = AppArgs::parse();
    let config = Arc::new(config::build_config(&args).context("Failed to build configuration")?);
    tracing::debug!("Using configuration: {:?}", config);

    let beacon = Arc::new(MailBeacon::new(config.clone())?);

    if let Err(e) = smtp::check_smtp_connectivity(config.smtp_timeout).await {
        tracing::warn!("SMTP connectivity test failed: {}", e);
        tracing::warn!(
            "Outbound port 25 looks blocked; SMTP verification will likely stay inconclusive."
        );
        tracing::warn!(
            "Consider running on a network or cloud host that allows outbound port 25."
        );
    }

    if let (Some(name), Some(domain_input)) = (args.name.as_deref(), args.domain.as_deref()) {
        return run_single_lookup(&beacon, name, domain_input).await;
    }

    let ip: IpAddr = args
        .host
        .parse()
        .with_context(|| format!("Invalid host address: {}", args.host))?;
    api::serve(beacon, SocketAddr::new(ip, args.port)).await;

    Ok(())
}

/// One-shot CLI mode: process a single contact and print the JSON result.
async fn run_single_lookup(beacon: &MailBeacon, name: &str, domain_input: &str) -> Result<()> {
    tracing::info!("Finding email for name: {}, domain: {}", name, domain_input);

    let contact = Contact {
        first_name: None,
        last_name: None,
        full_name: Some(name.to_string()),
        domain: Some(domain_input.to_string()),
        company_domain: None,
        company: None,
        other_fields: HashMap::new(),
    };

    let result = process_record(beacon, contact).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(email) = &result.email {
        tracing::info!(
            "Most likely email: {} (Confidence: {}/10)",
            email,
            result.email_confidence.unwrap_or_default()
        );
    } else if let Some(reason) = &result.email_finding_reason {
        tracing::warn!("Record skipped: {}", reason);
    } else {
        tracing::info!("No high-confidence email found.");
    }

    Ok(())
}
