//! Verifies email address existence via the SMTP RCPT TO handshake.
//!
//! The dialog stops before DATA: connect, EHLO, MAIL FROM, RCPT TO (plus a
//! random-local RCPT to sample for catch-all behaviour), QUIT.

use crate::config::Config;
use crate::dns::MailServer;
use crate::error::{AppError, Result};
use crate::models::{SmtpVerificationResult, VerificationOutcome, VerificationStatus};
use futures::FutureExt;
use futures::future::BoxFuture;
use lettre::Address;
use rand::Rng;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Fixed cap on the QUIT exchange; errors during QUIT are ignored.
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Reply phrases that mark a 5xx rejection as "user unknown" rather than policy.
const REJECTION_PHRASES: [&str; 11] = [
    "unknown",
    "no such",
    "unavailable",
    "rejected",
    "doesn't exist",
    "disabled",
    "invalid address",
    "recipient not found",
    "user unknown",
    "mailbox unavailable",
    "no mailbox",
];

/// A parsed SMTP server reply (multiline replies are joined).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SmtpReply {
    pub code: u16,
    pub message: String,
}

impl SmtpReply {
    fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// One SMTP conversation over an arbitrary byte stream. Every read and write
/// is bounded by the configured command timeout.
struct SmtpDialog<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    command_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite> SmtpDialog<S> {
    fn new(stream: S, command_timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            command_timeout,
        }
    }

    async fn read_reply(&mut self) -> Result<SmtpReply> {
        let mut code = 0u16;
        let mut parts: Vec<String> = Vec::new();

        loop {
            let mut line = String::new();
            let n = timeout(self.command_timeout, self.reader.read_line(&mut line))
                .await
                .map_err(|_| {
                    AppError::SmtpTimeout("Timed out waiting for server reply".to_string())
                })??;
            if n == 0 {
                return Err(AppError::SmtpConnect(
                    "Connection closed by server".to_string(),
                ));
            }

            let line = line.trim_end_matches(['\r', '\n']);
            code = line
                .get(..3)
                .and_then(|prefix| prefix.parse().ok())
                .ok_or_else(|| AppError::SmtpCommand {
                    code: 0,
                    message: format!("Malformed reply line: '{}'", line),
                })?;

            let continued = line.as_bytes().get(3) == Some(&b'-');
            if let Some(text) = line.get(4..) {
                parts.push(text.to_string());
            }
            if !continued {
                break;
            }
        }

        Ok(SmtpReply {
            code,
            message: parts.join(" "),
        })
    }

    async fn command(&mut self, cmd: &str) -> Result<SmtpReply> {
        timeout(self.command_timeout, async {
            self.writer.write_all(cmd.as_bytes()).await?;
            self.writer.write_all(b"\r\n").await?;
            self.writer.flush().await
        })
        .await
        .map_err(|_| AppError::SmtpTimeout(format!("Timed out sending command: {}", cmd)))??;

        self.read_reply().await
    }

    async fn quit(&mut self) {
        let _ = timeout(QUIT_TIMEOUT, async {
            self.writer.write_all(b"QUIT\r\n").await?;
            self.writer.flush().await?;
            let mut line = String::new();
            let _ = self.reader.read_line(&mut line).await;
            Ok::<_, std::io::Error>(())
        })
        .await;
    }
}

/// Generates a random local part for catch-all detection.
fn random_local_part(length: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Interprets the RCPT TO reply for the target address.
fn classify_rcpt_reply(reply: &SmtpReply, is_catch_all: bool) -> SmtpVerificationResult {
    match reply.code {
        200..=299 => {
            if is_catch_all {
                SmtpVerificationResult::inconclusive_retry(format!(
                    "SMTP accepted (Possible Catch-All): {} {}",
                    reply.code, reply.message
                ))
                .with_catch_all()
            } else {
                SmtpVerificationResult::conclusive(
                    true,
                    format!("SMTP Verification OK: {} {}", reply.code, reply.message),
                    false,
                )
            }
        }
        300..=399 => SmtpVerificationResult::inconclusive_retry(format!(
            "SMTP Unexpected Intermediate Code: {} {}",
            reply.code, reply.message
        )),
        400..=499 => SmtpVerificationResult::inconclusive_retry(format!(
            "SMTP Temp Failure/Greylisted? (4xx): {} {}",
            reply.code, reply.message
        )),
        500..=599 => {
            let message_lower = reply.message.to_lowercase();
            let user_unknown = [550, 551, 553].contains(&reply.code)
                || REJECTION_PHRASES.iter().any(|p| message_lower.contains(p));

            if user_unknown {
                SmtpVerificationResult::conclusive(
                    false,
                    format!(
                        "SMTP Rejected (User Likely Unknown): {} {}",
                        reply.code, reply.message
                    ),
                    false,
                )
            } else {
                SmtpVerificationResult::conclusive(
                    false,
                    format!(
                        "SMTP Rejected (Policy/Other 5xx): {} {}",
                        reply.code, reply.message
                    ),
                    false,
                )
            }
        }
        _ => SmtpVerificationResult::inconclusive_retry(format!(
            "Unexpected SMTP reply: {} {}",
            reply.code, reply.message
        )),
    }
}

/// Maps transport-level dialog failures onto verification results.
fn classify_transport_error(error: &AppError) -> SmtpVerificationResult {
    match error {
        AppError::SmtpTimeout(msg) => {
            SmtpVerificationResult::inconclusive_retry(format!("SMTP operation timed out: {}", msg))
        }
        AppError::Io(e) => {
            SmtpVerificationResult::inconclusive_retry(format!("Socket error: {}", e))
        }
        AppError::SmtpConnect(msg) => {
            SmtpVerificationResult::inconclusive_retry(format!("Connection error: {}", msg))
        }
        other => {
            SmtpVerificationResult::inconclusive_retry(format!("Unhandled SMTP error: {}", other))
        }
    }
}

/// Runs the full probe conversation over an established stream.
async fn run_probe<S: AsyncRead + AsyncWrite>(
    stream: S,
    email: &str,
    domain: &str,
    config: &Config,
) -> SmtpVerificationResult {
    let mut dialog = SmtpDialog::new(stream, config.smtp_timeout);
    let outcome = probe_steps(&mut dialog, email, domain, config).await;
    dialog.quit().await;

    match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(target: "smtp_task", "SMTP dialog error for {}: {}", email, e);
            classify_transport_error(&e)
        }
    }
}

async fn probe_steps<S: AsyncRead + AsyncWrite>(
    dialog: &mut SmtpDialog<S>,
    email: &str,
    domain: &str,
    config: &Config,
) -> Result<SmtpVerificationResult> {
    let banner = dialog.read_reply().await?;
    if banner.code >= 400 {
        tracing::warn!(target: "smtp_task", "Server banner rejected session: {} {}", banner.code, banner.message);
        return Ok(SmtpVerificationResult::inconclusive_retry(format!(
            "SMTP banner rejected session: {} {}",
            banner.code, banner.message
        )));
    }

    let ehlo = dialog
        .command(&format!("EHLO {}", config.smtp_helo_name))
        .await?;
    if !ehlo.is_positive() {
        tracing::warn!(target: "smtp_task", "EHLO failed: {} {}", ehlo.code, ehlo.message);
        return Ok(SmtpVerificationResult::inconclusive_retry(format!(
            "HELO/EHLO failed: {} {}",
            ehlo.code, ehlo.message
        )));
    }

    tracing::debug!(target: "smtp_task", "Sending MAIL FROM:<{}>...", config.smtp_sender_email);
    let mail = dialog
        .command(&format!("MAIL FROM:<{}>", config.smtp_sender_email))
        .await?;
    if mail.code >= 400 {
        tracing::error!(target: "smtp_task",
            "SMTP sender '{}' rejected: {} {}",
            config.smtp_sender_email, mail.code, mail.message
        );
        let message_lower = mail.message.to_lowercase();
        if message_lower.contains("starttls") || (mail.code == 530 && message_lower.contains("5.7.0"))
        {
            return Ok(SmtpVerificationResult::inconclusive_retry(format!(
                "Server requires STARTTLS: {} {}",
                mail.code, mail.message
            )));
        }
        return Ok(SmtpVerificationResult::inconclusive_no_retry(format!(
            "MAIL FROM rejected: {} {}",
            mail.code, mail.message
        )));
    }

    tracing::debug!(target: "smtp_task", "Sending RCPT TO:<{}>...", email);
    let rcpt = dialog.command(&format!("RCPT TO:<{}>", email)).await?;
    tracing::info!(target: "smtp_task",
        "RCPT TO:<{}> result: Code={}, Msg='{}'",
        email, rcpt.code, rcpt.message
    );

    // Catch-all sampling always follows, never precedes, the real RCPT TO.
    let mut is_catch_all = false;
    if rcpt.is_positive() {
        let random_email = format!("{}@{}", random_local_part(12), domain);
        tracing::debug!(target: "smtp_task", "Checking for catch-all with: RCPT TO:<{}>", random_email);
        match dialog.command(&format!("RCPT TO:<{}>", random_email)).await {
            Ok(reply) if reply.is_positive() => {
                is_catch_all = true;
                tracing::warn!(target: "smtp_task",
                    "Domain {} appears to be a catch-all (accepted random user {} with code {})",
                    domain, random_email, reply.code
                );
            }
            Ok(reply) => {
                tracing::debug!(target: "smtp_task",
                    "Catch-all check negative (random user rejected with code {})", reply.code
                );
            }
            Err(e) => {
                tracing::warn!(target: "smtp_task", "Error during catch-all RCPT TO check (ignoring): {}", e);
            }
        }
    }

    Ok(classify_rcpt_reply(&rcpt, is_catch_all))
}

/// Runs up to `max_verification_attempts` attempts, stopping early on any
/// conclusive verdict or non-retriable inconclusive result.
async fn run_with_retries<'a, F>(
    config: &Config,
    email: &str,
    mail_server: &MailServer,
    mut attempt_fn: F,
) -> VerificationOutcome
where
    F: FnMut(u32) -> BoxFuture<'a, SmtpVerificationResult>,
{
    let mut outcome = VerificationOutcome {
        status: VerificationStatus::Inconclusive,
        message: "SMTP check did not run or complete".to_string(),
        is_catch_all: false,
    };

    for attempt in 0..config.max_verification_attempts {
        tracing::info!(target: "smtp_task",
            "Attempt {}/{} SMTP check for {} via {}",
            attempt + 1,
            config.max_verification_attempts,
            email,
            mail_server.exchange
        );

        let result = attempt_fn(attempt).await;
        outcome.status = result.status;
        outcome.message = result.message.clone();
        outcome.is_catch_all = result.is_catch_all;

        if result.status.is_conclusive() {
            tracing::debug!(target: "smtp_task",
                "SMTP check conclusive ({:?}) on attempt {}.",
                result.status, attempt + 1
            );
            break;
        }

        if !result.should_retry {
            tracing::warn!(target: "smtp_task",
                "SMTP check failed with non-retriable status on attempt {}. Stopping. Msg: {}",
                attempt + 1, result.message
            );
            break;
        }

        tracing::warn!(target: "smtp_task",
            "SMTP check inconclusive on attempt {}. Message: {}",
            attempt + 1, result.message
        );

        if attempt < config.max_verification_attempts - 1 {
            let sleep_duration = config.random_sleep();
            tracing::debug!(target: "smtp_task", "Sleeping {:?} before next SMTP attempt.", sleep_duration);
            tokio::time::sleep(sleep_duration).await;
        }
    }

    tracing::info!(target: "smtp_task",
        "Final SMTP verification result for {}: Status={:?}, Msg='{}', CatchAll={}",
        email, outcome.status, outcome.message, outcome.is_catch_all
    );

    outcome
}

/// Probes candidate addresses against a resolved mail exchanger.
#[derive(Debug, Clone)]
pub(crate) struct SmtpVerifier {
    config: Arc<Config>,
    port: u16,
}

impl SmtpVerifier {
    pub(crate) fn new(config: Arc<Config>) -> Self {
        Self { config, port: 25 }
    }

    #[cfg(test)]
    fn with_port(config: Arc<Config>, port: u16) -> Self {
        Self { config, port }
    }

    async fn verify_attempt(
        &self,
        email: &str,
        domain: &str,
        mail_server: &MailServer,
    ) -> SmtpVerificationResult {
        tracing::debug!(target: "smtp_task",
            "Starting SMTP check for {} via {} (Domain: {})",
            email, mail_server.exchange, domain
        );

        if let Err(e) = Address::from_str(email) {
            tracing::warn!(target: "smtp_task", "Invalid recipient email format '{}': {}", email, e);
            return SmtpVerificationResult::conclusive(
                false,
                format!("Invalid email format: {}", e),
                false,
            );
        }

        let endpoint = format!("{}:{}", mail_server.exchange, self.port);
        let stream = match timeout(
            self.config.smtp_timeout,
            TcpStream::connect((mail_server.exchange.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::error!(target: "smtp_task",
                    "Connection to {} refused. Port 25 is likely blocked by your ISP or network.",
                    endpoint
                );
                return SmtpVerificationResult::inconclusive_no_retry(format!(
                    "Connection refused by {} (port 25 likely blocked)",
                    mail_server.exchange
                ));
            }
            Ok(Err(e)) => {
                tracing::warn!(target: "smtp_task", "SMTP connection failed for {}: {}", endpoint, e);
                return SmtpVerificationResult::inconclusive_retry(format!(
                    "Connection failed: {}",
                    e
                ));
            }
            Err(_) => {
                tracing::error!(target: "smtp_task",
                    "Connection to {} timed out. Port 25 is likely blocked by your ISP or network.",
                    endpoint
                );
                return SmtpVerificationResult::inconclusive_no_retry(format!(
                    "Connection to {} timed out (port 25 likely blocked)",
                    mail_server.exchange
                ));
            }
        };

        tracing::debug!(target: "smtp_task", "SMTP connection established to {}", endpoint);
        run_probe(stream, email, domain, &self.config).await
    }

    /// Verifies an email against an already-resolved mail server, with retries
    /// for inconclusive results.
    pub(crate) async fn verify_email(
        &self,
        email: &str,
        mail_server: &MailServer,
    ) -> VerificationOutcome {
        let domain = email.rsplit('@').next().unwrap_or("").to_string();

        run_with_retries(&self.config, email, mail_server, |_attempt| {
            let domain = domain.clone();
            let email = email.to_string();
            let mail_server = mail_server.clone();
            async move { self.verify_attempt(&email, &domain, &mail_server).await }.boxed()
        })
        .await
    }
}

/// Startup probe: checks whether outbound port 25 is reachable at all by
/// connecting to a well-known public mail exchanger.
pub(crate) async fn check_smtp_connectivity(connect_timeout: Duration) -> Result<()> {
    tracing::info!("Testing SMTP connectivity...");

    match timeout(
        connect_timeout,
        TcpStream::connect(("gmail-smtp-in.l.google.com", 25)),
    )
    .await
    {
        Ok(Ok(_)) => {
            tracing::info!("SMTP connectivity test successful");
            Ok(())
        }
        Ok(Err(e)) => Err(AppError::SmtpConnect(format!(
            "Could not reach a public mail exchanger on port 25: {}",
            e
        ))),
        Err(_) => Err(AppError::SmtpTimeout(
            "SMTP connection timed out - port 25 is likely blocked by your ISP or network provider"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    fn reply(code: u16, message: &str) -> SmtpReply {
        SmtpReply {
            code,
            message: message.to_string(),
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.sleep_between_requests = (0.0, 0.0);
        config
    }

    #[test]
    fn test_classify_accepts_clean_250_as_verified() {
        let result = classify_rcpt_reply(&reply(250, "2.1.5 OK"), false);
        assert_eq!(result.status, VerificationStatus::Verified);
        assert!(!result.is_catch_all);
    }

    #[test]
    fn test_classify_catch_all_acceptance_is_inconclusive() {
        let result = classify_rcpt_reply(&reply(250, "2.1.5 OK"), true);
        assert_eq!(result.status, VerificationStatus::Inconclusive);
        assert!(result.is_catch_all);
        assert!(result.should_retry);
    }

    #[test]
    fn test_classify_4xx_is_retriable_inconclusive() {
        let result = classify_rcpt_reply(&reply(451, "greylisted, try later"), false);
        assert_eq!(result.status, VerificationStatus::Inconclusive);
        assert!(result.should_retry);
    }

    #[test]
    fn test_classify_3xx_is_retriable_inconclusive() {
        let result = classify_rcpt_reply(&reply(354, "unexpected"), false);
        assert_eq!(result.status, VerificationStatus::Inconclusive);
        assert!(result.should_retry);
    }

    #[test]
    fn test_classify_user_unknown_rejections() {
        for r in [
            reply(550, "5.1.1 whatever"),
            reply(551, "user not local"),
            reply(553, "bad mailbox name"),
            reply(554, "recipient not found"),
            reply(552, "no mailbox here"),
        ] {
            let result = classify_rcpt_reply(&r, false);
            assert_eq!(result.status, VerificationStatus::Rejected, "reply: {:?}", r);
            assert!(result.message.contains("User Likely Unknown"), "reply: {:?}", r);
        }
    }

    #[test]
    fn test_classify_other_5xx_is_policy_rejection() {
        let result = classify_rcpt_reply(&reply(554, "transaction failed"), false);
        assert_eq!(result.status, VerificationStatus::Rejected);
        assert!(result.message.contains("Policy/Other 5xx"));
    }

    #[test]
    fn test_random_local_part_shape() {
        let local = random_local_part(12);
        assert_eq!(local.len(), 12);
        assert!(local.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_read_reply_joins_multiline() {
        let (client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(b"250-mx.test greets you\r\n250-SIZE 35882577\r\n250 PIPELINING\r\n")
            .await
            .unwrap();

        let mut dialog = SmtpDialog::new(client, Duration::from_secs(1));
        let reply = dialog.read_reply().await.unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.message, "mx.test greets you SIZE 35882577 PIPELINING");
    }

    #[tokio::test]
    async fn test_read_reply_times_out() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut dialog = SmtpDialog::new(client, Duration::from_millis(50));
        assert!(matches!(
            dialog.read_reply().await,
            Err(AppError::SmtpTimeout(_))
        ));
    }

    /// Scripted replies for one server-side conversation.
    struct ServerScript {
        mail_reply: &'static str,
        rcpt_target_reply: &'static str,
        rcpt_other_reply: &'static str,
    }

    async fn run_scripted_server(
        stream: DuplexStream,
        script: ServerScript,
        target: String,
        transcript: Arc<Mutex<Vec<String>>>,
    ) {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"220 mx.test ESMTP ready\r\n").await.unwrap();

        let mut line = String::new();
        loop {
            line.clear();
            let n = match reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(_) => break,
            };
            if n == 0 {
                break;
            }
            let cmd = line.trim_end().to_string();
            transcript.lock().unwrap().push(cmd.clone());

            let reply: String = if cmd.starts_with("EHLO") {
                "250-mx.test\r\n250 PIPELINING\r\n".to_string()
            } else if cmd.starts_with("MAIL FROM") {
                format!("{}\r\n", script.mail_reply)
            } else if cmd.starts_with("RCPT TO") {
                if cmd.contains(&target) {
                    format!("{}\r\n", script.rcpt_target_reply)
                } else {
                    format!("{}\r\n", script.rcpt_other_reply)
                }
            } else if cmd.starts_with("QUIT") {
                "221 bye\r\n".to_string()
            } else {
                "502 command not implemented\r\n".to_string()
            };

            if write_half.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
            if cmd.starts_with("QUIT") {
                break;
            }
        }
    }

    async fn run_scripted_probe(
        script: ServerScript,
        email: &str,
    ) -> (SmtpVerificationResult, Vec<String>) {
        let config = test_config();
        let (client, server) = tokio::io::duplex(4096);
        let transcript = Arc::new(Mutex::new(Vec::new()));

        let server_task = tokio::spawn(run_scripted_server(
            server,
            script,
            email.to_string(),
            transcript.clone(),
        ));

        let result = run_probe(client, email, "example.com", &config).await;
        server_task.await.unwrap();

        let transcript = transcript.lock().unwrap().clone();
        (result, transcript)
    }

    #[tokio::test]
    async fn test_probe_verified_when_catch_all_sample_rejected() {
        let (result, transcript) = run_scripted_probe(
            ServerScript {
                mail_reply: "250 OK",
                rcpt_target_reply: "250 2.1.5 OK",
                rcpt_other_reply: "550 5.1.1 user unknown",
            },
            "john.doe@example.com",
        )
        .await;

        assert_eq!(result.status, VerificationStatus::Verified);
        assert!(!result.is_catch_all);

        let rcpts = transcript.iter().filter(|c| c.starts_with("RCPT")).count();
        assert_eq!(rcpts, 2, "target RCPT plus one catch-all sample");
        assert!(
            transcript.iter().all(|c| !c.starts_with("DATA")),
            "the dialog must never transmit DATA"
        );
        assert!(transcript.iter().any(|c| c.starts_with("QUIT")));

        // The catch-all probe always comes after the real recipient.
        let target_pos = transcript
            .iter()
            .position(|c| c.contains("john.doe@example.com"))
            .unwrap();
        let sample_pos = transcript
            .iter()
            .position(|c| c.starts_with("RCPT") && !c.contains("john.doe@example.com"))
            .unwrap();
        assert!(target_pos < sample_pos);
    }

    #[tokio::test]
    async fn test_probe_catch_all_acceptance_is_inconclusive() {
        let (result, transcript) = run_scripted_probe(
            ServerScript {
                mail_reply: "250 OK",
                rcpt_target_reply: "250 2.1.5 OK",
                rcpt_other_reply: "250 2.1.5 OK",
            },
            "john.doe@example.com",
        )
        .await;

        assert_eq!(result.status, VerificationStatus::Inconclusive);
        assert!(result.is_catch_all);
        assert!(transcript.iter().all(|c| !c.starts_with("DATA")));
    }

    #[tokio::test]
    async fn test_probe_rejection_skips_catch_all_sample() {
        let (result, transcript) = run_scripted_probe(
            ServerScript {
                mail_reply: "250 OK",
                rcpt_target_reply: "550 5.1.1 no such user",
                rcpt_other_reply: "250 2.1.5 OK",
            },
            "ghost@example.com",
        )
        .await;

        assert_eq!(result.status, VerificationStatus::Rejected);
        let rcpts = transcript.iter().filter(|c| c.starts_with("RCPT")).count();
        assert_eq!(rcpts, 1, "no catch-all sample after a rejection");
    }

    #[tokio::test]
    async fn test_probe_starttls_requirement_is_retriable() {
        let (result, _) = run_scripted_probe(
            ServerScript {
                mail_reply: "530 5.7.0 Must issue a STARTTLS command first",
                rcpt_target_reply: "250 OK",
                rcpt_other_reply: "250 OK",
            },
            "john.doe@example.com",
        )
        .await;

        assert_eq!(result.status, VerificationStatus::Inconclusive);
        assert!(result.should_retry);
        assert!(result.message.contains("STARTTLS"));
    }

    #[tokio::test]
    async fn test_probe_mail_from_policy_rejection_not_retriable() {
        let (result, _) = run_scripted_probe(
            ServerScript {
                mail_reply: "550 5.7.1 sender denied",
                rcpt_target_reply: "250 OK",
                rcpt_other_reply: "250 OK",
            },
            "john.doe@example.com",
        )
        .await;

        assert_eq!(result.status, VerificationStatus::Inconclusive);
        assert!(!result.should_retry);
        assert!(result.message.contains("MAIL FROM rejected"));
    }

    #[tokio::test]
    async fn test_retry_loop_respects_attempt_cap() {
        let mut config = test_config();
        config.max_verification_attempts = 3;
        let mail_server = MailServer {
            exchange: "mx.test".to_string(),
            preference: 10,
        };

        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();
        let outcome = run_with_retries(&config, "a@b.co", &mail_server, move |_| {
            *calls_clone.lock().unwrap() += 1;
            async { SmtpVerificationResult::inconclusive_retry("451 try later".to_string()) }
                .boxed()
        })
        .await;

        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(outcome.status, VerificationStatus::Inconclusive);
    }

    #[tokio::test]
    async fn test_retry_loop_stops_on_conclusive_and_non_retriable() {
        let config = test_config();
        let mail_server = MailServer {
            exchange: "mx.test".to_string(),
            preference: 10,
        };

        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();
        let outcome = run_with_retries(&config, "a@b.co", &mail_server, move |_| {
            *calls_clone.lock().unwrap() += 1;
            async { SmtpVerificationResult::conclusive(true, "250 OK".to_string(), false) }.boxed()
        })
        .await;
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(outcome.status, VerificationStatus::Verified);

        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();
        let outcome = run_with_retries(&config, "a@b.co", &mail_server, move |_| {
            *calls_clone.lock().unwrap() += 1;
            async {
                SmtpVerificationResult::inconclusive_no_retry("connection blocked".to_string())
            }
            .boxed()
        })
        .await;
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(outcome.status, VerificationStatus::Inconclusive);
    }

    #[tokio::test]
    async fn test_verify_email_against_local_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let transcript = Arc::new(Mutex::new(Vec::new()));

        let server_transcript = transcript.clone();
        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = tokio::io::split(stream);
            let mut reader = BufReader::new(read_half);
            write_half.write_all(b"220 mx.test ESMTP ready\r\n").await.unwrap();
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let cmd = line.trim_end().to_string();
                server_transcript.lock().unwrap().push(cmd.clone());
                let reply: &[u8] = if cmd.starts_with("EHLO") {
                    b"250 mx.test\r\n"
                } else if cmd.starts_with("MAIL FROM") {
                    b"250 OK\r\n"
                } else if cmd.contains("jane.roe@acme.test") {
                    b"250 2.1.5 OK\r\n"
                } else if cmd.starts_with("RCPT") {
                    b"550 5.1.1 user unknown\r\n"
                } else {
                    b"221 bye\r\n"
                };
                write_half.write_all(reply).await.unwrap();
                if cmd.starts_with("QUIT") {
                    break;
                }
            }
        });

        let verifier = SmtpVerifier::with_port(Arc::new(test_config()), addr.port());
        let mail_server = MailServer {
            exchange: addr.ip().to_string(),
            preference: 10,
        };
        let outcome = verifier.verify_email("jane.roe@acme.test", &mail_server).await;
        server_task.await.unwrap();

        assert_eq!(outcome.status, VerificationStatus::Verified);
        assert!(!outcome.is_catch_all);
        let transcript = transcript.lock().unwrap();
        assert!(transcript.iter().all(|c| !c.starts_with("DATA")));
    }

    #[tokio::test]
    async fn test_verify_attempt_connection_refused_not_retriable() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let verifier = SmtpVerifier::with_port(Arc::new(test_config()), addr.port());
        let mail_server = MailServer {
            exchange: addr.ip().to_string(),
            preference: 10,
        };
        let result = verifier
            .verify_attempt("a@b.co", "b.co", &mail_server)
            .await;

        assert_eq!(result.status, VerificationStatus::Inconclusive);
        assert!(!result.should_retry);
        assert!(result.message.contains("refused"));
    }
}
