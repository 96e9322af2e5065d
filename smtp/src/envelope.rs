//! Per-message envelope state.
//!
//! [`Envelope`] is the set of operations a session needs from the message
//! it is currently building. [`AlertEnvelope`] is the production
//! implementation: it accumulates the body, scrapes the `Subject` and
//! `Date` headers and, once the message is complete, turns it into a
//! single alert delivered through an [`AlertClient`].

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use pigeon_utils::{scrape_header, AlertClient, AlertRequest, Diagnostics, ScrapedHeader};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{command::MailAddress, handler::RecipientPolicy};

/// Alert message used when the mail carried no or a blank `Subject` header.
pub const NO_SUBJECT: &str = "(no subject)";

/// Default bound on the accumulated message body, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 10_240_000;

/// Result type for envelope operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Boxed future type for envelope finalization, enabling object safety.
pub type EnvelopeFuture<'a> = Pin<Box<dyn Future<Output = EnvelopeResult<()>> + Send + 'a>>;

/// Errors surfaced by envelopes and mail handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// A complete SMTP reply line (code and text) to send verbatim.
    #[error("{0}")]
    Reply(String),

    /// The recipient admission policy vetoed the address.
    #[error("recipient rejected: {0}")]
    RecipientRejected(String),

    /// Any other failure, answered with the caller's generic reply.
    #[error("{0}")]
    Other(String),
}

/// Operations a session performs on the message it is building.
pub trait Envelope: Send {
    /// Admits a recipient, or refuses it leaving the envelope unchanged.
    fn add_recipient(&mut self, rcpt: MailAddress) -> EnvelopeResult<()>;

    /// Precondition check run before the body is streamed in.
    fn begin_data(&mut self) -> EnvelopeResult<()>;

    /// Ingests one body line, already dot-unescaped, CRLF included.
    fn write(&mut self, line: &[u8]) -> EnvelopeResult<()>;

    /// Finalizes the message once the body terminator was received.
    fn close(&mut self) -> EnvelopeFuture<'_>;
}

/// Read-only alert settings shared by every envelope of every session.
pub struct AlertContext {
    pub client: Arc<dyn AlertClient>,
    pub diagnostics: Arc<dyn Diagnostics>,

    /// Account the alerts are attributed to.
    pub target: String,

    pub tags: Vec<String>,
    pub source: Option<String>,

    /// Largest body accepted, larger messages are refused with 552.
    pub max_size: usize,
}

impl AlertContext {
    pub fn new(
        client: Arc<dyn AlertClient>,
        diagnostics: Arc<dyn Diagnostics>,
        target: String,
    ) -> Self {
        Self {
            client,
            diagnostics,
            target,
            tags: Vec::new(),
            source: None,
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

/// Envelope that turns the received message into an alert.
pub struct AlertEnvelope {
    from: MailAddress,
    recipients: Vec<MailAddress>,
    lines: Vec<String>,
    size: usize,
    subject: Option<String>,
    date: Option<DateTime<FixedOffset>>,
    context: Arc<AlertContext>,
    policy: Arc<dyn RecipientPolicy>,
}

impl AlertEnvelope {
    pub fn new(
        from: MailAddress,
        context: Arc<AlertContext>,
        policy: Arc<dyn RecipientPolicy>,
    ) -> Self {
        Self {
            from,
            recipients: Vec::new(),
            lines: Vec::new(),
            size: 0,
            subject: None,
            date: None,
            context,
            policy,
        }
    }

    pub fn from(&self) -> &MailAddress {
        &self.from
    }

    pub fn recipients(&self) -> &[MailAddress] {
        &self.recipients
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.date
    }

    /// Composes the alert note: body, timestamp and the two host snippets,
    /// one per line. `now` stands in for a missing `Date` header.
    pub fn compose_note(&self, uptime: &str, disk_usage: &str, now: DateTime<Utc>) -> String {
        let body = self.lines.concat();
        let date = self
            .date
            .unwrap_or_else(|| now.fixed_offset())
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        [body.as_str(), date.as_str(), uptime, disk_usage].join("\n")
    }

    /// Builds the request handed to the alert client.
    pub fn alert_request(&self, uptime: &str, disk_usage: &str, now: DateTime<Utc>) -> AlertRequest {
        let message = match self.subject.as_deref() {
            Some(subject) if !subject.is_empty() => subject.to_string(),
            _ => NO_SUBJECT.to_string(),
        };
        AlertRequest::new(
            message,
            self.compose_note(uptime, disk_usage, now),
            self.context.target.clone(),
        )
        .with_tags(self.context.tags.clone())
        .with_source(self.context.source.clone())
    }
}

impl Envelope for AlertEnvelope {
    fn add_recipient(&mut self, rcpt: MailAddress) -> EnvelopeResult<()> {
        self.policy
            .check(&rcpt)
            .map_err(EnvelopeError::RecipientRejected)?;
        self.recipients.push(rcpt);
        Ok(())
    }

    fn begin_data(&mut self) -> EnvelopeResult<()> {
        if self.recipients.is_empty() {
            return Err(EnvelopeError::Reply(
                "554 5.5.1 Error: no valid recipients".to_string(),
            ));
        }
        Ok(())
    }

    fn write(&mut self, line: &[u8]) -> EnvelopeResult<()> {
        if self.size + line.len() > self.context.max_size {
            return Err(EnvelopeError::Reply(
                "552 5.3.4 Message size exceeds fixed limit".to_string(),
            ));
        }
        self.size += line.len();

        let line = String::from_utf8_lossy(line).into_owned();
        match scrape_header(&line) {
            Some(ScrapedHeader::Subject(subject)) if self.subject.is_none() => {
                debug!(subject = %subject, "Captured subject");
                self.subject = Some(subject);
            }
            Some(ScrapedHeader::Date(date)) if self.date.is_none() => {
                debug!(date = ?date, "Captured date");
                self.date = date;
            }
            _ => {}
        }
        self.lines.push(line);
        Ok(())
    }

    fn close(&mut self) -> EnvelopeFuture<'_> {
        Box::pin(async move {
            let uptime = self.context.diagnostics.uptime().await;
            let disk_usage = self.context.diagnostics.disk_usage().await;
            let request = self.alert_request(&uptime, &disk_usage, Utc::now());

            let client = &self.context.client;
            match client.create(&request).await {
                Ok(id) => info!(
                    alert_id = %id,
                    client = client.name(),
                    from = %self.from,
                    message = %request.message,
                    "Alert created"
                ),
                Err(e) => error!(
                    client = client.name(),
                    from = %self.from,
                    message = %request.message,
                    error = %e,
                    "Failed to create alert"
                ),
            }
            Ok(())
        })
    }
}
