use std::{future::Future, io, sync::Arc, time::Duration};

use pigeon_utils::{system_hostname, SmtpConfig};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use crate::{
    command::{
        is_data_terminator, parse_mail_from, parse_rcpt_to, unescape_dot, CommandLine, LineError,
        MAX_COMMAND_LINE, MAX_DATA_LINE,
    },
    envelope::{Envelope, EnvelopeError, MAX_MESSAGE_SIZE},
    handler::{ConnectionInfo, MailHandler},
};

/// Product name announced in the greeting.
pub const PRODUCT: &str = "pigeon";

/// Message size advertised in the EHLO capability list.
pub const ADVERTISED_SIZE: usize = MAX_MESSAGE_SIZE;

/// Pause between the reply to a refused sender and closing the connection.
const HARD_CLOSE_DELAY: Duration = Duration::from_millis(100);

/// Settings shared read-only by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name announced in the greeting and EHLO reply.
    pub hostname: String,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,

    /// Advertise `AUTH PLAIN` (the mechanism itself is not implemented).
    pub plain_auth: bool,
}

impl SessionConfig {
    pub fn from_smtp(config: &SmtpConfig) -> Self {
        Self {
            hostname: config
                .hostname
                .clone()
                .or_else(system_hostname)
                .unwrap_or_else(|| "localhost".to_string()),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            plain_auth: config.plain_auth,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            read_timeout: None,
            write_timeout: None,
            plain_auth: false,
        }
    }
}

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out")]
    Timeout,

    #[error("data line exceeds {0} bytes")]
    DataLineTooLong(usize),

    #[error("connection closed during DATA")]
    UnexpectedEof,
}

/// Result of reading one bounded line.
#[derive(Debug, PartialEq, Eq)]
enum ReadLine {
    Line(Vec<u8>),
    TooLong,
    Eof,
}

/// Whether the session keeps reading commands after a handler.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Represents a single SMTP session, created for each incoming connection.
///
/// The session owns both halves of the connection, the greeting state and
/// the envelope of the message currently in flight, if any.
pub struct Session<R, W> {
    reader: R,
    writer: W,
    config: Arc<SessionConfig>,
    handler: Arc<dyn MailHandler>,
    conn: ConnectionInfo,
    envelope: Option<Box<dyn Envelope>>,
    hello: Option<String>,
}

impl<R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin> Session<R, W> {
    pub fn new(
        reader: R,
        writer: W,
        config: Arc<SessionConfig>,
        handler: Arc<dyn MailHandler>,
        conn: ConnectionInfo,
    ) -> Self {
        Self {
            reader,
            writer,
            config,
            handler,
            conn,
            envelope: None,
            hello: None,
        }
    }

    /// Drives the session until QUIT, end of input, or a transport error.
    pub async fn run(mut self) -> Result<(), SessionError> {
        if let Err(e) = self.handler.on_new_connection(&self.conn) {
            warn!(conn = %self.conn, error = %e, "Connection rejected");
            self.send_error_or(&e, "554 connection rejected").await?;
            return Ok(());
        }

        let greeting = format!("220 {} ESMTP {PRODUCT}", self.config.hostname);
        self.send_line(&greeting).await?;

        loop {
            let line = match self.read_line(MAX_COMMAND_LINE).await? {
                ReadLine::Line(line) => CommandLine::new(String::from_utf8_lossy(&line)),
                ReadLine::TooLong => {
                    self.send_line(&format!("500 {}", LineError::TooLong)).await?;
                    continue;
                }
                ReadLine::Eof => {
                    debug!(conn = %self.conn, "Client closed connection");
                    return Ok(());
                }
            };
            trace!(line = %line.raw().trim_end(), "<<");

            if let Err(e) = line.check_valid() {
                self.send_line(&format!("500 {e}")).await?;
                continue;
            }

            if self.dispatch(&line).await? == Flow::Close {
                return Ok(());
            }
        }
    }

    /// Base handler for the SMTP commands, maps each verb to its handler.
    async fn dispatch(&mut self, line: &CommandLine) -> Result<Flow, SessionError> {
        let verb = line.verb();
        match verb.as_str() {
            "HELO" | "EHLO" => self.handle_hello(&verb, line.arg()).await?,
            "QUIT" => {
                self.send_line("221 2.0.0 Bye").await?;
                return Ok(Flow::Close);
            }
            "RSET" => {
                self.envelope = None;
                self.send_line("250 2.0.0 OK").await?;
            }
            "NOOP" => self.send_line("250 2.0.0 OK").await?,
            "MAIL" => return self.handle_mail(line.arg()).await,
            "RCPT" => self.handle_rcpt(line.arg()).await?,
            "DATA" => self.handle_data().await?,
            _ => {
                debug!(verb = %verb, "Unrecognized command");
                self.send_line("502 5.5.2 Error: command not recognized")
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Name the client announced in HELO/EHLO, `unknown` before greeting.
    fn client_name(&self) -> &str {
        self.hello.as_deref().unwrap_or("unknown")
    }

    async fn handle_hello(&mut self, greeting: &str, host: &str) -> Result<(), SessionError> {
        debug!(greeting = %greeting, host = %host, "Client greeted");
        self.hello = Some(host.to_string());

        let size = format!("SIZE {ADVERTISED_SIZE}");
        let mut lines = vec![self.config.hostname.as_str()];
        if self.config.plain_auth {
            lines.push("AUTH PLAIN");
        }
        lines.extend([
            "PIPELINING",
            size.as_str(),
            "ENHANCEDSTATUSCODES",
            "8BITMIME",
            "DSN",
        ]);
        let lines: Vec<String> = lines.into_iter().map(str::to_string).collect();
        self.write_multiple(250, &lines).await
    }

    async fn handle_mail(&mut self, arg: &str) -> Result<Flow, SessionError> {
        let Some(from) = parse_mail_from(arg) else {
            debug!(arg = %arg, "Invalid MAIL argument");
            self.send_line("501 5.1.7 Bad sender address syntax")
                .await?;
            return Ok(Flow::Continue);
        };
        if self.envelope.is_some() {
            self.send_line("503 5.5.1 Error: nested MAIL command")
                .await?;
            return Ok(Flow::Continue);
        }

        match self.handler.on_new_mail(&self.conn, &from) {
            Ok(envelope) => {
                self.envelope = Some(envelope);
                self.send_line("250 2.1.0 Ok").await?;
                Ok(Flow::Continue)
            }
            Err(e) => {
                warn!(
                    from = %from,
                    client = %self.client_name(),
                    error = %e,
                    "Rejecting MAIL FROM"
                );
                self.send_error_or(&e, "451 denied").await?;
                tokio::time::sleep(HARD_CLOSE_DELAY).await;
                Ok(Flow::Close)
            }
        }
    }

    async fn handle_rcpt(&mut self, arg: &str) -> Result<(), SessionError> {
        let Some(envelope) = self.envelope.as_mut() else {
            return self.send_line("503 5.5.1 Error: need MAIL command").await;
        };
        let Some(rcpt) = parse_rcpt_to(arg) else {
            debug!(arg = %arg, "Invalid RCPT argument");
            return self.send_line("501 5.1.7 Bad recipient address syntax").await;
        };

        debug!(rcpt = %rcpt, "Adding recipient");
        match envelope.add_recipient(rcpt) {
            Ok(()) => self.send_line("250 2.1.5 Ok").await,
            Err(EnvelopeError::RecipientRejected(reason)) => {
                self.send_line(&format!("550 5.7.1 Recipient rejected: {reason}"))
                    .await
            }
            Err(e) => self.send_error_or(&e, "550 bad recipient").await,
        }
    }

    async fn handle_data(&mut self) -> Result<(), SessionError> {
        let Some(mut envelope) = self.envelope.take() else {
            return self.send_line("503 5.5.1 Error: need RCPT command").await;
        };
        if let Err(e) = envelope.begin_data() {
            return match e {
                EnvelopeError::Reply(reply) => {
                    self.envelope = Some(envelope);
                    self.send_line(&reply).await
                }
                e => {
                    warn!(error = %e, "Envelope refused DATA, dropping it");
                    self.send_line(&format!("451 4.3.0 Error: {e}")).await
                }
            };
        }

        self.send_line("354 Go ahead").await?;

        let mut failure = None;
        loop {
            let line = match self.read_line(MAX_DATA_LINE).await? {
                ReadLine::Line(line) => line,
                ReadLine::TooLong => return Err(SessionError::DataLineTooLong(MAX_DATA_LINE)),
                ReadLine::Eof => return Err(SessionError::UnexpectedEof),
            };
            if is_data_terminator(&line) {
                break;
            }
            if failure.is_some() {
                continue;
            }
            if let Err(e) = envelope.write(unescape_dot(&line)) {
                warn!(error = %e, "Envelope refused message data");
                failure = Some(e);
            }
        }

        if let Some(e) = failure {
            return self
                .send_error_or(&e, "550 5.0.0 Error: message data rejected")
                .await;
        }

        if let Err(e) = envelope.close().await {
            warn!(error = %e, "Envelope finalize failed");
        }
        info!(conn = %self.conn, client = %self.client_name(), "Message processed");
        self.send_line("250 2.0.0 Ok: queued").await
    }

    /// Sends the verbatim reply carried by `error`, or `fallback` otherwise.
    async fn send_error_or(
        &mut self,
        error: &EnvelopeError,
        fallback: &str,
    ) -> Result<(), SessionError> {
        match error {
            EnvelopeError::Reply(reply) => self.send_line(reply).await,
            _ => self.send_line(fallback).await,
        }
    }

    async fn read_line(&mut self, limit: usize) -> Result<ReadLine, SessionError> {
        with_deadline(
            self.config.read_timeout,
            read_bounded_line(&mut self.reader, limit),
        )
        .await
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        trace!(line = %line, ">>");
        let data = format!("{line}\r\n");
        let writer = &mut self.writer;
        with_deadline(self.config.write_timeout, async move {
            writer.write_all(data.as_bytes()).await?;
            writer.flush().await
        })
        .await
    }

    async fn write_multiple(&mut self, code: u16, messages: &[String]) -> Result<(), SessionError> {
        for (index, message) in messages.iter().enumerate() {
            let is_last = index == messages.len() - 1;
            let separator = if is_last { " " } else { "-" };
            self.send_line(&format!("{code}{separator}{message}"))
                .await?;
        }
        Ok(())
    }
}

/// Awaits `operation`, failing with [`SessionError::Timeout`] once `limit` elapses.
async fn with_deadline<T, F>(limit: Option<Duration>, operation: F) -> Result<T, SessionError>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| SessionError::Timeout)?
            .map_err(SessionError::from),
        None => operation.await.map_err(SessionError::from),
    }
}

/// Reads up to and including the next line feed, holding at most `limit`
/// bytes. An overlong line is drained up to its line feed and reported as
/// [`ReadLine::TooLong`]. A final line without line feed is returned as is.
async fn read_bounded_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> io::Result<ReadLine> {
    let mut line = Vec::new();
    let mut overflow = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (overflow, line.is_empty()) {
                (true, _) => ReadLine::TooLong,
                (false, true) => ReadLine::Eof,
                (false, false) => ReadLine::Line(line),
            });
        }

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(index) => (&available[..=index], true),
            None => (available, false),
        };
        if !overflow && line.len() + chunk.len() <= limit {
            line.extend_from_slice(chunk);
        } else {
            overflow = true;
            line.clear();
        }
        let consumed = chunk.len();
        reader.consume(consumed);

        if done {
            return Ok(if overflow {
                ReadLine::TooLong
            } else {
                ReadLine::Line(line)
            });
        }
    }
}
