//! Alert delivery interface.
//!
//! An [`AlertClient`] turns a composed [`AlertRequest`] into an incident
//! alert on some external service and returns the identifier the service
//! assigned to it. Concrete clients live in the [`clients`](crate::clients)
//! module.

use std::{future::Future, pin::Pin};

use serde::Serialize;
use thiserror::Error;

/// Result type for alert delivery operations.
pub type AlertResult<T> = Result<T, AlertError>;

/// Boxed future type for alert delivery, enabling object safety.
pub type AlertFuture<'a> = Pin<Box<dyn Future<Output = AlertResult<String>> + Send + 'a>>;

/// Errors that can occur while delivering an alert.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The request could not be sent or the response could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("Alert service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The service response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

/// A single alert ready to be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRequest {
    /// Short alert text, taken from the mail subject.
    pub message: String,

    /// Long form text: message body, timestamp and host diagnostics.
    pub note: String,

    /// Account the alert is attributed to.
    pub user: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl AlertRequest {
    pub fn new(message: String, note: String, user: String) -> Self {
        Self {
            message,
            note,
            user,
            tags: Vec::new(),
            source: None,
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
}

/// Trait for clients able to create alerts on an incident-management service.
///
/// Implementations must be usable from many sessions at once.
pub trait AlertClient: Send + Sync {
    /// Creates the alert, returning the identifier assigned by the service.
    fn create<'a>(&'a self, request: &'a AlertRequest) -> AlertFuture<'a>;

    /// Returns the name of this client.
    fn name(&self) -> &str;
}
