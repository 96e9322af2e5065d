//! Hooks the embedding program plugs into the server: connection
//! admission, envelope creation and recipient admission.

use std::{fmt, net::SocketAddr, sync::Arc};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    command::MailAddress,
    envelope::{AlertContext, AlertEnvelope, Envelope, EnvelopeResult},
};

/// Identity of an accepted connection, handed to the [`MailHandler`] hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
}

impl ConnectionInfo {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer {
            Some(peer) => write!(f, "{} ({peer})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Trait for the server side hooks driving envelope creation.
pub trait MailHandler: Send + Sync {
    /// Called once per accepted connection before the greeting. An error
    /// closes the connection.
    fn on_new_connection(&self, _conn: &ConnectionInfo) -> EnvelopeResult<()> {
        Ok(())
    }

    /// Called when a MAIL command is accepted. An error hard-closes the
    /// connection.
    fn on_new_mail(
        &self,
        conn: &ConnectionInfo,
        from: &MailAddress,
    ) -> EnvelopeResult<Box<dyn Envelope>>;
}

/// Recipient admission policy consulted for every RCPT command.
pub trait RecipientPolicy: Send + Sync {
    /// Returns the rejection reason for a disallowed recipient.
    fn check(&self, rcpt: &MailAddress) -> Result<(), String>;
}

/// Policy admitting every recipient.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl RecipientPolicy for AllowAll {
    fn check(&self, _rcpt: &MailAddress) -> Result<(), String> {
        Ok(())
    }
}

/// Policy refusing recipients whose address starts with a blocked prefix.
#[derive(Debug, Default, Clone)]
pub struct PrefixBlocklist {
    prefixes: Vec<String>,
}

impl PrefixBlocklist {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }
}

impl RecipientPolicy for PrefixBlocklist {
    fn check(&self, rcpt: &MailAddress) -> Result<(), String> {
        match self.prefixes.iter().find(|p| rcpt.email().starts_with(p.as_str())) {
            Some(prefix) => {
                warn!(rcpt = %rcpt, prefix = %prefix, "Recipient blocked");
                Err(format!("we don't send email to {prefix}"))
            }
            None => Ok(()),
        }
    }
}

/// Production [`MailHandler`] creating an [`AlertEnvelope`] per message.
pub struct AlertMailHandler {
    context: Arc<AlertContext>,
    policy: Arc<dyn RecipientPolicy>,
}

impl AlertMailHandler {
    pub fn new(context: AlertContext, policy: Arc<dyn RecipientPolicy>) -> Self {
        info!(
            client = context.client.name(),
            target = %context.target,
            "Alert mail handler initialized"
        );
        Self {
            context: Arc::new(context),
            policy,
        }
    }
}

impl MailHandler for AlertMailHandler {
    fn on_new_mail(
        &self,
        conn: &ConnectionInfo,
        from: &MailAddress,
    ) -> EnvelopeResult<Box<dyn Envelope>> {
        info!(conn = %conn, from = %from, "New mail");
        Ok(Box::new(AlertEnvelope::new(
            from.clone(),
            self.context.clone(),
            self.policy.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_blocklist() {
        let policy = PrefixBlocklist::new(vec!["bad@".to_string(), "noreply@".to_string()]);
        assert_eq!(
            policy.check(&MailAddress::new("bad@x.com")),
            Err("we don't send email to bad@".to_string())
        );
        assert!(policy.check(&MailAddress::new("noreply@x.com")).is_err());
        assert!(policy.check(&MailAddress::new("good@x.com")).is_ok());
        assert!(policy.check(&MailAddress::new("notbad@x.com")).is_ok());
    }

    #[test]
    fn test_prefix_blocklist_is_case_sensitive() {
        let policy = PrefixBlocklist::new(vec!["bad@".to_string()]);
        assert!(policy.check(&MailAddress::new("BAD@x.com")).is_ok());
    }

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.check(&MailAddress::new("bad@x.com")).is_ok());
    }

    #[test]
    fn test_connection_info_display() {
        let conn = ConnectionInfo::new(Some("127.0.0.1:2500".parse().unwrap()));
        assert_eq!(conn.to_string(), format!("{} (127.0.0.1:2500)", conn.id));

        let conn = ConnectionInfo::new(None);
        assert_eq!(conn.to_string(), conn.id.to_string());
    }
}
