use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::alert::{AlertClient, AlertFuture, AlertRequest};

/// Alert client that logs alerts instead of delivering them.
#[derive(Debug, Default)]
pub struct LogAlertClient {
    sequence: AtomicU64,
}

impl LogAlertClient {
    pub fn new() -> Self {
        info!("Dry run alert client initialized, alerts will only be logged");
        Self::default()
    }
}

impl AlertClient for LogAlertClient {
    fn create<'a>(&'a self, request: &'a AlertRequest) -> AlertFuture<'a> {
        Box::pin(async move {
            let id = format!("dry-run-{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
            info!(
                id = %id,
                message = %request.message,
                user = %request.user,
                tags = ?request.tags,
                note = %request.note,
                "Logged alert"
            );
            Ok(id)
        })
    }

    fn name(&self) -> &str {
        "log"
    }
}
