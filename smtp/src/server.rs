use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{BufReader, BufWriter},
    net::{TcpListener, TcpStream},
};
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    handler::{ConnectionInfo, MailHandler},
    session::{Session, SessionConfig},
};

/// Back-off applied after a transient accept failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// SMTP listener spawning one independent [`Session`] per connection.
pub struct Server {
    config: Arc<SessionConfig>,
    handler: Arc<dyn MailHandler>,
}

impl Server {
    pub fn new(config: SessionConfig, handler: Arc<dyn MailHandler>) -> Self {
        Self {
            config: Arc::new(config),
            handler,
        }
    }

    /// Binds `addr` and serves connections until a fatal accept error.
    pub async fn listen_and_serve(&self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener`, spawning a session task for each.
    ///
    /// Transient accept failures are logged and accepting continues, any
    /// other failure is returned.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            hostname = %self.config.hostname,
            "Pigeon-SMTP running"
        );
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.spawn_session(stream, peer),
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                Err(e) => {
                    error!(error = %e, "Listener failed");
                    return Err(e);
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let conn = ConnectionInfo::new(Some(peer));
        let span = info_span!("session", id = %conn.id, peer = %peer);
        let (reader, writer) = stream.into_split();
        let session = Session::new(
            BufReader::new(reader),
            BufWriter::new(writer),
            self.config.clone(),
            self.handler.clone(),
            conn,
        );

        tokio::spawn(
            async move {
                info!("Connection accepted");
                match session.run().await {
                    Ok(()) => info!("Connection closed"),
                    Err(e) => warn!(error = %e, "Session ended with error"),
                }
            }
            .instrument(span),
        );
    }
}

/// Accept errors that concern a single connection rather than the listener.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
