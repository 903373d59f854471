//! TCP server for the exchange service.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::connection::{client_id, ConnectionHandler};
use crate::error::Result;
use crate::processor::RequestProcessor;

/// Accepts connections and runs one [`ConnectionHandler`] task per client.
///
/// All handlers share the server's single admission controller and rate table
/// through the [`RequestProcessor`].
pub struct Server {
    listener: TcpListener,
    processor: Arc<RequestProcessor>,
    identify_by_port: bool,
}

impl Server {
    /// Bind the listener.
    pub async fn bind(addr: SocketAddr, processor: Arc<RequestProcessor>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            processor,
            identify_by_port: false,
        })
    }

    /// Key clients by `ip:port` instead of by IP alone.
    pub fn identify_by_port(mut self, enabled: bool) -> Self {
        self.identify_by_port = enabled;
        self
    }

    /// The bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `signal` resolves.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(
            addr = %self.local_addr()?,
            max_attempts = self.processor.admission().max_attempts(),
            retry_window_secs = self.processor.admission().retry_window().as_secs(),
            charging = ?self.processor.admission().charging(),
            "Exchange server listening"
        );

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let id = client_id(&peer, self.identify_by_port);
                            let handler = ConnectionHandler::new(stream, id, self.processor.clone());
                            tokio::spawn(handler.run());
                        }
                        Err(e) => {
                            // Accept errors (e.g. fd exhaustion) are per-connection.
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}
