//! Per-connection request loop.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::processor::RequestProcessor;

/// Client identity derived from a peer address.
pub fn client_id(peer: &SocketAddr, identify_by_port: bool) -> String {
    if identify_by_port {
        peer.to_string()
    } else {
        peer.ip().to_string()
    }
}

/// Serves newline-delimited requests on one connection.
///
/// Requests are handled strictly in arrival order. I/O errors end this
/// connection only; admission and rate state are shared and unaffected.
pub struct ConnectionHandler {
    stream: TcpStream,
    client_id: String,
    processor: Arc<RequestProcessor>,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, client_id: String, processor: Arc<RequestProcessor>) -> Self {
        Self {
            stream,
            client_id,
            processor,
        }
    }

    /// Run until the client disconnects or the connection fails.
    pub async fn run(self) {
        let span = info_span!("connection", id = %Uuid::new_v4(), client = %self.client_id);

        async move {
            info!("Client connected");
            let (reader, writer) = self.stream.into_split();
            match serve_lines(BufReader::new(reader), writer, &self.client_id, &self.processor)
                .await
            {
                Ok(served) => info!(requests = served, "Client disconnected"),
                Err(e) => warn!(error = %e, "Connection closed with error"),
            }
        }
        .instrument(span)
        .await
    }
}

/// Answer each non-empty line read from `reader` with one line on `writer`.
///
/// Returns the number of requests answered once the reader reaches EOF.
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    client_id: &str,
    processor: &RequestProcessor,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0u64;

    while let Some(line) = lines.next_line().await? {
        let request = line.trim();
        if request.is_empty() {
            continue;
        }

        debug!(request = %request, "Request received");
        let response = processor.process(client_id, request);

        let mut out = response.to_string();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
        served += 1;
    }

    Ok(served)
}
