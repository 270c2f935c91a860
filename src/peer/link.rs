//! TCP link to the operating agent
//!
//! One connection at a time, newline-delimited JSON in both directions:
//! `{"message": "..."}`. Messages sent while no agent is connected stay
//! queued until one connects, and a message whose write fails is resent to
//! the next connection.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::peer::PeerEndpoint;

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    message: String,
}

/// Encode one outbound line, including the trailing newline
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode_line(payload: &str) -> Result<String> {
    let mut line = serde_json::to_string(&WireMessage {
        message: payload.to_string(),
    })?;
    line.push('\n');
    Ok(line)
}

/// Decode one inbound line into its payload
///
/// # Errors
///
/// Returns error if the line is not a JSON object with a `message` field
pub fn decode_line(line: &str) -> Result<String> {
    let wire: WireMessage = serde_json::from_str(line.trim())?;
    Ok(wire.message)
}

/// Serves a [`PeerEndpoint`] over TCP
pub struct PeerLink {
    listener: TcpListener,
    endpoint: PeerEndpoint,
    unsent: Option<String>,
}

impl PeerLink {
    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(addr: &str, endpoint: PeerEndpoint) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "peer link listening");
        Ok(Self {
            listener,
            endpoint,
            unsent: None,
        })
    }

    /// Address actually bound (useful with port 0)
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve agents until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    tracing::info!(%addr, "operating agent connected");
                    self.serve(stream, &cancel).await;
                    tracing::info!(%addr, "operating agent disconnected");
                }
                Err(e) => tracing::warn!(error = %e, "peer accept failed"),
            }
        }
        tracing::debug!("peer link stopped");
    }

    async fn serve(&mut self, stream: TcpStream, cancel: &CancellationToken) {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let resent = match self.unsent.take() {
            Some(payload) => self.write_payload(&mut writer, payload).await,
            None => true,
        };
        if !resent {
            return;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match decode_line(&line) {
                        Ok(payload) => {
                            self.endpoint.deliver(payload);
                        }
                        Err(e) => tracing::warn!(error = %e, "ignoring malformed peer line"),
                    },
                    Ok(None) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "peer read failed");
                        return;
                    }
                },
                outbound = self.endpoint.next_outbound() => {
                    let Some(payload) = outbound else {
                        return;
                    };
                    if !self.write_payload(&mut writer, payload).await {
                        return;
                    }
                }
            }
        }
    }

    /// Write one payload as a line
    ///
    /// Returns false if the connection failed; the payload is then kept for
    /// the next connection.
    async fn write_payload<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        payload: String,
    ) -> bool {
        let line = match encode_line(&payload) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode peer message");
                return true;
            }
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "peer write failed, keeping message for the next connection");
            self.unsent = Some(payload);
            return false;
        }
        true
    }
}
