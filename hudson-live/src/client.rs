//! WebSocket viewer client for the live server.
//!
//! Used by host displays, preview panes and the transport tests. Requests
//! are fire-and-forget; each returns the `request_id` that the server's
//! `Ack` or `Failed` frame will echo. Everything the server pushes is
//! surfaced on the event channel in arrival order.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use hudson_core::{SetId, TenantId};

use crate::navigation::NavCommand;
use crate::protocol::{Channel, ClientFrame, ProtocolError, ServerFrame};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the viewer client.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// A decoded frame from the server
    Frame(ServerFrame),
}

pub struct LiveClient {
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    next_request_id: AtomicU64,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,
    event_rx: Option<mpsc::Receiver<ViewerEvent>>,
    event_tx: mpsc::Sender<ViewerEvent>,
}

impl LiveClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            next_request_id: AtomicU64::new(1),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ViewerEvent>> {
        self.event_rx.take()
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionError(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ViewerEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match ServerFrame::decode(&data) {
                        Ok(frame) => {
                            if event_tx.send(ViewerEvent::Frame(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Dropping undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ViewerEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection. The reader reports `Disconnected` once the
    /// server acknowledges.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    pub async fn subscribe_pointer(&self, tenant_id: TenantId, set_id: SetId) -> Result<u64, ProtocolError> {
        let request_id = self.next_id();
        self.send(ClientFrame::SubscribePointer {
            request_id,
            tenant_id,
            set_id,
        })
        .await?;
        Ok(request_id)
    }

    pub async fn subscribe_list(&self, tenant_id: TenantId) -> Result<u64, ProtocolError> {
        let request_id = self.next_id();
        self.send(ClientFrame::SubscribeList { request_id, tenant_id }).await?;
        Ok(request_id)
    }

    pub async fn subscribe_shared(&self, token: impl Into<String>) -> Result<u64, ProtocolError> {
        let request_id = self.next_id();
        self.send(ClientFrame::SubscribeShared {
            request_id,
            token: token.into(),
        })
        .await?;
        Ok(request_id)
    }

    pub async fn unsubscribe(&self, channel: Channel) -> Result<u64, ProtocolError> {
        let request_id = self.next_id();
        self.send(ClientFrame::Unsubscribe { request_id, channel }).await?;
        Ok(request_id)
    }

    pub async fn navigate(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        command: NavCommand,
    ) -> Result<u64, ProtocolError> {
        let request_id = self.next_id();
        self.send(ClientFrame::Navigate {
            request_id,
            tenant_id,
            set_id,
            command,
        })
        .await?;
        Ok(request_id)
    }

    pub async fn ping(&self, nonce: u64) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Ping { nonce }).await
    }

    async fn send(&self, frame: ClientFrame) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let encoded = frame.encode()?;
        match self.outgoing_tx {
            Some(ref tx) => tx.send(encoded).await.map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
