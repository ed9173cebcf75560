//! WebSocket live server.
//!
//! Architecture:
//! ```text
//! Producer ──Navigate──┐
//!                      ├── LiveService ── set lock ── LiveStore (RocksDB)
//! Host display ────────┤        │
//! Share viewer ────────┘        └── TopicHub ── Pointer(set) / List(tenant)
//!                                      │
//!                        ┌─────────────┼──────────────┐
//!                        ▼             ▼              ▼
//!                   forwarder     forwarder      forwarder   (one task per
//!                        └─────────────┼──────────────┘       subscription)
//!                                      ▼
//!                             connection mpsc ──► WebSocket
//! ```
//!
//! On a pointer subscription the server subscribes to the topic *before*
//! reading the committed pointer, sends that pointer first, and then only
//! forwards events stamped later than it. A reconnecting viewer therefore
//! starts from the latest state (including the current message) and never
//! sees it go backwards.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use hudson_core::{Catalog, LiveError, LiveResult, SetId, SharedView, StatePointer};

use crate::broadcast::{LiveEvent, Subscription, Topic};
use crate::protocol::{Channel, ClientFrame, ServerFrame};
use crate::service::{LiveConfig, LiveService};
use crate::share::DEFAULT_MAX_AGE;
use crate::storage::StoreConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per topic, also the per-connection outbox size
    pub broadcast_capacity: usize,
    /// Maximum concurrent subscriptions on one connection
    pub max_subscriptions_per_connection: usize,
    /// RocksDB directory
    pub storage_path: PathBuf,
    /// Share token secret (None = random per process)
    pub share_secret: Option<Vec<u8>>,
    /// Share token lifetime in seconds
    pub share_max_age_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            broadcast_capacity: 256,
            max_subscriptions_per_connection: 16,
            storage_path: PathBuf::from("hudson_data"),
            share_secret: None,
            share_max_age_secs: DEFAULT_MAX_AGE.as_secs(),
        }
    }
}

impl ServerConfig {
    pub fn live_config(&self) -> LiveConfig {
        let mut config = LiveConfig {
            broadcast_capacity: self.broadcast_capacity,
            share_max_age_secs: self.share_max_age_secs,
            ..LiveConfig::default()
        };
        if let Some(secret) = &self.share_secret {
            config.share_secret = secret.clone();
        }
        config
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.storage_path.clone(),
            ..StoreConfig::default()
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub navigations: u64,
    pub active_topics: usize,
}

/// The live server.
pub struct LiveServer {
    config: ServerConfig,
    service: Arc<LiveService>,
    stats: Arc<RwLock<ServerStats>>,
}

impl LiveServer {
    /// Open the store at `config.storage_path` and serve it.
    pub fn new(config: ServerConfig, catalog: Arc<dyn Catalog>) -> LiveResult<Self> {
        let service = LiveService::open(config.store_config(), catalog, config.live_config())?;
        Ok(Self::with_service(config, Arc::new(service)))
    }

    /// Serve an already opened service.
    pub fn with_service(config: ServerConfig, service: Arc<LiveService>) -> Self {
        Self {
            config,
            service,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Live server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let service = self.service.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, service, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_topics = self.service.hub().topic_count().await;
        stats
    }

    pub fn service(&self) -> &Arc<LiveService> {
        &self.service
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

/// One running subscription on a connection.
struct Forwarder {
    handle: JoinHandle<()>,
    topics: Vec<Topic>,
}

/// Per-connection state.
struct Connection {
    addr: SocketAddr,
    service: Arc<LiveService>,
    stats: Arc<RwLock<ServerStats>>,
    config: ServerConfig,
    outbox: mpsc::Sender<ServerFrame>,
    forwarders: HashMap<Channel, Forwarder>,
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    service: Arc<LiveService>,
    stats: Arc<RwLock<ServerStats>>,
    config: ServerConfig,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    log::info!("WebSocket connection established from {addr}");

    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let (outbox, mut outbox_rx) = mpsc::channel(config.broadcast_capacity.max(1));
    let mut conn = Connection {
        addr,
        service,
        stats: stats.clone(),
        config,
        outbox,
        forwarders: HashMap::new(),
    };

    let result = loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        {
                            let mut s = stats.write().await;
                            s.total_frames += 1;
                            s.total_bytes += data.len() as u64;
                        }
                        match ClientFrame::decode(&data) {
                            Ok(frame) => {
                                if let Err(e) = conn.handle_frame(frame, &mut ws_sender).await {
                                    break Err(e);
                                }
                            }
                            Err(e) => log::warn!("Failed to decode frame from {addr}: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        break Ok(());
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                }
            }

            Some(frame) = outbox_rx.recv() => {
                if let Err(e) = send_frame(&mut ws_sender, &frame).await {
                    break Err(e);
                }
            }
        }
    };

    conn.close().await;
    {
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
    }
    result
}

async fn send_frame(sink: &mut WsSink, frame: &ServerFrame) -> Result<(), BoxError> {
    let encoded = frame.encode()?;
    sink.send(Message::Binary(encoded.into())).await?;
    Ok(())
}

impl Connection {
    async fn handle_frame(&mut self, frame: ClientFrame, ws: &mut WsSink) -> Result<(), BoxError> {
        match frame {
            ClientFrame::SubscribePointer {
                request_id,
                tenant_id,
                set_id,
            } => {
                let channel = Channel::Pointer(set_id);
                if let Some(reply) = self.check_capacity(request_id, channel) {
                    return send_frame(ws, &reply).await;
                }
                // Subscribe before reading so nothing committed in between is lost
                let sub = self.service.subscribe(Topic::Pointer(set_id)).await;
                match self.service.navigator().current(tenant_id, set_id) {
                    Ok(snapshot) => {
                        send_frame(ws, &subscribed(request_id, channel)).await?;
                        let handle = tokio::spawn(forward_pointer(sub, snapshot, self.outbox.clone()));
                        self.install(channel, handle, vec![Topic::Pointer(set_id)]).await;
                    }
                    Err(e) => {
                        drop(sub);
                        self.service.hub().remove_if_idle(&Topic::Pointer(set_id)).await;
                        send_frame(ws, &ServerFrame::failed(request_id, &e)).await?
                    }
                }
            }

            ClientFrame::SubscribeList {
                request_id,
                tenant_id,
            } => {
                let channel = Channel::List(tenant_id);
                if let Some(reply) = self.check_capacity(request_id, channel) {
                    return send_frame(ws, &reply).await;
                }
                let sub = self.service.subscribe(Topic::List(tenant_id)).await;
                send_frame(ws, &subscribed(request_id, channel)).await?;
                let handle = tokio::spawn(forward_list(sub, self.outbox.clone()));
                self.install(channel, handle, vec![Topic::List(tenant_id)]).await;
            }

            ClientFrame::SubscribeShared { request_id, token } => {
                match self.subscribe_shared(request_id, &token).await {
                    Ok(channel) => log::debug!("{} watching {:?} through a share token", self.addr, channel),
                    Err(reply) => send_frame(ws, &reply).await?,
                }
            }

            ClientFrame::Unsubscribe { request_id, channel } => {
                self.uninstall(&channel).await;
                send_frame(ws, &ServerFrame::ack(request_id)).await?;
            }

            ClientFrame::Navigate {
                request_id,
                tenant_id,
                set_id,
                command,
            } => {
                self.stats.write().await.navigations += 1;
                let reply = match self.service.navigate(tenant_id, set_id, command).await {
                    Ok(pointer) => ServerFrame::Ack {
                        request_id,
                        channel: None,
                        pointer: Some(pointer),
                    },
                    Err(e) => {
                        log::debug!("Navigation from {} failed: {}", self.addr, e);
                        ServerFrame::failed(request_id, &e)
                    }
                };
                send_frame(ws, &reply).await?;
            }

            ClientFrame::Ping { nonce } => {
                send_frame(ws, &ServerFrame::Pong { nonce }).await?;
            }
        }
        Ok(())
    }

    /// The Ack for a shared subscription goes through the outbox ahead of the
    /// first view, so a full outbox only delays it.
    async fn subscribe_shared(&mut self, request_id: u64, token: &str) -> Result<Channel, ServerFrame> {
        let failed = |e: LiveError| ServerFrame::failed(request_id, &e);
        let set_id = self.service.verify_share(token).map_err(failed)?;
        let channel = Channel::Shared(set_id);
        if let Some(reply) = self.check_capacity(request_id, channel) {
            return Err(reply);
        }

        let tenant_id = self
            .service
            .store()
            .load_set(set_id)
            .map_err(LiveError::from)
            .and_then(|set| set.ok_or_else(|| LiveError::not_found("set", set_id)))
            .map_err(failed)?
            .tenant_id;
        let pointer_sub = self.service.subscribe(Topic::Pointer(set_id)).await;
        let list_sub = self.service.subscribe(Topic::List(tenant_id)).await;
        let initial = match self.service.shared_view_of(set_id) {
            Ok(view) => view,
            Err(e) => {
                drop((pointer_sub, list_sub));
                self.service.hub().remove_if_idle(&Topic::Pointer(set_id)).await;
                self.service.hub().remove_if_idle(&Topic::List(tenant_id)).await;
                return Err(failed(e));
            }
        };

        let outbox = self.outbox.clone();
        let service = self.service.clone();
        let handle = tokio::spawn(async move {
            if outbox.send(subscribed(request_id, channel)).await.is_err() {
                return;
            }
            forward_shared(service, set_id, initial, pointer_sub, list_sub, outbox).await;
        });
        self.install(channel, handle, vec![Topic::Pointer(set_id), Topic::List(tenant_id)])
            .await;
        Ok(channel)
    }

    /// A failure frame if one more subscription would exceed the limit.
    fn check_capacity(&self, request_id: u64, channel: Channel) -> Option<ServerFrame> {
        let limit = self.config.max_subscriptions_per_connection;
        if self.forwarders.contains_key(&channel) || self.forwarders.len() < limit {
            return None;
        }
        Some(ServerFrame::Failed {
            request_id,
            code: "too_many_subscriptions".to_string(),
            message: format!("at most {limit} subscriptions per connection"),
        })
    }

    async fn install(&mut self, channel: Channel, handle: JoinHandle<()>, topics: Vec<Topic>) {
        self.uninstall(&channel).await;
        self.forwarders.insert(channel, Forwarder { handle, topics });
    }

    async fn uninstall(&mut self, channel: &Channel) {
        if let Some(forwarder) = self.forwarders.remove(channel) {
            self.stop(forwarder).await;
        }
    }

    async fn stop(&self, forwarder: Forwarder) {
        forwarder.handle.abort();
        // Wait for the task to drop its receivers before checking idleness
        let _ = forwarder.handle.await;
        for topic in &forwarder.topics {
            self.service.hub().remove_if_idle(topic).await;
        }
    }

    async fn close(&mut self) {
        let forwarders: Vec<Forwarder> = self.forwarders.drain().map(|(_, f)| f).collect();
        for forwarder in forwarders {
            self.stop(forwarder).await;
        }
        self.service.prune_idle_locks().await;
    }
}

fn subscribed(request_id: u64, channel: Channel) -> ServerFrame {
    ServerFrame::Ack {
        request_id,
        channel: Some(channel),
        pointer: None,
    }
}

/// Send the committed snapshot, then every later pointer.
async fn forward_pointer(
    mut sub: Subscription,
    snapshot: Option<StatePointer>,
    outbox: mpsc::Sender<ServerFrame>,
) {
    let mut last_seen = 0;
    if let Some(pointer) = snapshot {
        last_seen = pointer.updated_at;
        if outbox.send(ServerFrame::Pointer(pointer)).await.is_err() {
            return;
        }
    }
    while let Some(event) = sub.recv().await {
        if let LiveEvent::Pointer(pointer) = &*event {
            if pointer.updated_at <= last_seen {
                continue;
            }
            last_seen = pointer.updated_at;
            if outbox.send(ServerFrame::Pointer(pointer.clone())).await.is_err() {
                return;
            }
        }
    }
}

async fn forward_list(mut sub: Subscription, outbox: mpsc::Sender<ServerFrame>) {
    while let Some(event) = sub.recv().await {
        if outbox.send(ServerFrame::from(&*event)).await.is_err() {
            return;
        }
    }
}

/// Send the initial projection, then a fresh one after every pointer move or
/// structural change of the set.
async fn forward_shared(
    service: Arc<LiveService>,
    set_id: SetId,
    initial: SharedView,
    mut pointer_sub: Subscription,
    mut list_sub: Subscription,
    outbox: mpsc::Sender<ServerFrame>,
) {
    let mut last_seen = initial.pointer.updated_at;
    if outbox.send(ServerFrame::Shared(initial)).await.is_err() {
        return;
    }

    loop {
        let refresh = tokio::select! {
            event = pointer_sub.recv() => match event {
                Some(event) => matches!(&*event, LiveEvent::Pointer(p) if p.updated_at > last_seen),
                None => return,
            },
            event = list_sub.recv() => match event {
                Some(event) => touches_set(&event, set_id),
                None => return,
            },
        };
        if !refresh {
            continue;
        }

        let frame = match service.shared_view_of(set_id) {
            Ok(view) => {
                last_seen = view.pointer.updated_at;
                ServerFrame::Shared(view)
            }
            Err(e) => {
                // Set deleted: tell the viewer and stop
                let _ = outbox.send(ServerFrame::failed(0, &e)).await;
                return;
            }
        };
        if outbox.send(frame).await.is_err() {
            return;
        }
    }
}

fn touches_set(event: &LiveEvent, set_id: SetId) -> bool {
    matches!(event, LiveEvent::ListChanged { set_id: Some(id), .. } if *id == set_id)
}
