//! # hudson-live: Live navigation engine for broadcast sets
//!
//! Persists sets, memberships and the state pointer in RocksDB, serialises
//! every mutation of a set behind one lock, and fans the committed result
//! out to every viewer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ LiveClient  │ ◄─────────────────► │ LiveServer  │
//! │ (viewer)    │     Binary Proto    │             │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                     ┌──────┴──────┐
//!                                     │ LiveService │
//!                                     └──────┬──────┘
//!                   ┌────────────┬───────────┼────────────┐
//!                   ▼            ▼           ▼            ▼
//!             ┌──────────┐ ┌───────────┐ ┌──────────┐ ┌─────────────┐
//!             │Navigator │ │ Position  │ │   Set    │ │ ShareSigner │
//!             │          │ │ Manager   │ │ Manager  │ │             │
//!             └────┬─────┘ └─────┬─────┘ └────┬─────┘ └─────────────┘
//!                  └─────────────┼────────────┘
//!                     per-set lock │ StoreTxn ── LiveStore (RocksDB)
//!                                  ▼
//!                            ┌───────────┐
//!                            │ TopicHub  │ Pointer(set) / List(tenant)
//!                            └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: column families, staging transaction with uniqueness checks
//! - [`locks`]: per-key async mutex table
//! - [`broadcast`]: topic fan-out with bounded per-subscriber buffers
//! - [`navigation`]: pointer moves, image cycling and the message block
//! - [`positions`]: add, insert, remove, restore and reorder memberships
//! - [`sets`]: set create, update, delete and listing
//! - [`share`]: signed share tokens
//! - [`service`]: facade wiring the above together
//! - [`protocol`]: bincode wire frames
//! - [`server`] / [`client`]: WebSocket transport

pub mod storage;
pub mod locks;
pub mod broadcast;
pub mod navigation;
pub mod positions;
pub mod sets;
pub mod share;
pub mod service;
pub mod protocol;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use storage::{LiveStore, StoreConfig, StoreError, StoreTxn};
pub use locks::KeyedLocks;
pub use broadcast::{
    BroadcastGroup, BroadcastStats, ListChange, LiveEvent, Subscription, Topic, TopicHub,
};
pub use navigation::{NavCommand, Navigator};
pub use positions::PositionManager;
pub use sets::{SetManager, SetUpdate};
pub use share::{ShareError, ShareSigner, DEFAULT_MAX_AGE};
pub use service::{LiveConfig, LiveService};
pub use protocol::{Channel, ClientFrame, ProtocolError, ServerFrame};
pub use server::{LiveServer, ServerConfig, ServerStats};
pub use client::{ConnectionState, LiveClient, ViewerEvent};
