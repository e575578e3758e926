//! # Tether Core
//!
//! Client-side engine that keeps one logical conversation consistent across
//! three layers that fail independently: the session channel, durable local
//! state that survives a restart, and the backend's authoritative message log.
//!
//! ## Overview
//!
//! - **Sessions**: [`SessionRegistry`] binds a user to their current session
//!   and refuses bindings that belong to someone else.
//! - **Streaming**: [`stream::reduce`] is the pure state machine for
//!   Idle / Processing / Streaming. Every mutation of an in-flight stream is
//!   mirrored to the [`DurableStore`].
//! - **Recovery**: after a restart or a dropped channel the client consults
//!   history and `check_status` ([`reconcile`]) before trusting or discarding
//!   what it persisted.
//! - **Rollback**: [`RollbackController`] truncates server history by message
//!   index, guarded by a per-session baseline.
//!
//! [`SessionClient`] owns all of the above. It is synchronous and driven by a
//! caller-owned loop; the network sits behind the [`Transport`] and
//! [`BackendApi`] traits.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_core::{ClientOptions, SessionClient, SystemClock, FileStore, StorageConfig};
//!
//! let storage = StorageConfig::from_home()?;
//! let store = Arc::new(FileStore::new(&storage.state_file()));
//! let mut client = SessionClient::new(options, transport, api, store, Box::new(SystemClock))?;
//! client.open()?;
//! client.send_message("What's on my calendar?")?;
//! loop {
//!     client.poll(Duration::from_millis(100))?;
//!     for notice in client.drain_notices() { /* render */ }
//! }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod durable;
pub mod error;
pub mod notice;
pub mod pending;
pub mod reconcile;
pub mod registry;
pub mod rollback;
pub mod storage;
pub mod stream;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod timers;
pub mod transcript;
pub mod transport;

pub use client::{ClientOptions, ClientSnapshot, SessionClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_client_config, ClientConfig};
pub use connection::ConnectionStatus;
pub use durable::{DurableStore, FileStore, MemoryStore, StoreKey};
pub use error::{Result, TetherError};
pub use notice::ClientNotice;
pub use pending::{PendingTask, PendingTasks};
pub use registry::SessionRegistry;
pub use rollback::RollbackController;
pub use storage::StorageConfig;
pub use stream::{StreamPhase, StreamState};
pub use transcript::{Transcript, TranscriptEntry};
pub use transport::{BackendApi, Channel, ChannelEvent, Transport};
