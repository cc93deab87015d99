//! Session store for Aegis.
//!
//! Per-session append-only interaction logs with bounded in-memory views,
//! history queries, derived analytics, and TTL-based retention.  Sessions
//! persist as JSONL shards and survive process restart within retention.

pub mod error;
pub mod session;
pub mod store;

pub use error::{Result, StoreError};
pub use session::{
    HistoryKind, Interaction, Session, SessionAnalytics, SessionStatus, WorkMode,
};
pub use store::{SessionStore, StoreConfig};
