//! Transfer engine abstraction.
//!
//! This module provides a `Backend` trait normalizing the aria2 JSON-RPC
//! engine and the qBittorrent WebUI behind one capability set, plus a retry
//! proxy that masks transient transport faults.

mod aria2;
mod qbittorrent;
mod retry;
mod types;

pub use aria2::Aria2Backend;
pub use qbittorrent::QbBackend;
pub use retry::{RetryPolicy, RetryingBackend};
pub use types::*;
