//! The channel data model shared by the cache, the handle, and the
//! provider seam: connection state, channel options, the `Channel`/
//! `Requester` trait boundary, and `Operation` (spec §3, §4.4).

pub mod cache;
pub mod handle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use cache::ChannelCache;
pub use handle::{ChannelHandle, ConnectListener};

/// Connection state of a channel handle (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NeverConnected,
    Connected,
    Disconnected,
    Destroyed,
}

/// `{priority, address_hint}` — totally ordered by `(priority,
/// address_hint)` so `(name, options)` is a valid map key (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelOptions {
    pub priority: u8,
    pub address_hint: Option<crate::address::Endpoint>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            priority: 0,
            address_hint: None,
        }
    }
}

/// The provider-created channel object a [`ChannelHandle`] wraps. The real
/// implementation (wire codec, structured-data get/put/monitor/rpc) is an
/// external collaborator; this crate only needs the seam.
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    fn is_connected(&self) -> bool;

    fn get(&self, requester: Arc<dyn Requester>) -> Operation;
    fn put(&self, requester: Arc<dyn Requester>) -> Operation;
    fn monitor(&self, requester: Arc<dyn Requester>) -> Operation;
    fn rpc(&self, requester: Arc<dyn Requester>) -> Operation;
}

/// Notified by the provider-created [`Channel`] when its connection status
/// transitions; the [`ChannelHandle`] is always the requester implementation
/// used in practice, but the trait is the documented seam (spec §4.3,
/// §9 "cyclic ownership").
pub trait Requester: Send + Sync {
    fn channel_state_changed(&self, connected: bool);
}

/// A one-shot or subscription request owned by a channel (spec §4.4).
/// `cancel` is idempotent; once cancelled, in-flight responses are dropped
/// at the dispatch boundary before reaching user callbacks.
#[derive(Clone)]
pub struct Operation {
    name: Option<String>,
    cancelled: Arc<AtomicBool>,
}

impl Operation {
    pub fn new(name: Option<String>) -> Self {
        Operation {
            name,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// An operation created against an already-destroyed channel is born
    /// cancelled (spec §4.4).
    pub fn born_cancelled(name: Option<String>) -> Self {
        let op = Operation::new(name);
        op.cancel();
        op
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let op = Operation::new(Some("get".to_string()));
        assert!(!op.is_cancelled());
        op.cancel();
        op.cancel();
        op.cancel();
        assert!(op.is_cancelled());
    }

    #[test]
    fn born_cancelled_is_cancelled_immediately() {
        let op = Operation::born_cancelled(None);
        assert!(op.is_cancelled());
    }

    #[test]
    fn channel_options_order_by_priority_then_hint() {
        let low = ChannelOptions {
            priority: 0,
            address_hint: None,
        };
        let high = ChannelOptions {
            priority: 5,
            address_hint: None,
        };
        assert!(low < high);
    }
}
