//! In-memory test doubles standing in for the external wire codec / channel
//! provider this crate treats as a collaborator (spec §6, SPEC_FULL §6).
//! Used by the cache/listener property tests and the end-to-end scenarios
//! in `tests/`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, ConnectionState, Operation, Requester};
use crate::provider::{ChannelProvider, ServerChannelProvider};

/// A `Channel` whose connection state is fixed at construction and whose
/// get/put/monitor/rpc calls just hand back a fresh, uncancelled
/// `Operation` — enough surface for the cache and handle logic this crate
/// actually owns.
pub struct LoopbackChannel {
    name: String,
    connected: bool,
}

impl LoopbackChannel {
    pub fn new(name: &str, state: ConnectionState) -> Self {
        LoopbackChannel {
            name: name.to_string(),
            connected: state == ConnectionState::Connected,
        }
    }
}

impl Channel for LoopbackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn get(&self, _requester: Arc<dyn Requester>) -> Operation {
        Operation::new(Some("get".to_string()))
    }

    fn put(&self, _requester: Arc<dyn Requester>) -> Operation {
        Operation::new(Some("put".to_string()))
    }

    fn monitor(&self, _requester: Arc<dyn Requester>) -> Operation {
        Operation::new(Some("monitor".to_string()))
    }

    fn rpc(&self, _requester: Arc<dyn Requester>) -> Operation {
        Operation::new(Some("rpc".to_string()))
    }
}

/// A client [`ChannelProvider`] that always succeeds, counting how many
/// times `create_channel` actually ran (used to assert at-most-one-creation
/// behavior in the cache's property tests).
pub struct LoopbackProvider {
    initial_state: ConnectionState,
    created: AtomicUsize,
}

impl LoopbackProvider {
    pub fn new(initial_state: ConnectionState) -> Self {
        LoopbackProvider {
            initial_state,
            created: AtomicUsize::new(0),
        }
    }

    pub fn create_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ChannelProvider for LoopbackProvider {
    fn name(&self) -> &str {
        "loopback"
    }

    fn create_channel(
        &self,
        name: &str,
        _requester: Arc<dyn Requester>,
        _priority: u8,
        _address_hint: Option<SocketAddr>,
    ) -> crate::error::Result<Arc<dyn Channel>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LoopbackChannel::new(name, self.initial_state)))
    }
}

/// A server-side provider that claims a fixed, configurable set of channel
/// names — used to exercise search dispatch (spec §4.8, scenario S6)
/// without a real structured-data backing store.
pub struct LoopbackServerProvider {
    hosted: Mutex<Vec<String>>,
}

impl LoopbackServerProvider {
    pub fn new(hosted: impl IntoIterator<Item = impl Into<String>>) -> Self {
        LoopbackServerProvider {
            hosted: Mutex::new(hosted.into_iter().map(Into::into).collect()),
        }
    }
}

impl ServerChannelProvider for LoopbackServerProvider {
    fn name(&self) -> &str {
        "loopback-server"
    }

    fn has_channel(&self, channel_name: &str) -> bool {
        self.hosted.lock().unwrap().iter().any(|n| n == channel_name)
    }
}
