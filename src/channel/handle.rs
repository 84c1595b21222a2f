//! Channel handle: connection state, connect-listener broadcast, and the
//! back-reference severed on destruction (spec §4.3, §9).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, ChannelOptions, ConnectionState, Operation, Requester};

/// A connect listener is any `Fn(bool)` the caller registers; uniqueness is
/// by pointer identity of the boxed closure (spec §3, §4.3).
pub type ConnectListener = Arc<dyn Fn(bool) + Send + Sync>;

fn listener_ptr(l: &ConnectListener) -> *const () {
    Arc::as_ptr(l) as *const ()
}

struct Inner {
    state: ConnectionState,
    listeners: Vec<ConnectListener>,
}

/// A named, connection-oriented path to a process variable. Identified by
/// `(name, options)`; created on a client-provider cache miss, destroyed
/// when the last strong reference drops and the cache's weak entry expires.
pub struct ChannelHandle {
    name: String,
    options: ChannelOptions,
    channel: Arc<dyn Channel>,
    inner: Mutex<Inner>,
}

impl ChannelHandle {
    pub(crate) fn new(name: String, options: ChannelOptions, channel: Arc<dyn Channel>) -> Self {
        let initial = if channel.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::NeverConnected
        };
        ChannelHandle {
            name,
            options,
            channel,
            inner: Mutex::new(Inner {
                state: initial,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> ChannelOptions {
        self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().state
    }

    /// Registers `cb`; duplicates (by pointer identity) are silently
    /// dropped. `cb` is invoked exactly once, synchronously, with the
    /// current connection state before this call returns (spec §4.3).
    ///
    /// If `cb` panics on that synchronous invocation, the listener is
    /// removed before the panic propagates — mirroring the C++
    /// `addConnectListener`'s "remove then rethrow" behavior, implemented
    /// here with `catch_unwind` since Rust has no stack-unwinding-based
    /// `try/catch` at the call site.
    pub fn add_connect_listener(&self, cb: ConnectListener) {
        let snapshot_state = {
            let mut inner = self.inner.lock().unwrap();
            if inner.listeners.iter().any(|l| listener_ptr(l) == listener_ptr(&cb)) {
                return;
            }
            inner.listeners.push(cb.clone());
            inner.state
        };

        let connected = snapshot_state == ConnectionState::Connected;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(connected)));
        if result.is_err() {
            self.remove_connect_listener(&cb);
            std::panic::resume_unwind(result.unwrap_err());
        }
    }

    /// No-op if `cb` isn't currently registered.
    pub fn remove_connect_listener(&self, cb: &ConnectListener) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|l| listener_ptr(l) != listener_ptr(cb));
    }

    /// Invoked by the underlying provider-created channel when its
    /// connection status transitions (spec §4.3 "state-change
    /// notification"). Copies the listener vector under the lock, releases
    /// it, then notifies each listener in snapshot order; a listener that
    /// panics is removed and logged, the rest still run.
    pub(crate) fn notify_state_change(&self, new_state: ConnectionState) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = new_state;
            inner.listeners.clone()
        };

        let connected = new_state == ConnectionState::Connected;
        for listener in snapshot {
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(connected)));
            if result.is_err() {
                log::error!("unhandled panic in connection state listener; removing it");
                self.remove_connect_listener(&listener);
            }
        }
    }

    /// Severs the provider back-reference and marks the handle destroyed.
    /// Called explicitly before the underlying channel's destructor runs —
    /// never relying on drop order (spec §9).
    pub(crate) fn destroy(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = ConnectionState::Destroyed;
        inner.listeners.clear();
    }

    /// An operation requested against an already-destroyed channel is born
    /// cancelled rather than rejected (spec §4.4); `get`/`put`/`monitor`/
    /// `rpc` below all route through this before reaching the underlying
    /// provider channel.
    fn born_cancelled_if_destroyed(&self, op_name: &str) -> Option<Operation> {
        if self.state() == ConnectionState::Destroyed {
            Some(Operation::born_cancelled(Some(op_name.to_string())))
        } else {
            None
        }
    }

    pub fn get(self: &Arc<Self>) -> Operation {
        self.born_cancelled_if_destroyed("get")
            .unwrap_or_else(|| self.channel.get(self.clone() as Arc<dyn Requester>))
    }

    pub fn put(self: &Arc<Self>) -> Operation {
        self.born_cancelled_if_destroyed("put")
            .unwrap_or_else(|| self.channel.put(self.clone() as Arc<dyn Requester>))
    }

    pub fn monitor(self: &Arc<Self>) -> Operation {
        self.born_cancelled_if_destroyed("monitor")
            .unwrap_or_else(|| self.channel.monitor(self.clone() as Arc<dyn Requester>))
    }

    pub fn rpc(self: &Arc<Self>) -> Operation {
        self.born_cancelled_if_destroyed("rpc")
            .unwrap_or_else(|| self.channel.rpc(self.clone() as Arc<dyn Requester>))
    }

    #[allow(dead_code)]
    fn address_hint(&self) -> Option<SocketAddr> {
        self.options.address_hint.map(|e| e.addr)
    }
}

impl Requester for ChannelHandle {
    fn channel_state_changed(&self, connected: bool) {
        let new_state = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        self.notify_state_change(new_state);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LoopbackChannel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle(connected: bool) -> Arc<ChannelHandle> {
        let state = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::NeverConnected
        };
        let channel = Arc::new(LoopbackChannel::new("X", state));
        Arc::new(ChannelHandle::new(
            "X".to_string(),
            ChannelOptions::default(),
            channel,
        ))
    }

    #[test]
    fn listener_receives_current_state_synchronously() {
        let h = handle(true);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let connected_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let connected_flag2 = connected_flag.clone();
        h.add_connect_listener(Arc::new(move |connected| {
            seen2.fetch_add(1, Ordering::SeqCst);
            connected_flag2.store(connected, Ordering::SeqCst);
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(connected_flag.load(Ordering::SeqCst));
    }

    #[test]
    fn duplicate_listener_is_dropped_silently() {
        let h = handle(true);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let cb: ConnectListener = Arc::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        h.add_connect_listener(cb.clone());
        h.add_connect_listener(cb);
        // only the first registration fires its synchronous callback
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_listener_is_removed_others_still_notified() {
        let h = handle(false);
        let l2_count = Arc::new(AtomicUsize::new(0));
        let l2_count_clone = l2_count.clone();

        // Registered while disconnected, so the synchronous add-time
        // invocation (connected=false) doesn't trigger the panic branch;
        // only the later broadcast to `Connected` does.
        h.add_connect_listener(Arc::new(|connected| {
            if connected {
                panic!("boom")
            }
        }));
        h.add_connect_listener(Arc::new(move |_| {
            l2_count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        h.notify_state_change(ConnectionState::Connected);
        assert_eq!(l2_count.load(Ordering::SeqCst), 1);

        h.notify_state_change(ConnectionState::Disconnected);
        assert_eq!(l2_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn operation_on_destroyed_channel_is_born_cancelled() {
        let h = handle(true);
        h.destroy();
        assert!(h.get().is_cancelled());
        assert!(h.put().is_cancelled());
        assert!(h.monitor().is_cancelled());
        assert!(h.rpc().is_cancelled());
    }
}
