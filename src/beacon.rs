//! Periodic beacon emitter (spec §4.6).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::guid::Guid;
use crate::server::udp::BroadcastTransport;

/// Supplies the optional status payload carried on each beacon (spec §4.6,
/// §6 "beacon datagrams ... optional status payload").
pub trait BeaconStatusProvider: Send + Sync {
    fn status_payload(&self) -> Option<Vec<u8>>;
}

struct StopSignal {
    stop: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        StopSignal {
            stop: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Sleeps until `deadline` or until `stop()` is called, whichever comes
    /// first. Returns `true` if woken by a stop request.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stop = self.stop.lock().unwrap();
        loop {
            if *stop {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, timeout_result) = self
                .condvar
                .wait_timeout(stop, deadline - now)
                .unwrap();
            stop = guard;
            if timeout_result.timed_out() && !*stop {
                return false;
            }
        }
    }

    fn stop(&self) {
        *self.stop.lock().unwrap() = true;
        self.condvar.notify_all();
    }
}

/// Shared slot for the optional status provider, so
/// `ServerContext::set_beacon_server_status_provider` can swap it in after
/// the emitter thread has already started (spec §6 operational surface).
pub type StatusProviderSlot = Arc<Mutex<Option<Arc<dyn BeaconStatusProvider>>>>;

/// Periodically emits server-presence datagrams to the configured beacon
/// address list via the server's single broadcast transport (spec §4.6).
pub struct BeaconEmitter {
    signal: Arc<StopSignal>,
    thread: Mutex<Option<JoinHandle<()>>>,
    status_provider: StatusProviderSlot,
}

impl BeaconEmitter {
    /// Starts emitting immediately: a background thread sends the first
    /// beacon after a random fast-start delay uniform in
    /// `[0, min(1s, period)]`, then at exactly `period` intervals measured
    /// from each scheduled send time (spec §4.6).
    pub fn start(
        period: Duration,
        destinations: Vec<SocketAddr>,
        guid: Guid,
        broadcast: Arc<BroadcastTransport>,
        status_provider: Option<Arc<dyn BeaconStatusProvider>>,
    ) -> Self {
        let signal = Arc::new(StopSignal::new());
        let signal_for_thread = signal.clone();
        let sequence = Arc::new(AtomicU64::new(0));
        let status_provider: StatusProviderSlot = Arc::new(Mutex::new(status_provider));
        let status_provider_for_thread = status_provider.clone();

        let thread = std::thread::Builder::new()
            .name("pva-beacon".to_string())
            .spawn(move || {
                run(
                    period,
                    destinations,
                    guid,
                    broadcast,
                    status_provider_for_thread,
                    signal_for_thread,
                    sequence,
                )
            })
            .expect("failed to spawn beacon thread");

        BeaconEmitter {
            signal,
            thread: Mutex::new(Some(thread)),
            status_provider,
        }
    }

    /// Replaces the status provider consulted on each subsequent beacon.
    pub fn set_status_provider(&self, provider: Option<Arc<dyn BeaconStatusProvider>>) {
        *self.status_provider.lock().unwrap() = provider;
    }

    /// Stops immediately: a pending wait wakes and the emitter exits before
    /// its next scheduled send (spec §4.6 "Stop is immediate").
    pub fn stop(&self) {
        self.signal.stop();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BeaconEmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    period: Duration,
    destinations: Vec<SocketAddr>,
    guid: Guid,
    broadcast: Arc<BroadcastTransport>,
    status_provider: StatusProviderSlot,
    signal: Arc<StopSignal>,
    sequence: Arc<AtomicU64>,
) {
    let fast_start_bound = period.min(Duration::from_secs(1));
    let jitter = if fast_start_bound.is_zero() {
        Duration::ZERO
    } else {
        rand::rng().random_range(Duration::ZERO..=fast_start_bound)
    };

    let mut next_deadline = Instant::now() + jitter;
    loop {
        if signal.wait_until(next_deadline) {
            return;
        }
        let seq = sequence.fetch_add(1, Ordering::SeqCst);
        let provider_guard = status_provider.lock().unwrap();
        let payload = encode_beacon(&guid, seq, provider_guard.as_deref());
        drop(provider_guard);
        for dest in &destinations {
            if let Err(e) = broadcast.send_to(&payload, *dest) {
                log::warn!("beacon send to {dest} failed: {e}");
            }
        }
        // Advance from the *scheduled* time, not completion time, so a
        // transient send stall doesn't accumulate drift (spec §4.6).
        next_deadline += period;
    }
}

/// Encodes the fixed-size beacon header (protocol version placeholder,
/// GUID, sequence counter, optional status payload). The real wire format
/// is the external codec's concern (spec §1); this is the minimal stand-in
/// used so the emitter is independently testable.
fn encode_beacon(guid: &Guid, sequence: u64, status_provider: Option<&dyn BeaconStatusProvider>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(guid.as_bytes());
    buf.extend_from_slice(&sequence.to_be_bytes());
    if let Some(provider) = status_provider {
        if let Some(status) = provider.status_payload() {
            buf.extend_from_slice(&status);
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn sequence_numbers_are_strictly_increasing() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = receiver.local_addr().unwrap();

        let broadcast = Arc::new(BroadcastTransport::bind().unwrap());
        let emitter = BeaconEmitter::start(
            Duration::from_millis(20),
            vec![dest],
            Guid::generate(),
            broadcast,
            None,
        );

        let mut last_seq: Option<u64> = None;
        for _ in 0..3 {
            let mut buf = [0u8; 64];
            let (n, _) = receiver.recv_from(&mut buf).unwrap();
            let seq = u64::from_be_bytes(buf[12..20].try_into().unwrap());
            if let Some(last) = last_seq {
                assert!(seq > last);
            }
            last_seq = Some(seq);
            assert!(n >= 20);
        }

        emitter.stop();
    }

    #[test]
    fn stop_wakes_pending_wait_immediately() {
        let broadcast = Arc::new(BroadcastTransport::bind().unwrap());
        let emitter = BeaconEmitter::start(
            Duration::from_secs(60),
            vec!["127.0.0.1:1".parse().unwrap()],
            Guid::generate(),
            broadcast,
            None,
        );
        let start = Instant::now();
        emitter.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    struct FixedStatus(&'static [u8]);
    impl BeaconStatusProvider for FixedStatus {
        fn status_payload(&self) -> Option<Vec<u8>> {
            Some(self.0.to_vec())
        }
    }

    #[test]
    fn status_payload_is_appended() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let dest = receiver.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            if let Ok((n, _)) = receiver.recv_from(&mut buf) {
                seen2.lock().unwrap().extend_from_slice(&buf[..n]);
            }
        });

        let broadcast = Arc::new(BroadcastTransport::bind().unwrap());
        let emitter = BeaconEmitter::start(
            Duration::from_millis(500),
            vec![dest],
            Guid::generate(),
            broadcast,
            Some(Arc::new(FixedStatus(b"ok"))),
        );
        std::thread::sleep(Duration::from_millis(700));
        emitter.stop();

        let payload = seen.lock().unwrap();
        assert!(payload.ends_with(b"ok"));
    }
}
