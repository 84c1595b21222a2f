//! TCP acceptor and virtual circuits (spec §4.7 step 5, §2 "TCP acceptor +
//! virtual circuits"). Framing and message decoding are delegated to the
//! external wire codec (spec §1 Out of scope); this module owns only
//! accept/register/close lifecycle and hands raw buffers onward.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::address::{Endpoint, TransportKind};
use crate::error::Result;
use crate::transport_registry::TransportRegistry;

/// A live TCP connection carrying PVA traffic (spec glossary "Virtual
/// circuit"). Holds just enough state for registry bookkeeping and clean
/// shutdown; the byte stream itself is handed to the external codec
/// collaborator in a real deployment.
pub struct VirtualCircuit {
    remote: Endpoint,
    closed: AtomicBool,
    stream: Option<Mutex<TcpStream>>,
}

impl VirtualCircuit {
    fn new(remote: Endpoint, stream: TcpStream) -> Self {
        VirtualCircuit {
            remote,
            closed: AtomicBool::new(false),
            stream: Some(Mutex::new(stream)),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(remote: Endpoint) -> Self {
        VirtualCircuit {
            remote,
            closed: AtomicBool::new(false),
            stream: None,
        }
    }

    pub fn remote_endpoint(&self) -> Endpoint {
        self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Idempotent: closes the underlying socket and marks the circuit
    /// closed. Safe to call from the shutdown path and from the circuit's
    /// own I/O thread on EOF/error.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = &self.stream {
            if let Ok(stream) = stream.lock() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
    }
}

/// Accepts inbound TCP connections on a background thread, wraps each in a
/// [`VirtualCircuit`], registers it in `registry`, and spawns a per-circuit
/// reader thread — the "worker pool for per-circuit I/O" of spec §5,
/// realized here as the simplest faithful reading of that phrase:
/// thread-per-connection.
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl TcpAcceptor {
    /// Binds `(0.0.0.0, port)`. Per spec §4.7 step 5: if the port is busy,
    /// this fails outright — no silent fallback to another port.
    pub fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let local_addr = listener.local_addr()?;
        Ok(TcpAcceptor {
            listener,
            local_addr,
            stopping: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the accept loop on a background thread. Each accepted
    /// connection becomes a `VirtualCircuit`, is installed in `registry`
    /// (a losing `install` — collision on remote endpoint — closes the new
    /// circuit per spec §4.5), and gets its own reader thread.
    pub fn start(&self, registry: Arc<TransportRegistry>, max_payload: usize) -> Result<()> {
        let listener = self.listener.try_clone()?;
        let stopping = self.stopping.clone();
        let handle = std::thread::Builder::new()
            .name("pva-tcp-accept".to_string())
            .spawn(move || accept_loop(listener, registry, stopping, max_payload))?;
        *self.accept_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stops accepting new connections. Does not close already-registered
    /// circuits — that is the transport registry's job during shutdown
    /// (spec §4.7 step 5 precedes step 6).
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Unblock `accept()` by connecting to ourselves once.
        let _ = TcpStream::connect(self.local_addr);
        if let Some(handle) = self.accept_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<TransportRegistry>,
    stopping: Arc<AtomicBool>,
    max_payload: usize,
) {
    for incoming in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                log::warn!("TCP accept failed: {e}");
                continue;
            }
        };
        let remote_addr = match stream.peer_addr() {
            Ok(a) => a,
            Err(e) => {
                log::warn!("accepted connection with no peer address: {e}");
                continue;
            }
        };
        let endpoint = Endpoint::new(remote_addr, TransportKind::Tcp);
        let circuit = Arc::new(VirtualCircuit::new(endpoint, stream));

        if !registry.install(endpoint, circuit.clone()) {
            log::warn!("duplicate virtual circuit for {endpoint}, closing new connection");
            circuit.close();
            continue;
        }

        let registry = registry.clone();
        let circuit_for_thread = circuit.clone();
        std::thread::spawn(move || run_circuit(circuit_for_thread, registry, max_payload));
    }
}

fn run_circuit(circuit: Arc<VirtualCircuit>, registry: Arc<TransportRegistry>, max_payload: usize) {
    let mut buf = vec![0u8; max_payload.max(4096)];
    loop {
        if circuit.is_closed() {
            break;
        }
        let n = {
            let Some(stream) = &circuit.stream else { break };
            let mut stream = stream.lock().unwrap();
            match stream.read(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    log::debug!("virtual circuit {} read error: {e}", circuit.remote_endpoint());
                    break;
                }
            }
        };
        if n == 0 {
            break; // peer closed the connection
        }
        // Framing and decoding is the external codec's job; this layer's
        // responsibility ends at delivering raw bytes to it.
    }
    circuit.close();
    registry.remove(&circuit.remote_endpoint(), &circuit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn bind_fails_on_busy_port() {
        let first = TcpAcceptor::bind(0).unwrap();
        let port = first.local_addr().port();
        let second = TcpAcceptor::bind(port);
        assert!(second.is_err());
    }

    #[test]
    fn accepted_connection_is_registered_and_removed_on_close() {
        let acceptor = TcpAcceptor::bind(0).unwrap();
        let registry = Arc::new(TransportRegistry::new());
        acceptor.start(registry.clone(), 4096).unwrap();

        let mut client = TcpStream::connect(acceptor.local_addr()).unwrap();
        // give the accept thread a moment to register the circuit
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(registry.len(), 1);

        client.write_all(b"hi").unwrap();
        drop(client);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(registry.len(), 0);

        acceptor.stop();
    }
}
