//! UDP search-receive transports (one per local interface) and the single
//! UDP broadcast transport used for beacons and search replies (spec §4.7
//! steps 6-7, §2).

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::Result;

/// A search datagram handler: given the raw payload and the sender's
/// address, decides whether and how to reply. The actual decode/encode of
/// PVA search framing is the external codec's job (spec §1); this trait is
/// the seam `UdpReceiveTransport` dispatches through.
pub trait SearchHandler: Send + Sync {
    fn handle_search(&self, payload: &[u8], from: SocketAddr);
}

/// Binds a UDP socket on `broadcast_port` for one local interface and
/// decodes/dispatches incoming search datagrams on a background thread
/// (spec §4.7 step 6).
pub struct UdpReceiveTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl UdpReceiveTransport {
    /// Binds to `bind_addr:port` with `SO_REUSEADDR` set so multiple
    /// per-interface transports can share the port, matching how the
    /// original implementation binds one receive socket per interface on
    /// the shared broadcast port.
    pub fn bind(bind_addr: std::net::IpAddr, port: u16) -> Result<Self> {
        let domain = if bind_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(false)?;
        let addr: SocketAddr = (bind_addr, port).into();
        socket.bind(&addr.into())?;
        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;
        Ok(UdpReceiveTransport {
            socket: Arc::new(socket),
            local_addr,
            stopping: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the receive loop on a background thread, dispatching every
    /// decoded datagram to `handler` (search dispatch, spec §4.8).
    pub fn start(&mut self, max_payload: usize, handler: Arc<dyn SearchHandler>) -> Result<()> {
        let socket = self.socket.clone();
        let stopping = self.stopping.clone();
        let handle = std::thread::Builder::new()
            .name("pva-udp-search-recv".to_string())
            .spawn(move || receive_loop(socket, stopping, max_payload, handler))?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Closes the socket (unblocking `recv_from`) and joins the receive
    /// thread.
    pub fn close(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Wake up a blocking recv_from by sending ourselves a zero-length
        // datagram; failures are harmless (socket may already be gone).
        if let Ok(local) = self.socket.local_addr() {
            let _ = self.socket.send_to(&[], local);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn receive_loop(
    socket: Arc<UdpSocket>,
    stopping: Arc<AtomicBool>,
    max_payload: usize,
    handler: Arc<dyn SearchHandler>,
) {
    let mut buf = vec![0u8; max_payload.max(1500)];
    loop {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                handler.handle_search(&buf[..n], from);
            }
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!("UDP search-receive error: {e}");
            }
        }
    }
}

/// The server's single outbound UDP socket, used by the beacon emitter and
/// by search-reply dispatch (spec §4.7 step 7, §2).
pub struct BroadcastTransport {
    socket: UdpSocket,
}

impl BroadcastTransport {
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_broadcast(true)?;
        Ok(BroadcastTransport { socket })
    }

    /// Sends `payload` to `dest`. Failures are logged and swallowed by
    /// callers that treat the send as advisory (beacons, search replies) —
    /// this method itself still surfaces the `io::Result` so a caller that
    /// *does* care (none, currently) isn't prevented from checking.
    pub fn send_to(&self, payload: &[u8], dest: SocketAddr) -> std::io::Result<usize> {
        self.socket.send_to(payload, dest)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
