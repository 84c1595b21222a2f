use std::cmp::Ordering;
use std::net::SocketAddr;

/// Which wire context an [`Endpoint`] was observed or bound on. Search and
/// beacon traffic is UDP; virtual circuits are TCP, so the pair
/// `(kind, addr)` disambiguates two peers that happen to share an IP/port
/// across protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
}

/// An IP address plus port plus UDP-vs-TCP discriminator. Totally ordered so
/// it can key a `BTreeMap`; also `Hash` so it can key a `HashMap` (used by
/// the transport registry, which has no ordering requirement of its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub kind: TransportKind,
}

impl Endpoint {
    pub fn new(addr: SocketAddr, kind: TransportKind) -> Self {
        Endpoint { addr, kind }
    }

    pub fn udp(addr: SocketAddr) -> Self {
        Endpoint::new(addr, TransportKind::Udp)
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        Endpoint::new(addr, TransportKind::Tcp)
    }
}

/// `(is_v6, canonical 16-byte address, port)`. The `is_v6` discriminant
/// keeps this consistent with the derived `PartialEq`/`Eq` on `SocketAddr`:
/// without it, a V4 address and a V6 address whose low 4 bytes happen to
/// match (e.g. `1.2.3.4` vs `::1.2.3.4`) would canonicalize to the same
/// 16-byte buffer and compare `Equal` under `Ord` while still comparing
/// unequal under `Eq` — violating `Ord`'s "`cmp == Equal` iff `eq`" contract.
fn canonical_bytes(addr: &SocketAddr) -> (bool, [u8; 16], u16) {
    match addr {
        SocketAddr::V4(v4) => {
            let mut buf = [0u8; 16];
            buf[12..].copy_from_slice(&v4.ip().octets());
            (false, buf, v4.port())
        }
        SocketAddr::V6(v6) => (true, v6.ip().octets(), v6.port()),
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        let kind_order = |k: &TransportKind| matches!(k, TransportKind::Tcp) as u8;
        kind_order(&self.kind)
            .cmp(&kind_order(&other.kind))
            .then_with(|| canonical_bytes(&self.addr).cmp(&canonical_bytes(&other.addr)))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let proto = match self.kind {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
        };
        write!(f, "{proto}:{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_lexicographically_on_canonical_bytes() {
        let a = Endpoint::udp("10.0.0.1:5076".parse().unwrap());
        let b = Endpoint::udp("10.0.0.2:5076".parse().unwrap());
        assert!(a < b);
    }

    #[test]
    fn udp_and_tcp_at_same_addr_are_distinct_keys() {
        let addr: SocketAddr = "127.0.0.1:5075".parse().unwrap();
        let udp = Endpoint::udp(addr);
        let tcp = Endpoint::tcp(addr);
        assert_ne!(udp, tcp);
        assert_ne!(udp.cmp(&tcp), Ordering::Equal);
    }

    #[test]
    fn equal_endpoints_compare_equal() {
        let addr: SocketAddr = "127.0.0.1:5075".parse().unwrap();
        assert_eq!(Endpoint::tcp(addr), Endpoint::tcp(addr));
    }

    #[test]
    fn v4_and_v6_with_coinciding_low_bytes_are_not_ord_equal() {
        // `::1.2.3.4` and `1.2.3.4` canonicalize to the same low 4 octets;
        // `Ord` must still disagree with them being equal, matching `Eq`.
        let v4 = Endpoint::udp("1.2.3.4:9".parse().unwrap());
        let v6 = Endpoint::udp("[::1.2.3.4]:9".parse().unwrap());
        assert_ne!(v4, v6);
        assert_ne!(v4.cmp(&v6), Ordering::Equal);
    }
}
