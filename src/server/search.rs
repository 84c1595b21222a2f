//! Server-side search dispatch (spec §4.8): ignore-list check, first-match
//! provider lookup per channel name, reply via the broadcast transport.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::provider::ServerChannelProvider;
use crate::server::udp::{BroadcastTransport, SearchHandler};

/// A decoded search request: the channel names a peer is asking "who hosts
/// this?" about. Decoding the wire datagram into this shape is the external
/// codec's job (spec §1); this crate only consumes the decoded result.
pub struct SearchRequest {
    pub channel_names: Vec<String>,
}

/// A decoded search reply: which of the requested names this server claims.
/// Encoding this back to wire bytes is, again, the codec's job.
pub struct SearchReply {
    pub claimed: Vec<String>,
}

/// Dispatches decoded search requests against the registered server-side
/// providers, in declaration order (spec §4.8: "the sole mechanism for
/// disambiguation"), and sends a reply via the broadcast transport to the
/// original source. Implements [`SearchHandler`] so it can be wired
/// directly to a [`crate::server::udp::UdpReceiveTransport`] — except that
/// transport decodes raw bytes, which is why the real wiring goes through a
/// `decode: Fn(&[u8]) -> Option<SearchRequest>` supplied by the codec
/// collaborator; see [`SearchDispatcher::with_decoder`].
pub struct SearchDispatcher {
    config: Arc<Config>,
    providers: Vec<Arc<dyn ServerChannelProvider>>,
    broadcast: Arc<BroadcastTransport>,
    decode: Box<dyn Fn(&[u8]) -> Option<SearchRequest> + Send + Sync>,
    encode: Box<dyn Fn(&SearchReply) -> Vec<u8> + Send + Sync>,
}

impl SearchDispatcher {
    pub fn new(
        config: Arc<Config>,
        providers: Vec<Arc<dyn ServerChannelProvider>>,
        broadcast: Arc<BroadcastTransport>,
        decode: impl Fn(&[u8]) -> Option<SearchRequest> + Send + Sync + 'static,
        encode: impl Fn(&SearchReply) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        SearchDispatcher {
            config,
            providers,
            broadcast,
            decode: Box::new(decode),
            encode: Box::new(encode),
        }
    }

    /// The dispatch algorithm itself, decoupled from wire decode/encode so
    /// it's directly unit-testable (spec §8 scenario S6).
    pub fn dispatch(&self, request: &SearchRequest, from: SocketAddr) -> Option<SearchReply> {
        if self.config.should_ignore(from) {
            return None;
        }

        let mut claimed = Vec::new();
        for name in &request.channel_names {
            if self.providers.iter().any(|p| p.has_channel(name)) {
                claimed.push(name.clone());
            }
        }

        if claimed.is_empty() {
            None
        } else {
            Some(SearchReply { claimed })
        }
    }
}

impl SearchHandler for SearchDispatcher {
    fn handle_search(&self, payload: &[u8], from: SocketAddr) {
        let Some(request) = (self.decode)(payload) else {
            log::debug!("dropping undecodable search datagram from {from}");
            return;
        };
        if let Some(reply) = self.dispatch(&request, from) {
            let bytes = (self.encode)(&reply);
            if let Err(e) = self.broadcast.send_to(&bytes, from) {
                log::warn!("failed to send search reply to {from}: {e}");
            }
        }
    }
}
