#![warn(rust_2018_idioms)]

//! Client and server runtime for the PVA process-variable access protocol:
//! a client-side channel cache and connection state machine, and a
//! server-side context coordinating UDP search/beacon, a TCP acceptor, and
//! the virtual-circuit registry. Wire encoding/decoding and the structured
//! data model are external collaborators this crate only defines seams for
//! (see [`channel::Channel`] and [`provider::ChannelProvider`]).

pub mod address;
pub mod beacon;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod guid;
pub mod provider;
pub mod server;
pub mod transport_registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::ClientProvider;
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use guid::Guid;
pub use server::ServerContext;

use std::sync::OnceLock;

static FIRST_REGISTRY_INIT: OnceLock<()> = OnceLock::new();

/// Registers `hook` to run exactly once, the first time either global
/// provider directory ([`provider::clients`] or [`provider::servers`]) is
/// touched by this process — the extension point named in spec §4.1's
/// "initialized lazily on first registration" without a hook mechanism of
/// its own. Subsequent calls, from any caller, are no-ops.
pub fn on_first_registry_init(hook: impl Fn() + Send + Sync) {
    FIRST_REGISTRY_INIT.get_or_init(move || {
        hook();
    });
}
