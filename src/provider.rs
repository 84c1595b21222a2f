//! Channel provider registries (spec §4.1): two process-wide named
//! directories, `clients` and `servers`, each mapping a provider name to a
//! factory that produces a channel-provider instance from a [`Config`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::channel::{Channel, Requester};
use crate::config::Config;
use crate::error::{Error, Result};

/// The provider-created channel object (spec §3 "Channel handle" /
/// §6 "external collaborator"). Concrete implementations live outside this
/// crate (the real wire codec + structured-data stack); this trait is the
/// seam the client channel cache and state machine are built against.
pub trait ChannelProvider: Send + Sync {
    /// Provider name as registered.
    fn name(&self) -> &str;

    /// Creates a new channel bound to `name`, notifying `requester` of
    /// connection-state transitions as they occur. `priority` and
    /// `address_hint` come from the caller's [`crate::channel::ChannelOptions`].
    fn create_channel(
        &self,
        name: &str,
        requester: Arc<dyn Requester>,
        priority: u8,
        address_hint: Option<std::net::SocketAddr>,
    ) -> Result<Arc<dyn Channel>>;
}

/// A server-side provider additionally answers search requests for names it
/// hosts (spec §4.8).
pub trait ServerChannelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `true` if this provider claims (hosts) `channel_name`.
    fn has_channel(&self, channel_name: &str) -> bool;
}

type ClientFactory = Arc<dyn Fn(&Config) -> Arc<dyn ChannelProvider> + Send + Sync>;
type ServerFactory = Arc<dyn Fn(&Config) -> Arc<dyn ServerChannelProvider> + Send + Sync>;

struct Entry<F> {
    factory: F,
    // used to detect "identical (name, factory)" re-registration by identity
    // of the underlying factory closure, the cheapest faithful proxy for
    // "same factory" available for a `dyn Fn`.
    token: usize,
}

/// A named directory of provider factories. One instance backs
/// [`clients()`], another backs [`servers()`].
pub struct ProviderRegistry<F> {
    entries: Mutex<HashMap<String, Entry<F>>>,
}

impl<F> Default for ProviderRegistry<F> {
    fn default() -> Self {
        ProviderRegistry {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

fn fn_token<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

impl ProviderRegistry<ClientFactory> {
    pub fn register(&self, name: &str, factory: ClientFactory) -> Result<()> {
        let token = fn_token(&factory);
        let mut entries = self.entries.lock().unwrap();
        match entries.get(name) {
            Some(existing) if existing.token == token => Ok(()),
            Some(_) => Err(Error::AlreadyRegistered(name.to_string())),
            None => {
                entries.insert(name.to_string(), Entry { factory, token });
                Ok(())
            }
        }
    }

    pub fn unregister(&self, name: &str) {
        self.entries.lock().unwrap().remove(name);
    }

    pub fn create(&self, name: &str, config: &Config) -> Result<Arc<dyn ChannelProvider>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(name) {
            Some(entry) => Ok((entry.factory)(config)),
            None => Err(Error::NotRegistered(name.to_string())),
        }
    }
}

impl ProviderRegistry<ServerFactory> {
    pub fn register(&self, name: &str, factory: ServerFactory) -> Result<()> {
        let token = fn_token(&factory);
        let mut entries = self.entries.lock().unwrap();
        match entries.get(name) {
            Some(existing) if existing.token == token => Ok(()),
            Some(_) => Err(Error::AlreadyRegistered(name.to_string())),
            None => {
                entries.insert(name.to_string(), Entry { factory, token });
                Ok(())
            }
        }
    }

    pub fn unregister(&self, name: &str) {
        self.entries.lock().unwrap().remove(name);
    }

    pub fn create(&self, name: &str, config: &Config) -> Result<Arc<dyn ServerChannelProvider>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(name) {
            Some(entry) => Ok((entry.factory)(config)),
            None => Err(Error::NotRegistered(name.to_string())),
        }
    }
}

static CLIENTS: OnceLock<ProviderRegistry<ClientFactory>> = OnceLock::new();
static SERVERS: OnceLock<ProviderRegistry<ServerFactory>> = OnceLock::new();

/// The process-wide client-provider directory.
pub fn clients() -> &'static ProviderRegistry<ClientFactory> {
    CLIENTS.get_or_init(ProviderRegistry::default)
}

/// The process-wide server-provider directory.
pub fn servers() -> &'static ProviderRegistry<ServerFactory> {
    SERVERS.get_or_init(ProviderRegistry::default)
}

/// Splits a compound provider name (`"client:pva"`, `"server:pva"`, or bare
/// `"pva"`) into the directory it selects and the bare name within it
/// (spec §4.1, §6).
pub fn split_compound_name(name: &str) -> (Directory, &str) {
    if let Some(rest) = name.strip_prefix("server:") {
        (Directory::Servers, rest)
    } else if let Some(rest) = name.strip_prefix("client:") {
        (Directory::Clients, rest)
    } else {
        (Directory::Clients, name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directory {
    Clients,
    Servers,
}

/// Creates a client provider by compound name against the global registry,
/// resolving `"[client:|server:]<name>"` as described in spec §4.1/§6. Only
/// the `clients` directory makes sense for [`crate::client::ClientProvider`]
/// construction; a `server:` prefix here is an invalid argument.
pub fn create_client_provider(name: &str, config: &Config) -> Result<Arc<dyn ChannelProvider>> {
    match split_compound_name(name) {
        (Directory::Clients, bare) => clients().create(bare, config),
        (Directory::Servers, _) => Err(Error::InvalidArgument(format!(
            "'{name}' names a server provider, not a client provider"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ConnectionState;

    struct StubProvider(&'static str);
    impl ChannelProvider for StubProvider {
        fn name(&self) -> &str {
            self.0
        }
        fn create_channel(
            &self,
            name: &str,
            _requester: Arc<dyn Requester>,
            _priority: u8,
            _address_hint: Option<std::net::SocketAddr>,
        ) -> Result<Arc<dyn Channel>> {
            Ok(Arc::new(crate::testing::LoopbackChannel::new(
                name,
                ConnectionState::Connected,
            )))
        }
    }

    #[test]
    fn register_is_idempotent_on_identical_factory() {
        let registry: ProviderRegistry<ClientFactory> = ProviderRegistry::default();
        let factory: ClientFactory = Arc::new(|_cfg| Arc::new(StubProvider("x")) as _);
        registry.register("x", factory.clone()).unwrap();
        registry.register("x", factory).unwrap();
    }

    #[test]
    fn register_conflicting_factory_fails() {
        let registry: ProviderRegistry<ClientFactory> = ProviderRegistry::default();
        let f1: ClientFactory = Arc::new(|_cfg| Arc::new(StubProvider("x")) as _);
        let f2: ClientFactory = Arc::new(|_cfg| Arc::new(StubProvider("x")) as _);
        registry.register("x", f1).unwrap();
        assert!(matches!(
            registry.register("x", f2),
            Err(Error::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn create_missing_name_is_not_registered() {
        let registry: ProviderRegistry<ClientFactory> = ProviderRegistry::default();
        let config = Config::default();
        assert!(matches!(
            registry.create("missing", &config),
            Err(Error::NotRegistered(_))
        ));
    }

    #[test]
    fn split_compound_name_selects_directory() {
        assert_eq!(split_compound_name("pva"), (Directory::Clients, "pva"));
        assert_eq!(
            split_compound_name("client:pva"),
            (Directory::Clients, "pva")
        );
        assert_eq!(
            split_compound_name("server:pva"),
            (Directory::Servers, "pva")
        );
    }
}
