//! Public client surface: a thin facade over the provider registry and the
//! channel cache (spec §6 "Operational surface (client)").

use std::sync::Arc;

use crate::channel::{ChannelCache, ChannelHandle, ChannelOptions};
use crate::config::{Config, ConfigBuilder};
use crate::error::Result;
use crate::provider::{create_client_provider, ChannelProvider};

/// `ClientProvider(name, config)` / `ClientProvider(provider_instance)` from
/// spec §6, plus `connect`/`disconnect`/`disconnect_all`.
pub struct ClientProvider {
    provider: Arc<dyn ChannelProvider>,
    cache: ChannelCache,
}

impl ClientProvider {
    /// Resolves `provider_name` (`"[client:|server:]<name>"`, default
    /// directory `clients`) against the global registry using `config`, or
    /// `Config::default()` merged with the environment if `config` is
    /// `None` (mirrors `pvac::ClientProvider`'s
    /// `conf ? conf : ConfigurationBuilder().push_env().build()`).
    pub fn new(provider_name: &str, config: Option<Config>) -> Result<Self> {
        let config = config.unwrap_or_else(|| ConfigBuilder::new().push_env().build());
        let provider = create_client_provider(provider_name, &config)?;
        Ok(ClientProvider {
            provider,
            cache: ChannelCache::new(),
        })
    }

    /// Wraps an already-constructed provider instance directly, bypassing
    /// the registry.
    pub fn from_provider(provider: Arc<dyn ChannelProvider>) -> Self {
        ClientProvider {
            provider,
            cache: ChannelCache::new(),
        }
    }

    /// Returns the cached handle for `(name, options)` or creates one via
    /// the underlying provider (spec §4.2).
    pub fn connect(&self, name: &str, options: ChannelOptions) -> Result<Arc<ChannelHandle>> {
        self.cache.connect(name, options, self.provider.as_ref())
    }

    pub fn disconnect(&self, name: &str, options: ChannelOptions) -> bool {
        self.cache.disconnect(name, options)
    }

    pub fn disconnect_all(&self) {
        self.cache.disconnect_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ConnectionState;
    use crate::provider::clients;
    use crate::testing::LoopbackProvider;
    use std::sync::atomic::{AtomicU32, Ordering};

    static REGISTERED: AtomicU32 = AtomicU32::new(0);

    fn register_unique_test_provider() -> String {
        let id = REGISTERED.fetch_add(1, Ordering::SeqCst);
        let name = format!("test-loopback-{id}");
        let factory_name = name.clone();
        clients()
            .register(
                &name,
                Arc::new(move |_cfg: &Config| {
                    let _ = &factory_name;
                    Arc::new(LoopbackProvider::new(ConnectionState::Connected)) as Arc<dyn ChannelProvider>
                }),
            )
            .unwrap();
        name
    }

    #[test]
    fn connect_via_registry_by_name() {
        let name = register_unique_test_provider();
        let client = ClientProvider::new(&name, Some(Config::default())).unwrap();
        let handle = client.connect("X", ChannelOptions::default()).unwrap();
        assert_eq!(handle.name(), "X");
    }

    #[test]
    fn from_provider_bypasses_registry() {
        let provider = Arc::new(LoopbackProvider::new(ConnectionState::Connected));
        let client = ClientProvider::from_provider(provider);
        let handle = client.connect("Y", ChannelOptions::default()).unwrap();
        assert_eq!(handle.name(), "Y");
    }
}
