use thiserror::Error;

/// Errors raised by the channel cache, channel handles, the provider
/// registries, the transport registry and the server context.
///
/// Propagation policy (see spec §7): listener and emitter callback failures
/// never surface through this type — they are caught at the dispatch
/// boundary, logged, and the offending listener is dropped. Everything else
/// here propagates to the caller of the public method that raised it.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty channel name, null provider, or an unrecognized provider name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A double `initialize`, a concurrent `run`, or `run`/`initialize`
    /// called outside the state they require. Requesting an operation
    /// (get/put/monitor/rpc) on an already-destroyed channel is not an
    /// error: it yields a born-cancelled `Operation` instead (spec §4.4).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Waiting for a connection or operation past its deadline.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// The underlying provider could not create a channel or circuit.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A provider name was absent from the registry at `create` time.
    #[error("provider not registered: {0}")]
    NotRegistered(String),

    /// An operation on a circuit that has already closed.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// `register(name, factory)` called with a name already bound to a
    /// different factory.
    #[error("provider already registered: {0}")]
    AlreadyRegistered(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
