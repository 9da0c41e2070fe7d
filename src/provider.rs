//! The provider facade.
//!
//! A [`TlsProvider`] is the capability surface the rest of the world sees:
//! it builds credentials, configurations, and endpoints, and resolves error
//! codes into text. The one concrete provider in this crate is
//! [`NativeProvider`], which carries a native [`Engine`]; callers that need
//! to know which implementation they hold downcast through
//! [`TlsProvider::implementation`] rather than guessing from the name.
//!
//! A process-wide default slot lets an application register one provider up
//! front and have every component pick it up with [`default_provider`].

use crate::{
    config::{Config, ConfigBuilder},
    credentials::{Credentials, X509CredentialsBuilder},
    endpoint::{Endpoint, RecvFn, Role, SendFn, StashedEndpoint},
    engine::Engine,
    error::{self, Error, ErrorCode},
};
use once_cell::sync::Lazy;
use std::{
    fmt,
    sync::{Arc, RwLock},
};

/// The process-wide default provider slot.
static DEFAULT_PROVIDER: Lazy<RwLock<Option<Arc<dyn TlsProvider>>>> =
    Lazy::new(|| RwLock::new(None));

/// A TLS implementation, able to mint credentials, configurations, and
/// endpoints that all share the same underlying engine.
pub trait TlsProvider: Send + Sync {
    /// A short name identifying this provider.
    fn name(&self) -> &str;

    /// The concrete implementation behind this trait object.
    fn implementation(&self) -> Implementation;

    /// Assemble an X.509 credential set from the collected sources.
    fn create_x509_credentials(
        &self,
        builder: X509CredentialsBuilder,
    ) -> Result<Credentials, Error>;

    /// Materialize an endpoint configuration.
    fn create_config(&self, builder: ConfigBuilder) -> Result<Arc<Config>, Error>;

    /// Create an endpoint bound to the given transport callbacks.
    ///
    /// A client endpoint whose configuration authenticates the peer must be
    /// given a `peer_name` unless name checking was explicitly disabled.
    fn create_endpoint(
        &self,
        role: Role,
        recv: RecvFn,
        send: SendFn,
        peer_name: Option<String>,
        config: Arc<Config>,
    ) -> Result<Endpoint, Error>;

    /// Create a client endpoint pre-loaded with serialized session state
    /// (from [`Endpoint::get_session_data`]), so that the first `hello`
    /// attempts an abbreviated handshake.
    fn resume_client(
        &self,
        recv: RecvFn,
        send: SendFn,
        peer_name: Option<String>,
        config: Arc<Config>,
        session_blob: &[u8],
    ) -> Result<Endpoint, Error>;

    /// Detach an endpoint from its transport. See [`Endpoint::stash`].
    fn stash_endpoint(&self, endpoint: Endpoint) -> StashedEndpoint {
        endpoint.stash()
    }

    /// Reattach a stashed endpoint to a new transport. See
    /// [`Endpoint::restore`].
    fn restore_endpoint(
        &self,
        stashed: StashedEndpoint,
        recv: RecvFn,
        send: SendFn,
    ) -> Endpoint {
        Endpoint::restore(stashed, recv, send)
    }

    /// Human-readable text for an error code: fixed text for this crate's
    /// sentinel codes, the engine's text for its own codes.
    fn error_message(&self, code: &str) -> String;
}

/// Identifies the concrete provider behind a [`TlsProvider`] trait object.
#[derive(Clone)]
#[non_exhaustive]
pub enum Implementation {
    /// The built-in provider over a native TLS engine.
    Native(NativeProvider),
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Implementation::Native(provider) => {
                f.debug_tuple("Native").field(provider).finish()
            }
        }
    }
}

/// The concrete provider over a native TLS engine.
///
/// Cloning is cheap; all clones share the same engine.
#[derive(Clone)]
pub struct NativeProvider {
    engine: Arc<dyn Engine>,
}

impl NativeProvider {
    /// Create a provider over the given engine.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Create a provider over the given engine and register it as the
    /// process-wide default.
    pub fn register(engine: Arc<dyn Engine>) -> Arc<Self> {
        let provider = Arc::new(Self::new(engine));
        set_default_provider(provider.clone());
        provider
    }

    /// The engine this provider is built on.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }
}

impl TlsProvider for NativeProvider {
    fn name(&self) -> &str {
        self.engine.name()
    }

    fn implementation(&self) -> Implementation {
        Implementation::Native(self.clone())
    }

    fn create_x509_credentials(
        &self,
        builder: X509CredentialsBuilder,
    ) -> Result<Credentials, Error> {
        builder.build(&*self.engine)
    }

    fn create_config(&self, builder: ConfigBuilder) -> Result<Arc<Config>, Error> {
        builder.build(&*self.engine).map(Arc::new)
    }

    fn create_endpoint(
        &self,
        role: Role,
        recv: RecvFn,
        send: SendFn,
        peer_name: Option<String>,
        config: Arc<Config>,
    ) -> Result<Endpoint, Error> {
        Endpoint::new(role, recv, send, peer_name, config, &*self.engine, None)
    }

    fn resume_client(
        &self,
        recv: RecvFn,
        send: SendFn,
        peer_name: Option<String>,
        config: Arc<Config>,
        session_blob: &[u8],
    ) -> Result<Endpoint, Error> {
        Endpoint::new(
            Role::Client,
            recv,
            send,
            peer_name,
            config,
            &*self.engine,
            Some(session_blob),
        )
    }

    fn error_message(&self, code: &str) -> String {
        if let Some(text) = error::sentinel_message(code) {
            return text.to_owned();
        }

        self.engine
            .error_message(&ErrorCode::new(code))
            .unwrap_or_else(|| format!("unknown TLS error code {}", code))
    }
}

impl fmt::Debug for NativeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeProvider")
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Register a provider as the process-wide default, replacing any previous
/// one. Endpoints already created keep the provider they were created with.
pub fn set_default_provider(provider: Arc<dyn TlsProvider>) {
    tracing::debug!(name = provider.name(), "default TLS provider set");
    *DEFAULT_PROVIDER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(provider);
}

/// The process-wide default provider, if one has been registered.
pub fn default_provider() -> Option<Arc<dyn TlsProvider>> {
    DEFAULT_PROVIDER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}
