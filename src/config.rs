//! Endpoint configuration.
//!
//! A [`Config`] is an immutable tuple of priority string, Diffie-Hellman
//! parameters, peer-authentication policy, credentials, an optional user
//! verification hook, and the name-check policy. It is built once, wrapped
//! in an [`Arc`], and shared by any number of endpoints; an endpoint only
//! exchanges it for another config during a switch.

use crate::{
    credentials::Credentials,
    endpoint::Endpoint,
    engine::{Engine, EngineDhParams},
    error::Error,
    pem,
};
use std::{fmt, path::PathBuf, sync::Arc};

/// How hard an endpoint insists on authenticating its peer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PeerAuth {
    /// Do not authenticate the peer at all.
    #[default]
    None,

    /// Validate a certificate if the peer presents one, but accept its
    /// absence.
    Optional,

    /// Demand and validate a peer certificate.
    Required,
}

/// Where the Diffie-Hellman parameters come from.
#[derive(Clone, Debug)]
pub enum DhParams {
    /// A PEM file containing a `DH PARAMETERS` block.
    PemFile(PathBuf),

    /// DER-encoded parameters held in memory.
    Der(Vec<u8>),

    /// Generate fresh parameters of the given bit length when the config is
    /// built. Generation can take a while for large sizes.
    Generate(u32),
}

/// A user-supplied verification hook, called after the built-in checks pass.
/// Returning `false` fails verification.
pub type VerifyHook = Arc<dyn Fn(&Endpoint) -> bool + Send + Sync>;

/// A builder for creating an endpoint configuration.
#[must_use = "builders have no effect if unused"]
pub struct ConfigBuilder {
    priority: String,
    dh_params: Option<DhParams>,
    peer_auth: PeerAuth,
    verify: Option<VerifyHook>,
    peer_name_unchecked: bool,
    credentials: Credentials,
}

impl ConfigBuilder {
    pub(crate) fn new(credentials: Credentials) -> Self {
        Self {
            priority: "NORMAL".to_owned(),
            dh_params: None,
            peer_auth: PeerAuth::None,
            verify: None,
            peer_name_unchecked: false,
            credentials,
        }
    }

    /// Set the priority/algorithms string handed to the engine.
    ///
    /// The syntax is the engine's own. The default is `"NORMAL"`, the
    /// engine's standard suite selection.
    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Provide Diffie-Hellman parameters for suites that need them.
    pub fn dh_params(mut self, dh_params: DhParams) -> Self {
        self.dh_params = Some(dh_params);
        self
    }

    /// Set the peer-authentication policy. The default is
    /// [`PeerAuth::None`].
    pub fn peer_auth(mut self, peer_auth: PeerAuth) -> Self {
        self.peer_auth = peer_auth;
        self
    }

    /// Install a verification hook, called by `verify` after chain and name
    /// validation succeed. Returning `false` fails the verification with
    /// `UserVerificationFailed`.
    pub fn verify(mut self, hook: impl Fn(&Endpoint) -> bool + Send + Sync + 'static) -> Self {
        self.verify = Some(Arc::new(hook));
        self
    }

    /// Skip matching the peer certificate against the expected peer name.
    ///
    /// Without this, a client that authenticates its peer must be given a
    /// peer name at endpoint creation.
    pub fn peer_name_unchecked(mut self, unchecked: bool) -> Self {
        self.peer_name_unchecked = unchecked;
        self
    }

    /// Materialize the configuration against the given engine.
    pub(crate) fn build(self, engine: &dyn Engine) -> Result<Config, Error> {
        engine.check_priority(&self.priority)?;

        let dh = match &self.dh_params {
            None => None,
            Some(DhParams::PemFile(path)) => {
                let blocks = pem::decode_file(path, pem::DH_PARAMS_TAGS, false)?;
                Some(engine.import_dh_params(&blocks[0].1)?)
            }
            Some(DhParams::Der(der)) => Some(engine.import_dh_params(der)?),
            Some(DhParams::Generate(bits)) => {
                tracing::debug!(bits, "generating DH parameters");
                Some(engine.generate_dh_params(*bits)?)
            }
        };

        Ok(Config {
            priority: self.priority,
            dh,
            peer_auth: self.peer_auth,
            credentials: self.credentials,
            verify: self.verify,
            peer_name_unchecked: self.peer_name_unchecked,
        })
    }
}

impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("priority", &self.priority)
            .field("peer_auth", &self.peer_auth)
            .field("peer_name_unchecked", &self.peer_name_unchecked)
            .finish_non_exhaustive()
    }
}

/// An immutable endpoint configuration.
pub struct Config {
    priority: String,
    dh: Option<Arc<dyn EngineDhParams>>,
    peer_auth: PeerAuth,
    credentials: Credentials,
    verify: Option<VerifyHook>,
    peer_name_unchecked: bool,
}

impl Config {
    /// Start building a configuration around the given credentials.
    pub fn builder(credentials: Credentials) -> ConfigBuilder {
        ConfigBuilder::new(credentials)
    }

    /// The priority/algorithms string.
    pub fn priority(&self) -> &str {
        &self.priority
    }

    /// The peer-authentication policy.
    pub fn peer_auth(&self) -> PeerAuth {
        self.peer_auth
    }

    /// The credential set endpoints present and validate against.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether peer-name matching is disabled.
    pub fn peer_name_unchecked(&self) -> bool {
        self.peer_name_unchecked
    }

    pub(crate) fn dh(&self) -> Option<&Arc<dyn EngineDhParams>> {
        self.dh.as_ref()
    }

    pub(crate) fn verify_hook(&self) -> Option<&VerifyHook> {
        self.verify.as_ref()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("priority", &self.priority)
            .field("dh", &self.dh)
            .field("peer_auth", &self.peer_auth)
            .field("verify", &self.verify.as_ref().map(|_| "<hook>"))
            .field("peer_name_unchecked", &self.peer_name_unchecked)
            .finish_non_exhaustive()
    }
}
