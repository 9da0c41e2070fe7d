//! The interface to the native TLS engine.
//!
//! This crate does not implement the TLS protocol itself. All cryptography,
//! record handling, and alert processing is delegated to a *native engine*
//! behind the trait family defined here, the same way an engine such as
//! GnuTLS would be wired up through a binding crate. The rest of the crate
//! is written purely against these traits, so a different engine can be
//! slotted in without touching the endpoint state machine.
//!
//! An engine implementation is expected to normalize its native error codes
//! into [`EngineError`]: the structured variants (`Again`, `Interrupted`,
//! `Rehandshake`, ...) are the conditions the endpoint state machine reacts
//! to, and everything else flows through [`EngineError::Code`] verbatim.

use crate::{endpoint::Role, error::ErrorCode};
use std::{fmt, io, sync::Arc};

/// Transport read callback handed to the engine.
///
/// Reads into the given buffer and returns the number of bytes read. `Ok(0)`
/// on a non-empty buffer means the transport reached end-of-file. A transport
/// that cannot make progress without blocking returns an error of kind
/// [`io::ErrorKind::WouldBlock`].
pub type PullFn = Box<dyn FnMut(&mut [u8]) -> io::Result<usize> + Send>;

/// Transport write callback handed to the engine.
///
/// Writes from the given buffer and returns the number of bytes accepted,
/// signaling would-block like [`PullFn`] does.
pub type PushFn = Box<dyn FnMut(&[u8]) -> io::Result<usize> + Send>;

/// Engine-side session store callback: `(key, data, local_cert)`.
///
/// `data` is the engine's serialized session and `local_cert` is the
/// DER-encoded certificate this side presented during the handshake, if any.
/// The certificate travels along because the callback fires while the engine
/// is inside the handshake, where the session cannot be re-entered to ask.
pub type CacheStoreFn = Box<dyn FnMut(&[u8], &[u8], Option<&[u8]>) -> io::Result<()> + Send>;

/// Engine-side session removal callback.
pub type CacheRemoveFn = Box<dyn FnMut(&[u8]) -> io::Result<()> + Send>;

/// Engine-side session retrieval callback. Returns the serialized session
/// previously passed to the store callback, or an error if unknown.
pub type CacheRetrieveFn = Box<dyn FnMut(&[u8]) -> io::Result<Vec<u8>> + Send>;

/// The transport direction an engine operation was blocked on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoDirection {
    /// The engine needs the transport to become readable.
    Read,

    /// The engine needs the transport to become writable.
    Write,
}

/// A TLS alert, as far as this layer cares to distinguish them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Alert {
    /// The `no_renegotiation` warning alert, used to refuse a switch.
    NoRenegotiation,

    /// Any other alert, identified by its TLS alert number.
    Other(u8),
}

/// How far to drive the close-notify exchange in [`EngineSession::bye`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseHow {
    /// Send our close-notify but keep reading.
    Write,

    /// Full bidirectional shutdown.
    Both,
}

/// Client-certificate solicitation policy for server sessions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertRequest {
    /// Ask the client for a certificate but accept its absence.
    Request,

    /// Demand a certificate from the client.
    Require,
}

/// A private key in one of the forms the engine can import directly.
#[derive(Clone, Copy, Debug)]
pub enum KeyImport<'a> {
    /// A PEM-armored key of any algorithm the engine recognizes.
    Pem(&'a [u8]),

    /// A PKCS#8 DER key, encrypted iff a password is given.
    Pkcs8 {
        /// The DER-encoded key data.
        der: &'a [u8],

        /// Decryption password for encrypted PKCS#8.
        password: Option<&'a str>,
    },
}

/// An error reported by the native engine, normalized out of its native
/// error-code space.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineError {
    /// The operation could not complete without blocking. The direction must
    /// be read from [`EngineSession::io_direction`] at the moment this value
    /// is received; later engine calls overwrite it.
    Again,

    /// A signal interrupted the operation; it may be retried as-is.
    Interrupted,

    /// The peer requested or acknowledged a rehandshake.
    Rehandshake,

    /// A warning alert arrived. The alert itself is available from
    /// [`EngineSession::last_alert`]; the payload is the engine's code for
    /// the condition.
    WarningAlert(ErrorCode),

    /// The requested item does not exist (for example an SNI index past the
    /// end of what the client supplied).
    UnavailableData,

    /// Any other engine condition, fatal or not.
    Code {
        /// The engine's identifier for the condition.
        code: ErrorCode,

        /// Whether the engine considers the session dead.
        fatal: bool,
    },
}

impl EngineError {
    /// The code identifying this condition. Structured variants map to fixed
    /// identifiers in this crate's namespace; pass-through codes are returned
    /// verbatim.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Again => ErrorCode::from_static("NETTLS_E_AGAIN"),
            EngineError::Interrupted => ErrorCode::from_static("NETTLS_E_INTERRUPTED"),
            EngineError::Rehandshake => ErrorCode::from_static("NETTLS_E_REHANDSHAKE"),
            EngineError::WarningAlert(code) => code.clone(),
            EngineError::UnavailableData => {
                ErrorCode::from_static("NETTLS_E_REQUESTED_DATA_NOT_AVAILABLE")
            }
            EngineError::Code { code, .. } => code.clone(),
        }
    }

    /// Whether the engine considers the session unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Code { fatal: true, .. })
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine error: {}", self.code())
    }
}

impl std::error::Error for EngineError {}

/// A native TLS engine: the factory for credentials, DH parameters, and
/// sessions.
pub trait Engine: Send + Sync {
    /// A short name identifying the engine, e.g. `"gnutls"`.
    fn name(&self) -> &str;

    /// Parse and validate a priority/algorithms string without applying it.
    fn check_priority(&self, priority: &str) -> Result<(), EngineError>;

    /// Create an empty credential set to be filled by a builder.
    fn new_credentials(&self) -> Result<Box<dyn EngineCredentials>, EngineError>;

    /// Import DER-encoded Diffie-Hellman parameters.
    fn import_dh_params(&self, der: &[u8]) -> Result<Arc<dyn EngineDhParams>, EngineError>;

    /// Generate fresh Diffie-Hellman parameters of the given bit length.
    fn generate_dh_params(&self, bits: u32) -> Result<Arc<dyn EngineDhParams>, EngineError>;

    /// Create a new, unconfigured session for the given role.
    fn new_session(&self, role: Role) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Human-readable text for an engine error code, if the engine knows it.
    fn error_message(&self, code: &ErrorCode) -> Option<String>;
}

/// A credential set under construction. Once built it is shared immutably
/// between sessions, which the type system enforces by only handing out
/// `Arc<dyn EngineCredentials>` afterwards.
pub trait EngineCredentials: Send + Sync {
    /// Add one DER-encoded certificate as a trust anchor.
    fn add_trust_anchor(&mut self, der: &[u8]) -> Result<(), EngineError>;

    /// Load the platform trust store, returning how many anchors were added.
    fn add_system_trust(&mut self) -> Result<usize, EngineError>;

    /// Add one DER-encoded certificate revocation list.
    fn add_crl(&mut self, der: &[u8]) -> Result<(), EngineError>;

    /// Install a certificate chain and its private key as one identity. The
    /// engine rejects a key that does not match the chain.
    fn add_key_pair(&mut self, chain: &[Vec<u8>], key: KeyImport<'_>) -> Result<(), EngineError>;

    /// Reset peer verification flags to the engine's standard rules.
    fn set_default_verify_flags(&mut self);
}

/// Opaque imported Diffie-Hellman parameters.
pub trait EngineDhParams: fmt::Debug + Send + Sync {}

/// One native TLS session.
///
/// Apart from `set_transport` and `set_cache_callbacks`, every method that
/// exchanges bytes with the peer can fail with [`EngineError::Again`]; the
/// caller retries the same call once the transport is ready in the direction
/// reported by [`io_direction`](EngineSession::io_direction).
pub trait EngineSession: Send {
    /// Attach the byte transport. Replaces any previously attached pair.
    fn set_transport(&mut self, pull: PullFn, push: PushFn);

    /// Apply a priority string, credential set, and optional Diffie-Hellman
    /// parameters to this session in one all-or-nothing step.
    ///
    /// The engine must stage everything that can fail before touching any
    /// session state: on error the session keeps its previous configuration
    /// in full, so the caller can expose configuration replacement as an
    /// atomic operation.
    fn configure(
        &mut self,
        priority: &str,
        credentials: &Arc<dyn EngineCredentials>,
        dh: Option<&Arc<dyn EngineDhParams>>,
    ) -> Result<(), EngineError>;

    /// On a server session, solicit a certificate from the client.
    fn request_client_certificate(&mut self, request: CertRequest) -> Result<(), EngineError>;

    /// Drive the handshake (initial or renegotiated) to completion.
    fn handshake(&mut self) -> Result<(), EngineError>;

    /// Encrypt and send application data, returning the bytes accepted.
    fn send(&mut self, buf: &[u8]) -> Result<usize, EngineError>;

    /// Receive and decrypt application data. `Ok(0)` on a non-empty buffer
    /// means the peer sent close-notify.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Send close-notify for the given scope.
    fn bye(&mut self, how: CloseHow) -> Result<(), EngineError>;

    /// Send a rehandshake request to the peer.
    fn request_rehandshake(&mut self) -> Result<(), EngineError>;

    /// Send a warning-level alert.
    fn send_warning_alert(&mut self, alert: Alert) -> Result<(), EngineError>;

    /// The transport direction the most recent `Again` was blocked on.
    fn io_direction(&self) -> IoDirection;

    /// The most recently received alert, if any.
    fn last_alert(&self) -> Option<Alert>;

    /// Number of decrypted bytes buffered inside the engine, readable
    /// without touching the transport.
    fn pending_bytes(&self) -> usize;

    /// The session identifier assigned during the handshake.
    fn session_id(&self) -> Result<Vec<u8>, EngineError>;

    /// Serialize the session for later resumption.
    fn session_data(&self) -> Result<Vec<u8>, EngineError>;

    /// Pre-load serialized session state so the next handshake attempts
    /// resumption.
    fn set_session_data(&mut self, data: &[u8]) -> Result<(), EngineError>;

    /// Install the session-cache callbacks the engine consults during
    /// handshakes.
    fn set_cache_callbacks(
        &mut self,
        store: CacheStoreFn,
        remove: CacheRemoveFn,
        retrieve: CacheRetrieveFn,
    );

    /// The DER certificate this side presented during the handshake, if the
    /// engine still has it. Resumed sessions typically return `None` here.
    fn our_cert(&self) -> Option<Vec<u8>>;

    /// The peer's certificate chain in DER, leaf first. Empty if the peer
    /// presented none.
    fn peer_certs(&self) -> Vec<Vec<u8>>;

    /// Run the engine's chain validation against the attached trust anchors
    /// and CRLs. Returns the engine's status bitmask; zero means valid.
    fn verify_peers(&self) -> Result<u32, EngineError>;

    /// Whether the given DER certificate matches the given DNS-style host
    /// name under the engine's matching rules.
    fn check_hostname(&self, cert: &[u8], name: &str) -> bool;

    /// The `index`-th SNI host name supplied by the client, or
    /// [`EngineError::UnavailableData`] past the end of the list.
    fn sni_hostname(&self, index: usize) -> Result<String, EngineError>;

    /// The negotiated cipher suite family, e.g. `"X509"`.
    fn cipher_suite_type(&self) -> String;

    /// The negotiated symmetric cipher.
    fn cipher_algo(&self) -> String;

    /// The negotiated key exchange algorithm.
    fn kx_algo(&self) -> String;

    /// The negotiated MAC algorithm.
    fn mac_algo(&self) -> String;

    /// The negotiated record compression, `"NULL"` in practice.
    fn compression_algo(&self) -> String;

    /// The type of the peer certificate, e.g. `"X509"`.
    fn cert_type(&self) -> String;

    /// The negotiated protocol version, e.g. `"TLS1.3"`.
    fn protocol(&self) -> String;
}
