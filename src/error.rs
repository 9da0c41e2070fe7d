//! Types for error handling.
//!
//! Everything an endpoint can signal travels through one [`Error`] type,
//! including the conditions that are not failures at all: the suspension
//! signals ([`AgainRead`](Error::AgainRead) / [`AgainWrite`](Error::AgainWrite))
//! that mean "call me again when the transport is ready", and the switch
//! signals that carry renegotiation control flow. Callers are expected to
//! match on the variant; everything not recognized as recoverable should be
//! treated as fatal for the session.

use crate::engine::EngineError;
use std::{borrow::Cow, fmt};

/// An identifier for a TLS error condition.
///
/// Codes originating in the engine are passed through verbatim; conditions
/// detected by this crate use the fixed `NETTLS_`-prefixed identities below.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ErrorCode(Cow<'static, str>);

impl ErrorCode {
    /// The engine's chain validation rejected the peer certificate.
    pub const CERT_VERIFICATION_FAILED: ErrorCode =
        ErrorCode::from_static("NETTLS_CERT_VERIFICATION_FAILED");

    /// The peer certificate does not match the expected peer name.
    pub const NAME_VERIFICATION_FAILED: ErrorCode =
        ErrorCode::from_static("NETTLS_NAME_VERIFICATION_FAILED");

    /// The user-supplied verification hook rejected the peer.
    pub const USER_VERIFICATION_FAILED: ErrorCode =
        ErrorCode::from_static("NETTLS_USER_VERIFICATION_FAILED");

    /// The operation is not allowed in the endpoint's current state.
    pub const UNEXPECTED_STATE: ErrorCode = ErrorCode::from_static("NETTLS_UNEXPECTED_STATE");

    /// The peer presented no certificate although one was required.
    pub const NO_CERTIFICATE_FOUND: ErrorCode =
        ErrorCode::from_static("NETTLS_NO_CERTIFICATE_FOUND");

    /// Wrap a static code string.
    pub const fn from_static(code: &'static str) -> Self {
        ErrorCode(Cow::Borrowed(code))
    }

    /// Wrap an owned code string.
    pub fn new(code: impl Into<String>) -> Self {
        ErrorCode(Cow::Owned(code.into()))
    }

    /// The code as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// All conditions an endpoint or builder can surface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The transport would block in the read direction; retry the same call
    /// once it is readable.
    AgainRead,

    /// The transport would block in the write direction; retry the same call
    /// once it is writable.
    AgainWrite,

    /// A signal raced the call; retry the same call.
    Interrupted,

    /// The peer asked for a renegotiation during a read. Answer with
    /// `accept_switch` or `refuse_switch`.
    SwitchRequest,

    /// The peer answered our renegotiation request: `true` if it is willing
    /// to rehandshake, `false` if it sent `no_renegotiation`.
    SwitchResponse(bool),

    /// A non-fatal engine condition. The caller may continue or escalate.
    Warning(ErrorCode),

    /// Programmer error: the operation is not allowed in the current state.
    /// The endpoint is left unmodified.
    UnexpectedState,

    /// The engine's chain validation rejected the peer certificate.
    CertVerificationFailed,

    /// The peer certificate does not match the expected peer name.
    NameVerificationFailed,

    /// The user-supplied verification hook rejected the peer.
    UserVerificationFailed,

    /// The peer presented no certificate although policy requires one.
    NoCertificate,

    /// An encrypted private key was supplied without its password.
    PasswordRequired,

    /// A PEM source decoded to nothing and the caller did not opt into
    /// empty results.
    EmptyPem,

    /// A file could not be read or its PEM armor is malformed.
    Parse(String),

    /// A fatal engine error, including credential and configuration
    /// construction failures.
    Tls(ErrorCode),
}

impl Error {
    /// Whether this is a suspension signal that asks the caller to retry
    /// once the transport is ready.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::AgainRead | Error::AgainWrite)
    }

    /// The code identifying this condition, for conditions that have one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::UnexpectedState => Some(ErrorCode::UNEXPECTED_STATE),
            Error::CertVerificationFailed => Some(ErrorCode::CERT_VERIFICATION_FAILED),
            Error::NameVerificationFailed => Some(ErrorCode::NAME_VERIFICATION_FAILED),
            Error::UserVerificationFailed => Some(ErrorCode::USER_VERIFICATION_FAILED),
            Error::NoCertificate => Some(ErrorCode::NO_CERTIFICATE_FOUND),
            Error::Warning(code) | Error::Tls(code) => Some(code.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AgainRead => f.write_str("transport would block (read)"),
            Error::AgainWrite => f.write_str("transport would block (write)"),
            Error::Interrupted => f.write_str("interrupted, retry"),
            Error::SwitchRequest => f.write_str("peer requested a rehandshake"),
            Error::SwitchResponse(true) => f.write_str("peer accepted the rehandshake"),
            Error::SwitchResponse(false) => f.write_str("peer refused the rehandshake"),
            Error::Warning(code) => write!(f, "TLS warning: {}", code),
            Error::UnexpectedState
            | Error::CertVerificationFailed
            | Error::NameVerificationFailed
            | Error::UserVerificationFailed
            | Error::NoCertificate => {
                // These five carry a sentinel code with fixed text.
                match self.code().and_then(|code| sentinel_message(code.as_str())) {
                    Some(text) => f.write_str(text),
                    None => f.write_str("TLS verification error"),
                }
            }
            Error::PasswordRequired => f.write_str("private key is encrypted, password required"),
            Error::EmptyPem => f.write_str("PEM source contained no usable data"),
            Error::Parse(reason) => write!(f, "parse error: {}", reason),
            Error::Tls(code) => write!(f, "TLS error: {}", code),
        }
    }
}

impl std::error::Error for Error {}

/// Build-path translation for engine errors.
///
/// Outside a running session there is no blocked direction, switch state, or
/// alert to consult, so every engine condition collapses to a fatal
/// [`Error::Tls`] carrying the engine's code. Endpoint operations never use
/// this; they translate through the state-aware path instead.
impl From<EngineError> for Error {
    fn from(error: EngineError) -> Error {
        Error::Tls(error.code())
    }
}

/// Fixed human-readable text for this crate's sentinel codes. `None` for any
/// other code; those belong to the engine.
pub(crate) fn sentinel_message(code: &str) -> Option<&'static str> {
    match code {
        "NETTLS_CERT_VERIFICATION_FAILED" => Some("certificate verification failed"),
        "NETTLS_NAME_VERIFICATION_FAILED" => Some("peer name does not match the certificate"),
        "NETTLS_USER_VERIFICATION_FAILED" => Some("user verification hook rejected the peer"),
        "NETTLS_UNEXPECTED_STATE" => Some("operation not allowed in the current endpoint state"),
        "NETTLS_NO_CERTIFICATE_FOUND" => Some("peer did not present a certificate"),
        _ => None,
    }
}
