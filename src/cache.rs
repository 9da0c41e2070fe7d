//! The session-cache envelope.
//!
//! The engine's serialized session omits one thing higher layers care about:
//! which certificate this side actually presented. The cache adapter
//! therefore wraps the native blob in a small self-describing envelope that
//! carries the certificate alongside, so that a resumed endpoint can report
//! its own credentials without a fresh full handshake.
//!
//! The envelope format is versioned JSON with base64 payload fields. It is
//! internal to this crate but must stay stable across releases, since cached
//! sessions outlive processes.

use crate::{endpoint::RawCredentials, error::Error};
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use std::io;

/// Caller-side session store callback: `(key, envelope)`.
pub type CacheStore = Box<dyn FnMut(&[u8], &[u8]) -> io::Result<()> + Send>;

/// Caller-side session removal callback.
pub type CacheRemove = Box<dyn FnMut(&[u8]) -> io::Result<()> + Send>;

/// Caller-side session retrieval callback. Returns the envelope previously
/// stored under the key, or an error if unknown.
pub type CacheRetrieve = Box<dyn FnMut(&[u8]) -> io::Result<Vec<u8>> + Send>;

const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    v: u32,
    session: String,
    our_cert: Option<String>,
}

/// Wrap a native session blob and the locally-presented certificate into one
/// opaque envelope.
pub(crate) fn seal(session: &[u8], our_cert: Option<&RawCredentials>) -> io::Result<Vec<u8>> {
    let envelope = Envelope {
        v: ENVELOPE_VERSION,
        session: BASE64.encode(session),
        our_cert: match our_cert {
            Some(RawCredentials::X509(der)) => Some(BASE64.encode(der)),
            Some(RawCredentials::Anonymous) | None => None,
        },
    };

    serde_json::to_vec(&envelope).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// Unwrap an envelope into the native session blob and the certificate this
/// side presented when the session was stored.
pub(crate) fn open(bytes: &[u8]) -> Result<(Vec<u8>, RawCredentials), Error> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| Error::Parse(format!("malformed session envelope: {}", e)))?;

    if envelope.v != ENVELOPE_VERSION {
        return Err(Error::Parse(format!(
            "unsupported session envelope version {}",
            envelope.v
        )));
    }

    let session = BASE64
        .decode(envelope.session.as_bytes())
        .map_err(|e| Error::Parse(format!("malformed session envelope: {}", e)))?;

    let our_cert = match envelope.our_cert {
        Some(cert) => RawCredentials::X509(
            BASE64
                .decode(cert.as_bytes())
                .map_err(|e| Error::Parse(format!("malformed session envelope: {}", e)))?,
        ),
        None => RawCredentials::Anonymous,
    };

    Ok((session, our_cert))
}
