//! A transport-agnostic TLS endpoint layer over a native TLS engine.
//!
//! nettls does not implement TLS itself. It wraps a native engine (the
//! interface a GnuTLS binding would satisfy, see [`engine`]) and exposes a
//! uniform provider surface to higher-level network services: credential and
//! configuration builders, a strictly non-blocking endpoint state machine,
//! session resumption with an application-visible certificate carried
//! alongside the engine's own session blob, and a typed error taxonomy that
//! no raw engine code ever escapes.
//!
//! # Driving an endpoint
//!
//! Everything is caller-driven. An operation that cannot make progress
//! without the transport raises a *suspension signal* —
//! [`Error::AgainRead`] or [`Error::AgainWrite`] — and the caller repeats
//! the same call once the transport is ready in that direction:
//!
//! ```ignore
//! let mut endpoint = provider.create_endpoint(
//!     Role::Client,
//!     recv_callback,
//!     send_callback,
//!     Some("example.test".into()),
//!     config,
//! )?;
//!
//! loop {
//!     match endpoint.hello() {
//!         Ok(()) => break,
//!         Err(Error::AgainRead) => wait_readable(&socket),
//!         Err(Error::AgainWrite) => wait_writable(&socket),
//!         Err(Error::Interrupted) | Err(Error::Warning(_)) => continue,
//!         Err(e) => return Err(e.into()),
//!     }
//! }
//!
//! endpoint.verify()?;
//! ```
//!
//! Renegotiation ("switching") flows through the same channel:
//! [`Error::SwitchRequest`] and [`Error::SwitchResponse`] are control flow,
//! not failures.
//!
//! # Sharing
//!
//! [`Credentials`] and [`Config`] are immutable once built and freely shared
//! between endpoints. One endpoint must only be driven by one thread at a
//! time; independent endpoints may run in parallel.
//!
//! # Logging
//!
//! State transitions and engine outcomes are logged through [`tracing`] at
//! debug and trace levels, grouped under one span per endpoint.

#![deny(unsafe_code)]
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

pub mod cache;
pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod pem;
pub mod provider;

pub use crate::{
    cache::{CacheRemove, CacheRetrieve, CacheStore},
    config::{Config, ConfigBuilder, DhParams, PeerAuth, VerifyHook},
    credentials::{CertSource, Credentials, CrlSource, PrivateKeySource, X509CredentialsBuilder},
    endpoint::{
        AddressedServer, CloseDirection, Endpoint, RawCredentials, RecvFn, Role, SendFn,
        StashedEndpoint, State,
    },
    error::{Error, ErrorCode},
    provider::{
        default_provider, set_default_provider, Implementation, NativeProvider, TlsProvider,
    },
};
