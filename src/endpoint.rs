//! The TLS endpoint and its state machine.
//!
//! An [`Endpoint`] is one TLS session bound to one peer through a pair of
//! non-blocking transport callbacks. All progress is made by the caller
//! re-driving operations: any operation that exchanges bytes with the
//! transport can surface [`Error::AgainRead`] or [`Error::AgainWrite`], after
//! which the caller waits for transport readiness in that direction and calls
//! the *same* operation again. No partial state leaks across a suspension;
//! retrying is always safe.
//!
//! The endpoint enforces a fixed operation/state table. Driving an operation
//! from a state it is not allowed in fails with [`Error::UnexpectedState`]
//! and leaves the endpoint untouched.

use crate::{
    cache::{self, CacheRemove, CacheRetrieve, CacheStore},
    config::{Config, PeerAuth},
    engine::{
        Alert, CacheRetrieveFn, CacheStoreFn, CertRequest, CloseHow, Engine, EngineError,
        EngineSession, IoDirection, PullFn, PushFn,
    },
    error::Error,
};
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// Transport read callback: fills the buffer, returns the bytes read.
/// `Ok(0)` on a non-empty buffer means end-of-file; would-block is an error
/// of kind [`io::ErrorKind::WouldBlock`].
pub type RecvFn = Box<dyn FnMut(&mut [u8]) -> io::Result<usize> + Send>;

/// Transport write callback: drains the buffer, returns the bytes accepted,
/// signaling would-block like [`RecvFn`] does.
pub type SendFn = Box<dyn FnMut(&[u8]) -> io::Result<usize> + Send>;

/// Which side of the connection an endpoint plays.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// The connecting side; initiates the handshake.
    Client,

    /// The accepting side.
    Server,
}

/// The endpoint states. See the crate docs for the transition table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Created, handshake not yet started.
    Start,

    /// The initial handshake is in progress.
    Handshake,

    /// Application data may flow in both directions.
    DataRW,

    /// Half-closed for writing: we sent close-notify, reads still work.
    DataR,

    /// Half-closed for reading: the peer sent close-notify, writes still
    /// work.
    DataW,

    /// We requested a switch and are reading while waiting for the answer.
    DataRS,

    /// A switch request is being sent, or the peer accepted ours and the
    /// rehandshake has not been driven yet.
    Switching,

    /// We accepted the peer's switch request and the rehandshake is in
    /// progress.
    Accepting,

    /// We are refusing the peer's switch request.
    Refusing,

    /// The session is over.
    End,
}

/// How far [`Endpoint::bye`] drives the close-notify exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseDirection {
    /// Nothing to do: the peer cannot be driven to stop sending.
    Receive,

    /// Close our sending direction.
    Send,

    /// Close both directions.
    All,
}

/// Raw credentials presented by one side of the connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RawCredentials {
    /// No certificate was presented.
    Anonymous,

    /// A DER-encoded X.509 certificate.
    X509(Vec<u8>),
}

/// One server name addressed by the client, from the SNI extension.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AddressedServer {
    /// A DNS host name.
    Domain(String),
}

/// The certificate cell shared between an endpoint and the closures
/// installed on its engine session.
type SharedCert = Arc<Mutex<Option<RawCredentials>>>;

/// A TLS session bound to one peer.
///
/// Endpoints are created through a [`TlsProvider`](crate::TlsProvider). One
/// endpoint must only ever be driven from one thread at a time; distinct
/// endpoints are independent.
pub struct Endpoint {
    role: Role,
    config: Arc<Config>,
    session: Box<dyn EngineSession>,
    peer_name: Option<String>,

    /// The certificate this side actually presented, computed after the
    /// handshake or restored by the session-cache adapter. Shared with the
    /// closures installed on the session, hence the cell.
    our_cert: SharedCert,

    /// Latched the first time the transport reports end-of-file.
    trans_eof: Arc<AtomicBool>,

    state: State,

    /// Groups log events of this endpoint; entered by every operation.
    span: tracing::Span,
}

impl Endpoint {
    pub(crate) fn new(
        role: Role,
        recv: RecvFn,
        send: SendFn,
        peer_name: Option<String>,
        config: Arc<Config>,
        engine: &dyn Engine,
        resume: Option<&[u8]>,
    ) -> Result<Self, Error> {
        // Fail closed: a client that authenticates its peer must know who it
        // is talking to, unless name checking was disabled on purpose.
        if role == Role::Client
            && config.peer_auth() != PeerAuth::None
            && !config.peer_name_unchecked()
            && peer_name.is_none()
        {
            return Err(Error::NameVerificationFailed);
        }

        let mut session = engine.new_session(role)?;
        session.configure(config.priority(), config.credentials().engine(), config.dh())?;

        if role == Role::Server {
            match config.peer_auth() {
                PeerAuth::None => {}
                PeerAuth::Optional => {
                    session.request_client_certificate(CertRequest::Request)?;
                }
                PeerAuth::Required => {
                    session.request_client_certificate(CertRequest::Require)?;
                }
            }
        }

        if let Some(blob) = resume {
            session.set_session_data(blob)?;
        }

        let trans_eof = Arc::new(AtomicBool::new(false));
        attach_transport(&mut *session, recv, send, trans_eof.clone());

        Ok(Self {
            role,
            config,
            session,
            peer_name,
            our_cert: Arc::new(Mutex::new(None)),
            trans_eof,
            state: State::Start,
            span: tracing::debug_span!("endpoint", role = ?role),
        })
    }

    /// Drive the handshake, initial or renegotiated.
    ///
    /// On success the endpoint enters [`State::DataRW`] and knows which
    /// certificate it presented. Non-fatal engine conditions surface as
    /// [`Error::Warning`] and the call may simply be repeated.
    pub fn hello(&mut self) -> Result<(), Error> {
        let _enter = self.span.clone().entered();
        self.expect_state(&[State::Start, State::Handshake, State::Switching])?;

        if self.state == State::Start {
            self.state = State::Handshake;
        }

        match self.session.handshake() {
            Ok(()) => {
                self.note_handshake_done();
                self.state = State::DataRW;
                tracing::debug!(protocol = %self.session.protocol(), "handshake complete");
                Ok(())
            }
            Err(e) => Err(self.translate(e, true)),
        }
    }

    /// Drive the close-notify exchange for the given direction.
    ///
    /// `Receive` is a no-op. `Send` half-closes the writing direction
    /// (moving to [`State::DataR`], or [`State::End`] if reading was already
    /// over); `All` ends the session.
    pub fn bye(&mut self, direction: CloseDirection) -> Result<(), Error> {
        let _enter = self.span.enter();
        self.expect_state(&[State::DataRW, State::DataR, State::DataW])?;

        let how = match direction {
            CloseDirection::Receive => return Ok(()),
            CloseDirection::Send => CloseHow::Write,
            CloseDirection::All => CloseHow::Both,
        };

        match self.session.bye(how) {
            Ok(()) => {
                self.state = match (direction, self.state) {
                    (CloseDirection::Send, State::DataRW) => State::DataR,
                    (CloseDirection::Send, State::DataR) => State::DataR,
                    _ => State::End,
                };
                tracing::debug!(state = ?self.state, "close-notify sent");
                Ok(())
            }
            Err(e) => Err(self.translate(e, false)),
        }
    }

    /// Authenticate the peer according to the configured policy.
    ///
    /// Runs, in order: certificate presence against the policy, the engine's
    /// chain validation, the peer-name match, and the user verification
    /// hook. The first failing step determines the error.
    pub fn verify(&self) -> Result<(), Error> {
        let _enter = self.span.enter();
        self.expect_state(&[State::DataRW, State::DataR, State::DataW, State::DataRS])?;

        let peer_certs = self.session.peer_certs();

        if peer_certs.is_empty() {
            if self.config.peer_auth() == PeerAuth::Required {
                return Err(Error::NoCertificate);
            }
        } else {
            if self.config.peer_auth() != PeerAuth::None {
                let status = self
                    .session
                    .verify_peers()
                    .map_err(|e| self.translate(e, false))?;
                if status != 0 {
                    tracing::debug!(status, "chain validation failed");
                    return Err(Error::CertVerificationFailed);
                }
            }

            if !self.config.peer_name_unchecked() {
                if let Some(name) = &self.peer_name {
                    if !self.session.check_hostname(&peer_certs[0], name) {
                        tracing::debug!(peer_name = %name, "peer name mismatch");
                        return Err(Error::NameVerificationFailed);
                    }
                }
            }
        }

        if let Some(hook) = self.config.verify_hook() {
            if !hook(self) {
                return Err(Error::UserVerificationFailed);
            }
        }

        Ok(())
    }

    /// Request a renegotiation under a new configuration.
    ///
    /// On success the endpoint enters [`State::DataRS`] and keeps reading;
    /// the peer's answer arrives through [`recv`](Endpoint::recv) as
    /// [`Error::SwitchResponse`]. On acceptance, finish with
    /// [`hello`](Endpoint::hello).
    pub fn switch(&mut self, config: Arc<Config>) -> Result<(), Error> {
        let _enter = self.span.clone().entered();
        self.expect_state(&[State::DataRW, State::DataW, State::Switching])?;

        if self.state != State::Switching {
            self.apply_config(&config)?;
            self.config = config;
            self.state = State::Switching;
        }

        match self.session.request_rehandshake() {
            Ok(()) => {
                self.state = State::DataRS;
                tracing::debug!("switch requested");
                Ok(())
            }
            Err(e) => Err(self.translate(e, false)),
        }
    }

    /// Accept the peer's renegotiation request and drive the rehandshake
    /// under a new configuration.
    pub fn accept_switch(&mut self, config: Arc<Config>) -> Result<(), Error> {
        let _enter = self.span.clone().entered();
        self.expect_state(&[State::DataRW, State::DataW, State::Accepting])?;

        if self.state != State::Accepting {
            self.apply_config(&config)?;
            self.config = config;
            self.state = State::Accepting;
        }

        match self.session.handshake() {
            Ok(()) => {
                self.note_handshake_done();
                self.state = State::DataRW;
                tracing::debug!("switch accepted");
                Ok(())
            }
            Err(e) => Err(self.translate(e, true)),
        }
    }

    /// Refuse the peer's renegotiation request with a `no_renegotiation`
    /// warning alert.
    ///
    /// If sending the alert fails fatally the endpoint stays in
    /// [`State::Refusing`].
    pub fn refuse_switch(&mut self) -> Result<(), Error> {
        let _enter = self.span.enter();
        self.expect_state(&[State::DataRW, State::DataW, State::Refusing])?;

        self.state = State::Refusing;

        match self.session.send_warning_alert(Alert::NoRenegotiation) {
            Ok(()) => {
                self.state = State::DataRW;
                tracing::debug!("switch refused");
                Ok(())
            }
            Err(e) => Err(self.translate(e, false)),
        }
    }

    /// Encrypt and send application data, returning the bytes accepted.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, Error> {
        let _enter = self.span.enter();
        self.expect_state(&[State::DataRW, State::DataW])?;

        match self.session.send(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.translate(e, false)),
        }
    }

    /// Receive and decrypt application data.
    ///
    /// `Ok(0)` on a non-empty buffer means the peer closed the session
    /// (close-notify), moving the endpoint to [`State::DataW`] or, if we had
    /// already closed our side, [`State::End`]. A peer switch request
    /// surfaces as [`Error::SwitchRequest`]; while waiting in
    /// [`State::DataRS`], the peer's answer surfaces as
    /// [`Error::SwitchResponse`].
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let _enter = self.span.enter();
        self.expect_state(&[State::DataRW, State::DataR, State::DataRS])?;

        if buf.is_empty() {
            return Ok(0);
        }

        match self.session.recv(buf) {
            Ok(0) => {
                self.state = match self.state {
                    State::DataR => State::End,
                    _ => State::DataW,
                };
                tracing::debug!(state = ?self.state, "peer sent close-notify");
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                let error = self.translate(e, true);
                if self.state == State::DataRS {
                    // The answer to our switch request ends the waiting
                    // state either way.
                    match error {
                        Error::SwitchResponse(true) => self.state = State::Switching,
                        Error::SwitchResponse(false) => self.state = State::DataRW,
                        _ => {}
                    }
                }
                Err(error)
            }
        }
    }

    /// Whether a `recv` call is guaranteed not to touch the transport
    /// because decrypted data is already buffered in the engine.
    pub fn recv_will_not_block(&self) -> bool {
        self.session.pending_bytes() > 0
    }

    /// This endpoint's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The expected peer host name, if one was given.
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// The current state.
    pub fn get_state(&self) -> State {
        self.state
    }

    /// The configuration currently attached to this endpoint.
    pub fn get_config(&self) -> Arc<Config> {
        self.config.clone()
    }

    /// Whether the transport ever reported end-of-file. Latched: once true,
    /// stays true.
    pub fn at_transport_eof(&self) -> bool {
        self.trans_eof.load(Ordering::Relaxed)
    }

    /// The session identifier assigned during the handshake.
    pub fn get_session_id(&self) -> Result<Vec<u8>, Error> {
        self.session.session_id().map_err(|e| self.translate(e, false))
    }

    /// The serialized session, suitable for
    /// [`resume_client`](crate::TlsProvider::resume_client).
    pub fn get_session_data(&self) -> Result<Vec<u8>, Error> {
        self.session.session_data().map_err(|e| self.translate(e, false))
    }

    /// The negotiated cipher suite family.
    pub fn get_cipher_suite_type(&self) -> String {
        self.session.cipher_suite_type()
    }

    /// The negotiated symmetric cipher.
    pub fn get_cipher_algo(&self) -> String {
        self.session.cipher_algo()
    }

    /// The negotiated key exchange algorithm.
    pub fn get_kx_algo(&self) -> String {
        self.session.kx_algo()
    }

    /// The negotiated MAC algorithm.
    pub fn get_mac_algo(&self) -> String {
        self.session.mac_algo()
    }

    /// The negotiated record compression.
    pub fn get_compression_algo(&self) -> String {
        self.session.compression_algo()
    }

    /// The type of the peer certificate.
    pub fn get_cert_type(&self) -> String {
        self.session.cert_type()
    }

    /// The negotiated protocol version.
    pub fn get_protocol(&self) -> String {
        self.session.protocol()
    }

    /// The server names the client addressed through SNI, in order.
    pub fn get_addressed_servers(&self) -> Result<Vec<AddressedServer>, Error> {
        let mut names = Vec::new();

        for index in 0.. {
            match self.session.sni_hostname(index) {
                Ok(name) => names.push(AddressedServer::Domain(name)),
                Err(EngineError::UnavailableData) => break,
                Err(e) => return Err(self.translate(e, false)),
            }
        }

        Ok(names)
    }

    /// The certificate this endpoint presented, or
    /// [`RawCredentials::Anonymous`] if none.
    pub fn get_endpoint_creds(&self) -> RawCredentials {
        let mut cell = lock(&self.our_cert);

        if cell.is_none() {
            if let Some(der) = self.session.our_cert() {
                *cell = Some(RawCredentials::X509(der));
            }
        }

        cell.clone().unwrap_or(RawCredentials::Anonymous)
    }

    /// The peer's leaf certificate, or [`RawCredentials::Anonymous`] if the
    /// peer presented none.
    pub fn get_peer_creds(&self) -> RawCredentials {
        self.session
            .peer_certs()
            .into_iter()
            .next()
            .map(RawCredentials::X509)
            .unwrap_or(RawCredentials::Anonymous)
    }

    /// The peer's full certificate chain, leaf first, or a single
    /// [`RawCredentials::Anonymous`] entry if the peer presented none.
    pub fn get_peer_creds_list(&self) -> Vec<RawCredentials> {
        let certs = self.session.peer_certs();

        if certs.is_empty() {
            vec![RawCredentials::Anonymous]
        } else {
            certs.into_iter().map(RawCredentials::X509).collect()
        }
    }

    /// Install a session cache on this endpoint.
    ///
    /// The engine consults the cache during handshakes. Stored blobs are
    /// opaque envelopes that carry the engine's serialized session together
    /// with the certificate this side presented, so that an endpoint resumed
    /// from the cache can answer [`get_endpoint_creds`](Self::get_endpoint_creds)
    /// even though the engine does not re-emit the certificate on a resumed
    /// handshake. `remove` is forwarded verbatim.
    pub fn set_session_cache(
        &mut self,
        mut store: CacheStore,
        remove: CacheRemove,
        mut retrieve: CacheRetrieve,
    ) {
        let cell = self.our_cert.clone();
        let engine_store: CacheStoreFn = Box::new(move |key: &[u8], data: &[u8], local_cert: Option<&[u8]>| {
            let mut cell = lock(&cell);

            if cell.is_none() {
                *cell = Some(match local_cert {
                    Some(der) => RawCredentials::X509(der.to_vec()),
                    None => RawCredentials::Anonymous,
                });
            }

            let envelope = cache::seal(data, cell.as_ref())?;
            store(key, &envelope)
        });

        let cell = self.our_cert.clone();
        let engine_retrieve: CacheRetrieveFn = Box::new(move |key: &[u8]| {
            let bytes = retrieve(key)?;
            let (session, our_cert) = cache::open(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            *lock(&cell) = Some(our_cert);
            Ok(session)
        });

        self.session.set_cache_callbacks(engine_store, remove, engine_retrieve);
    }

    /// Detach this endpoint from its transport.
    ///
    /// The transport callbacks are replaced with end-of-file/no-op stubs and
    /// the session, configuration, and observable endpoint attributes are
    /// captured in the returned token. [`Endpoint::restore`] rebuilds an
    /// equivalent endpoint on a fresh transport.
    pub fn stash(mut self) -> StashedEndpoint {
        let pull: PullFn = Box::new(|_buf: &mut [u8]| Ok(0));
        let push: PushFn = Box::new(|buf: &[u8]| Ok(buf.len()));
        self.session.set_transport(pull, push);

        tracing::debug!(state = ?self.state, "endpoint stashed");

        StashedEndpoint {
            role: self.role,
            config: self.config,
            session: self.session,
            peer_name: self.peer_name,
            our_cert: self.our_cert,
            trans_eof: self.trans_eof,
            state: self.state,
        }
    }

    /// Reattach a stashed endpoint to a new transport, restoring every
    /// captured attribute including the state it was stashed in.
    pub fn restore(stashed: StashedEndpoint, recv: RecvFn, send: SendFn) -> Self {
        let StashedEndpoint {
            role,
            config,
            mut session,
            peer_name,
            our_cert,
            trans_eof,
            state,
        } = stashed;

        attach_transport(&mut *session, recv, send, trans_eof.clone());

        Self {
            role,
            config,
            session,
            peer_name,
            our_cert,
            trans_eof,
            state,
            span: tracing::debug_span!("endpoint", role = ?role),
        }
    }

    /// Check that the current state permits the operation, without mutating
    /// anything if it does not.
    fn expect_state(&self, allowed: &[State]) -> Result<(), Error> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            tracing::debug!(state = ?self.state, "operation not allowed in this state");
            Err(Error::UnexpectedState)
        }
    }

    /// Exchange the configuration on the running session. Only reached from
    /// states in which a config exchange is legal.
    ///
    /// The engine applies the whole configuration in one all-or-nothing
    /// step, so on failure the previous configuration is still fully in
    /// force and `self.config` keeps describing what the session runs.
    fn apply_config(&mut self, config: &Config) -> Result<(), Error> {
        self.session
            .configure(config.priority(), config.credentials().engine(), config.dh())?;
        Ok(())
    }

    /// Record which certificate we presented after a completed handshake.
    ///
    /// A resumed handshake does not re-emit the certificate; in that case an
    /// existing value (placed there by the cache adapter) is preserved.
    fn note_handshake_done(&mut self) {
        let mut cell = lock(&self.our_cert);

        match self.session.our_cert() {
            Some(der) => *cell = Some(RawCredentials::X509(der)),
            None => {
                if cell.is_none() {
                    *cell = Some(RawCredentials::Anonymous);
                }
            }
        }
    }

    /// The single point where engine outcomes become surfaced signals.
    ///
    /// The blocked direction must be read here, at the moment `Again`
    /// arrives; any later engine call would overwrite it. `warnings` is set
    /// by operations that can meaningfully continue past a non-fatal
    /// condition; elsewhere non-fatal codes still end the operation.
    fn translate(&self, error: EngineError, warnings: bool) -> Error {
        match error {
            EngineError::Again => match self.session.io_direction() {
                IoDirection::Read => Error::AgainRead,
                IoDirection::Write => Error::AgainWrite,
            },
            EngineError::Interrupted => Error::Interrupted,
            EngineError::Rehandshake => {
                if matches!(self.state, State::Switching | State::DataRS) {
                    Error::SwitchResponse(true)
                } else {
                    Error::SwitchRequest
                }
            }
            EngineError::WarningAlert(code) => {
                if self.session.last_alert() == Some(Alert::NoRenegotiation) {
                    Error::SwitchResponse(false)
                } else if warnings {
                    Error::Warning(code)
                } else {
                    Error::Tls(code)
                }
            }
            EngineError::UnavailableData => Error::Tls(error.code()),
            EngineError::Code { .. } => {
                let code = error.code();
                if warnings && !error.is_fatal() {
                    Error::Warning(code)
                } else {
                    Error::Tls(code)
                }
            }
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("peer_name", &self.peer_name)
            .field("trans_eof", &self.at_transport_eof())
            .finish_non_exhaustive()
    }
}

/// A detached endpoint: everything needed to continue the session on a new
/// transport. Produced by [`Endpoint::stash`].
pub struct StashedEndpoint {
    role: Role,
    config: Arc<Config>,
    session: Box<dyn EngineSession>,
    peer_name: Option<String>,
    our_cert: SharedCert,
    trans_eof: Arc<AtomicBool>,
    state: State,
}

impl fmt::Debug for StashedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StashedEndpoint")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("peer_name", &self.peer_name)
            .finish_non_exhaustive()
    }
}

/// Hand the caller's transport callbacks to the session, interposing the
/// end-of-file latch on the read side.
fn attach_transport(
    session: &mut dyn EngineSession,
    mut recv: RecvFn,
    send: SendFn,
    trans_eof: Arc<AtomicBool>,
) {
    let pull: PullFn = Box::new(move |buf: &mut [u8]| {
        let n = recv(buf)?;
        if n == 0 && !buf.is_empty() {
            trans_eof.store(true, Ordering::Relaxed);
        }
        Ok(n)
    });

    session.set_transport(pull, send);
}

/// Lock a shared cell, tolerating a poisoned mutex: the cell holds plain
/// data whose invariants cannot be broken mid-update.
fn lock(cell: &SharedCert) -> std::sync::MutexGuard<'_, Option<RawCredentials>> {
    cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
