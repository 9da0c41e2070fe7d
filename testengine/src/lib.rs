//! Scripted TLS engine for testing.
//!
//! [`FakeEngine`] implements the `nettls` engine traits deterministically:
//! every session is created from a [`SessionScript`] that fixes the outcome
//! of each engine call in advance, and every session and credential set
//! leaves behind a handle the test can inspect afterwards.

use nettls::{
    endpoint::Role,
    engine::{
        Alert, CacheRemoveFn, CacheRetrieveFn, CacheStoreFn, CertRequest, CloseHow, Engine,
        EngineCredentials, EngineDhParams, EngineError, EngineSession, IoDirection, KeyImport,
        PullFn, PushFn,
    },
    error::ErrorCode,
};
use std::{
    collections::VecDeque,
    fmt, io,
    sync::{Arc, Mutex, MutexGuard},
};

/// One scripted outcome for an engine call.
#[derive(Clone, Debug)]
pub enum Step {
    /// The call succeeds.
    Ok,
    /// The call would block on the given transport direction.
    Again(IoDirection),
    /// The call was interrupted by a signal.
    Interrupted,
    /// The peer requested or acknowledged a rehandshake.
    Rehandshake,
    /// A warning alert arrived.
    WarningAlert {
        /// Engine code for the condition.
        code: &'static str,
        /// The alert that arrived.
        alert: Alert,
    },
    /// A non-fatal engine condition.
    NonFatal(&'static str),
    /// A fatal engine condition.
    Fatal(&'static str),
}

/// One scripted outcome for a `recv` call.
#[derive(Clone, Debug)]
pub enum RecvStep {
    /// Decrypted bytes arrive.
    Data(Vec<u8>),
    /// The peer sent close-notify.
    Eof,
    /// Relay whatever the attached transport produces.
    FromTransport,
    /// An error outcome.
    Err(Step),
}

/// One scripted outcome for a `send` call.
#[derive(Clone, Debug)]
pub enum SendStep {
    /// The engine accepts this many bytes.
    Accept(usize),
    /// An error outcome.
    Err(Step),
}

/// Everything a scripted session knows in advance.
#[derive(Debug)]
pub struct SessionScript {
    configures: VecDeque<Step>,
    handshake: VecDeque<Step>,
    rehandshake: VecDeque<Step>,
    alerts: VecDeque<Step>,
    byes: VecDeque<Step>,
    recvs: VecDeque<RecvStep>,
    sends: VecDeque<SendStep>,
    our_cert: Option<Vec<u8>>,
    peer_certs: Vec<Vec<u8>>,
    verify_status: u32,
    hostname_matches: bool,
    sni_names: Vec<String>,
    session_id: Vec<u8>,
    session_data: Vec<u8>,
    pending_bytes: usize,
    protocol: String,
}

impl SessionScript {
    /// A session that succeeds at everything and negotiates nothing unusual.
    pub fn new() -> Self {
        Self {
            configures: VecDeque::new(),
            handshake: VecDeque::new(),
            rehandshake: VecDeque::new(),
            alerts: VecDeque::new(),
            byes: VecDeque::new(),
            recvs: VecDeque::new(),
            sends: VecDeque::new(),
            our_cert: None,
            peer_certs: Vec::new(),
            verify_status: 0,
            hostname_matches: true,
            sni_names: Vec::new(),
            session_id: b"session-id".to_vec(),
            session_data: b"session-data".to_vec(),
            pending_bytes: 0,
            protocol: "TLS1.3".to_owned(),
        }
    }

    /// Script the outcomes of successive `configure` calls. An unscripted
    /// call succeeds; remember that creating an endpoint configures once.
    pub fn configures(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.configures.extend(steps);
        self
    }

    /// Script the outcomes of successive `handshake` calls.
    pub fn handshake(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.handshake.extend(steps);
        self
    }

    /// Script the outcomes of successive `request_rehandshake` calls.
    pub fn rehandshake(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.rehandshake.extend(steps);
        self
    }

    /// Script the outcomes of successive `send_warning_alert` calls.
    pub fn alerts(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.alerts.extend(steps);
        self
    }

    /// Script the outcomes of successive `bye` calls.
    pub fn byes(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.byes.extend(steps);
        self
    }

    /// Script the outcomes of successive `recv` calls.
    pub fn recvs(mut self, steps: impl IntoIterator<Item = RecvStep>) -> Self {
        self.recvs.extend(steps);
        self
    }

    /// Script the outcomes of successive `send` calls.
    pub fn sends(mut self, steps: impl IntoIterator<Item = SendStep>) -> Self {
        self.sends.extend(steps);
        self
    }

    /// The DER certificate this side presents.
    pub fn our_cert(mut self, der: &[u8]) -> Self {
        self.our_cert = Some(der.to_vec());
        self
    }

    /// The DER chain the peer presents, leaf first.
    pub fn peer_certs(mut self, certs: Vec<Vec<u8>>) -> Self {
        self.peer_certs = certs;
        self
    }

    /// The bitmask `verify_peers` reports.
    pub fn verify_status(mut self, status: u32) -> Self {
        self.verify_status = status;
        self
    }

    /// Whether `check_hostname` matches.
    pub fn hostname_matches(mut self, matches: bool) -> Self {
        self.hostname_matches = matches;
        self
    }

    /// The SNI names the client supplied.
    pub fn sni(mut self, names: &[&str]) -> Self {
        self.sni_names = names.iter().map(|n| (*n).to_owned()).collect();
        self
    }

    /// The serialized session the engine reports.
    pub fn session_data(mut self, data: &[u8]) -> Self {
        self.session_data = data.to_vec();
        self
    }

    /// How many decrypted bytes are buffered in the engine.
    pub fn pending_bytes(mut self, bytes: usize) -> Self {
        self.pending_bytes = bytes;
        self
    }
}

impl Default for SessionScript {
    fn default() -> Self {
        Self::new()
    }
}

struct CacheCallbacks {
    store: CacheStoreFn,
    remove: CacheRemoveFn,
    retrieve: CacheRetrieveFn,
}

struct SessionState {
    script: SessionScript,
    role: Option<Role>,
    direction: IoDirection,
    last_alert: Option<Alert>,
    transport: Option<(PullFn, PushFn)>,
    cache: Option<CacheCallbacks>,
    priorities: Vec<String>,
    credentials_sets: usize,
    dh_sets: usize,
    cert_request: Option<CertRequest>,
    resumed_with: Option<Vec<u8>>,
    alerts_sent: Vec<Alert>,
}

impl SessionState {
    fn new(script: SessionScript) -> Self {
        Self {
            script,
            role: None,
            direction: IoDirection::Read,
            last_alert: None,
            transport: None,
            cache: None,
            priorities: Vec::new(),
            credentials_sets: 0,
            dh_sets: 0,
            cert_request: None,
            resumed_with: None,
            alerts_sent: Vec::new(),
        }
    }

    fn apply(&mut self, step: Step) -> Result<(), EngineError> {
        match step {
            Step::Ok => Ok(()),
            Step::Again(direction) => {
                self.direction = direction;
                Err(EngineError::Again)
            }
            Step::Interrupted => Err(EngineError::Interrupted),
            Step::Rehandshake => Err(EngineError::Rehandshake),
            Step::WarningAlert { code, alert } => {
                self.last_alert = Some(alert);
                Err(EngineError::WarningAlert(ErrorCode::from_static(code)))
            }
            Step::NonFatal(code) => Err(EngineError::Code {
                code: ErrorCode::from_static(code),
                fatal: false,
            }),
            Step::Fatal(code) => Err(EngineError::Code {
                code: ErrorCode::from_static(code),
                fatal: true,
            }),
        }
    }
}

fn exhausted() -> EngineError {
    EngineError::Code {
        code: ErrorCode::from_static("TESTENGINE_E_SCRIPT_EXHAUSTED"),
        fatal: true,
    }
}

/// A handle onto a scripted session, for inspection and late script edits.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap()
    }

    /// The role the session was created for.
    pub fn role(&self) -> Option<Role> {
        self.lock().role
    }

    /// The most recently applied priority string.
    pub fn priority(&self) -> Option<String> {
        self.lock().priorities.last().cloned()
    }

    /// How many times a credential set was attached.
    pub fn credentials_sets(&self) -> usize {
        self.lock().credentials_sets
    }

    /// How many times DH parameters were attached.
    pub fn dh_sets(&self) -> usize {
        self.lock().dh_sets
    }

    /// The client-certificate solicitation applied to a server session.
    pub fn cert_request(&self) -> Option<CertRequest> {
        self.lock().cert_request
    }

    /// The blob passed to `set_session_data`, if any.
    pub fn resumed_with(&self) -> Option<Vec<u8>> {
        self.lock().resumed_with.clone()
    }

    /// The warning alerts the session sent.
    pub fn alerts_sent(&self) -> Vec<Alert> {
        self.lock().alerts_sent.clone()
    }

    /// Whether cache callbacks are installed.
    pub fn has_cache(&self) -> bool {
        self.lock().cache.is_some()
    }

    /// Replace the certificate this side presents, as a renegotiation under
    /// different credentials would.
    pub fn set_our_cert(&self, der: &[u8]) {
        self.lock().script.our_cert = Some(der.to_vec());
    }

    /// Append further `recv` outcomes to the script.
    pub fn push_recvs(&self, steps: impl IntoIterator<Item = RecvStep>) {
        self.lock().script.recvs.extend(steps);
    }

    /// Append further `handshake` outcomes to the script.
    pub fn push_handshake(&self, steps: impl IntoIterator<Item = Step>) {
        self.lock().script.handshake.extend(steps);
    }

    /// Drive the installed store callback the way the engine would during a
    /// handshake: with the session's serialized form and the certificate
    /// this side presented.
    pub fn store_session(&self, key: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        let data = state.script.session_data.clone();
        let cert = state.script.our_cert.clone();
        let cache = state.cache.as_mut().expect("no cache callbacks installed");
        (cache.store)(key, &data, cert.as_deref())
    }

    /// Drive the installed remove callback.
    pub fn remove_session(&self, key: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        let cache = state.cache.as_mut().expect("no cache callbacks installed");
        (cache.remove)(key)
    }

    /// Drive the installed retrieve callback, returning what the engine
    /// would see: the native session blob.
    pub fn retrieve_session(&self, key: &[u8]) -> io::Result<Vec<u8>> {
        let mut state = self.lock();
        let cache = state.cache.as_mut().expect("no cache callbacks installed");
        (cache.retrieve)(key)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

struct FakeSession {
    state: Arc<Mutex<SessionState>>,
}

impl FakeSession {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap()
    }
}

impl EngineSession for FakeSession {
    fn set_transport(&mut self, pull: PullFn, push: PushFn) {
        self.lock().transport = Some((pull, push));
    }

    fn configure(
        &mut self,
        priority: &str,
        _credentials: &Arc<dyn EngineCredentials>,
        dh: Option<&Arc<dyn EngineDhParams>>,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();

        // All-or-nothing, as the trait demands: a scripted failure must not
        // leave any trace of the attempted configuration behind.
        if let Some(step) = state.script.configures.pop_front() {
            state.apply(step)?;
        }

        state.priorities.push(priority.to_owned());
        state.credentials_sets += 1;
        if dh.is_some() {
            state.dh_sets += 1;
        }
        Ok(())
    }

    fn request_client_certificate(&mut self, request: CertRequest) -> Result<(), EngineError> {
        self.lock().cert_request = Some(request);
        Ok(())
    }

    fn handshake(&mut self) -> Result<(), EngineError> {
        let mut state = self.lock();
        let step = state.script.handshake.pop_front().ok_or_else(exhausted)?;
        state.apply(step)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, EngineError> {
        let mut state = self.lock();
        match state.script.sends.pop_front().ok_or_else(exhausted)? {
            SendStep::Accept(n) => Ok(n.min(buf.len())),
            SendStep::Err(step) => state.apply(step).map(|()| 0),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let mut state = self.lock();
        match state.script.recvs.pop_front().ok_or_else(exhausted)? {
            RecvStep::Data(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            RecvStep::Eof => Ok(0),
            RecvStep::FromTransport => {
                let (pull, _) = state.transport.as_mut().expect("no transport attached");
                match pull(buf) {
                    Ok(n) => Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        state.direction = IoDirection::Read;
                        Err(EngineError::Again)
                    }
                    Err(_) => Err(EngineError::Code {
                        code: ErrorCode::from_static("TESTENGINE_E_PULL"),
                        fatal: true,
                    }),
                }
            }
            RecvStep::Err(step) => state.apply(step).map(|()| 0),
        }
    }

    fn bye(&mut self, _how: CloseHow) -> Result<(), EngineError> {
        let mut state = self.lock();
        let step = state.script.byes.pop_front().ok_or_else(exhausted)?;
        state.apply(step)
    }

    fn request_rehandshake(&mut self) -> Result<(), EngineError> {
        let mut state = self.lock();
        let step = state.script.rehandshake.pop_front().ok_or_else(exhausted)?;
        state.apply(step)
    }

    fn send_warning_alert(&mut self, alert: Alert) -> Result<(), EngineError> {
        let mut state = self.lock();
        let step = state.script.alerts.pop_front().ok_or_else(exhausted)?;
        let result = state.apply(step);
        if result.is_ok() {
            state.alerts_sent.push(alert);
        }
        result
    }

    fn io_direction(&self) -> IoDirection {
        self.lock().direction
    }

    fn last_alert(&self) -> Option<Alert> {
        self.lock().last_alert
    }

    fn pending_bytes(&self) -> usize {
        self.lock().script.pending_bytes
    }

    fn session_id(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.lock().script.session_id.clone())
    }

    fn session_data(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.lock().script.session_data.clone())
    }

    fn set_session_data(&mut self, data: &[u8]) -> Result<(), EngineError> {
        self.lock().resumed_with = Some(data.to_vec());
        Ok(())
    }

    fn set_cache_callbacks(
        &mut self,
        store: CacheStoreFn,
        remove: CacheRemoveFn,
        retrieve: CacheRetrieveFn,
    ) {
        self.lock().cache = Some(CacheCallbacks {
            store,
            remove,
            retrieve,
        });
    }

    fn our_cert(&self) -> Option<Vec<u8>> {
        self.lock().script.our_cert.clone()
    }

    fn peer_certs(&self) -> Vec<Vec<u8>> {
        self.lock().script.peer_certs.clone()
    }

    fn verify_peers(&self) -> Result<u32, EngineError> {
        Ok(self.lock().script.verify_status)
    }

    fn check_hostname(&self, _cert: &[u8], _name: &str) -> bool {
        self.lock().script.hostname_matches
    }

    fn sni_hostname(&self, index: usize) -> Result<String, EngineError> {
        self.lock()
            .script
            .sni_names
            .get(index)
            .cloned()
            .ok_or(EngineError::UnavailableData)
    }

    fn cipher_suite_type(&self) -> String {
        "X509".to_owned()
    }

    fn cipher_algo(&self) -> String {
        "AES-256-GCM".to_owned()
    }

    fn kx_algo(&self) -> String {
        "ECDHE-RSA".to_owned()
    }

    fn mac_algo(&self) -> String {
        "AEAD".to_owned()
    }

    fn compression_algo(&self) -> String {
        "NULL".to_owned()
    }

    fn cert_type(&self) -> String {
        "X509".to_owned()
    }

    fn protocol(&self) -> String {
        self.lock().script.protocol.clone()
    }
}

/// What one credential set was built out of, as the engine saw it.
#[derive(Clone, Debug, Default)]
pub struct CredentialsLog {
    /// DER trust anchors, in installation order.
    pub trust_anchors: Vec<Vec<u8>>,
    /// How many times the platform store was loaded.
    pub system_trust_loads: usize,
    /// DER revocation lists, in installation order.
    pub crls: Vec<Vec<u8>>,
    /// Installed (chain, key) identities.
    pub key_pairs: Vec<(Vec<Vec<u8>>, KeyRecord)>,
    /// Whether default verify flags were applied.
    pub default_verify_flags: bool,
}

/// How a private key reached the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyRecord {
    /// Through the PEM importer.
    Pem(Vec<u8>),
    /// Through the PKCS#8 importer.
    Pkcs8 {
        /// The DER key data.
        der: Vec<u8>,
        /// The decryption password, if the key was encrypted.
        password: Option<String>,
    },
}

struct FakeCredentials {
    log: Arc<Mutex<CredentialsLog>>,
}

impl EngineCredentials for FakeCredentials {
    fn add_trust_anchor(&mut self, der: &[u8]) -> Result<(), EngineError> {
        self.log.lock().unwrap().trust_anchors.push(der.to_vec());
        Ok(())
    }

    fn add_system_trust(&mut self) -> Result<usize, EngineError> {
        self.log.lock().unwrap().system_trust_loads += 1;
        Ok(7)
    }

    fn add_crl(&mut self, der: &[u8]) -> Result<(), EngineError> {
        self.log.lock().unwrap().crls.push(der.to_vec());
        Ok(())
    }

    fn add_key_pair(&mut self, chain: &[Vec<u8>], key: KeyImport<'_>) -> Result<(), EngineError> {
        let record = match key {
            KeyImport::Pem(pem) => KeyRecord::Pem(pem.to_vec()),
            KeyImport::Pkcs8 { der, password } => KeyRecord::Pkcs8 {
                der: der.to_vec(),
                password: password.map(str::to_owned),
            },
        };
        self.log
            .lock()
            .unwrap()
            .key_pairs
            .push((chain.to_vec(), record));
        Ok(())
    }

    fn set_default_verify_flags(&mut self) {
        self.log.lock().unwrap().default_verify_flags = true;
    }
}

#[derive(Debug)]
struct FakeDhParams {
    #[allow(dead_code)]
    der: Option<Vec<u8>>,
    #[allow(dead_code)]
    bits: Option<u32>,
}

impl EngineDhParams for FakeDhParams {}

struct EngineInner {
    sessions: VecDeque<Arc<Mutex<SessionState>>>,
    credentials: Vec<Arc<Mutex<CredentialsLog>>>,
    reject_priority: Option<String>,
    dh_imports: Vec<Vec<u8>>,
    dh_generated: Vec<u32>,
}

/// A deterministic engine built from session scripts.
pub struct FakeEngine {
    inner: Mutex<EngineInner>,
}

impl FakeEngine {
    /// Create an engine with no sessions scripted yet.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(EngineInner {
                sessions: VecDeque::new(),
                credentials: Vec::new(),
                reject_priority: None,
                dh_imports: Vec::new(),
                dh_generated: Vec::new(),
            }),
        })
    }

    /// Queue the script for the next session this engine creates, returning
    /// the handle to inspect it with.
    pub fn add_session(&self, script: SessionScript) -> SessionHandle {
        let state = Arc::new(Mutex::new(SessionState::new(script)));
        self.inner.lock().unwrap().sessions.push_back(state.clone());
        SessionHandle { state }
    }

    /// Make `check_priority` reject this exact priority string.
    pub fn reject_priority(&self, priority: &str) {
        self.inner.lock().unwrap().reject_priority = Some(priority.to_owned());
    }

    /// The build log of the `index`-th credential set created.
    pub fn credentials_log(&self, index: usize) -> CredentialsLog {
        self.inner.lock().unwrap().credentials[index]
            .lock()
            .unwrap()
            .clone()
    }

    /// The DER blobs imported as DH parameters, in order.
    pub fn dh_imports(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().dh_imports.clone()
    }

    /// The bit lengths of generated DH parameters, in order.
    pub fn dh_generated(&self) -> Vec<u32> {
        self.inner.lock().unwrap().dh_generated.clone()
    }
}

impl Engine for FakeEngine {
    fn name(&self) -> &str {
        "testengine"
    }

    fn check_priority(&self, priority: &str) -> Result<(), EngineError> {
        if self.inner.lock().unwrap().reject_priority.as_deref() == Some(priority) {
            Err(EngineError::Code {
                code: ErrorCode::from_static("TESTENGINE_E_INVALID_PRIORITY"),
                fatal: true,
            })
        } else {
            Ok(())
        }
    }

    fn new_credentials(&self) -> Result<Box<dyn EngineCredentials>, EngineError> {
        let log = Arc::new(Mutex::new(CredentialsLog::default()));
        self.inner.lock().unwrap().credentials.push(log.clone());
        Ok(Box::new(FakeCredentials { log }))
    }

    fn import_dh_params(&self, der: &[u8]) -> Result<Arc<dyn EngineDhParams>, EngineError> {
        self.inner.lock().unwrap().dh_imports.push(der.to_vec());
        Ok(Arc::new(FakeDhParams {
            der: Some(der.to_vec()),
            bits: None,
        }))
    }

    fn generate_dh_params(&self, bits: u32) -> Result<Arc<dyn EngineDhParams>, EngineError> {
        self.inner.lock().unwrap().dh_generated.push(bits);
        Ok(Arc::new(FakeDhParams {
            der: None,
            bits: Some(bits),
        }))
    }

    fn new_session(&self, role: Role) -> Result<Box<dyn EngineSession>, EngineError> {
        let state = self
            .inner
            .lock()
            .unwrap()
            .sessions
            .pop_front()
            .ok_or_else(|| EngineError::Code {
                code: ErrorCode::from_static("TESTENGINE_E_NO_SESSION"),
                fatal: true,
            })?;
        state.lock().unwrap().role = Some(role);
        Ok(Box::new(FakeSession { state }))
    }

    fn error_message(&self, code: &ErrorCode) -> Option<String> {
        code.as_str()
            .starts_with("TESTENGINE_")
            .then(|| format!("test engine condition {}", code))
    }
}

impl fmt::Debug for FakeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeEngine").finish_non_exhaustive()
    }
}
