//! Helpers shared by the integration tests.

#![allow(dead_code)]

use nettls::{
    CertSource, CloseDirection, Config, Credentials, Endpoint, NativeProvider, PeerAuth, RecvFn,
    Role, SendFn, State, TlsProvider,
};
use nettls::engine::IoDirection;
use std::{io, sync::Arc};
use testengine::{FakeEngine, RecvStep, SessionScript, Step};

/// A provider over the given fake engine.
pub fn provider(engine: &Arc<FakeEngine>) -> NativeProvider {
    NativeProvider::new(engine.clone())
}

/// A transport whose reads would block forever and whose writes accept
/// everything. Endpoints under scripted sessions rarely touch it.
pub fn idle_transport() -> (RecvFn, SendFn) {
    (
        Box::new(|_buf: &mut [u8]| Err(io::ErrorKind::WouldBlock.into())),
        Box::new(|buf: &[u8]| Ok(buf.len())),
    )
}

/// A transport that reports end-of-file on every read.
pub fn eof_transport() -> (RecvFn, SendFn) {
    (
        Box::new(|_buf: &mut [u8]| Ok(0)),
        Box::new(|buf: &[u8]| Ok(buf.len())),
    )
}

/// A minimal config with one in-memory trust anchor.
pub fn config(provider: &NativeProvider, peer_auth: PeerAuth) -> Arc<Config> {
    let credentials = provider
        .create_x509_credentials(
            Credentials::builder().trust(CertSource::Der(vec![b"test ca".to_vec()])),
        )
        .unwrap();

    provider
        .create_config(Config::builder(credentials).peer_auth(peer_auth))
        .unwrap()
}

/// Build an endpoint and drive it into the given state.
///
/// The endpoint's session script has exactly the steps needed to get there,
/// so any further engine call fails the test loudly.
pub fn endpoint_in_state(state: State) -> Endpoint {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let script = match state {
        State::Start => SessionScript::new(),
        State::Handshake => SessionScript::new().handshake([Step::Again(IoDirection::Read)]),
        State::DataRW => SessionScript::new().handshake([Step::Ok]),
        State::DataR => SessionScript::new().handshake([Step::Ok]).byes([Step::Ok]),
        State::DataW => SessionScript::new()
            .handshake([Step::Ok])
            .recvs([RecvStep::Eof]),
        State::DataRS => SessionScript::new()
            .handshake([Step::Ok])
            .rehandshake([Step::Ok]),
        State::Switching => SessionScript::new()
            .handshake([Step::Ok])
            .rehandshake([Step::Again(IoDirection::Write)]),
        State::Accepting => SessionScript::new()
            .handshake([Step::Ok, Step::Again(IoDirection::Read)]),
        State::Refusing => SessionScript::new()
            .handshake([Step::Ok])
            .alerts([Step::Again(IoDirection::Write)]),
        State::End => SessionScript::new().handshake([Step::Ok]).byes([Step::Ok]),
    };

    engine.add_session(script);

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();

    match state {
        State::Start => {}
        State::Handshake => {
            endpoint.hello().unwrap_err();
        }
        State::DataRW => {
            endpoint.hello().unwrap();
        }
        State::DataR => {
            endpoint.hello().unwrap();
            endpoint.bye(CloseDirection::Send).unwrap();
        }
        State::DataW => {
            endpoint.hello().unwrap();
            assert_eq!(endpoint.recv(&mut [0u8; 16]).unwrap(), 0);
        }
        State::DataRS => {
            endpoint.hello().unwrap();
            let cfg = endpoint.get_config();
            endpoint.switch(cfg).unwrap();
        }
        State::Switching => {
            endpoint.hello().unwrap();
            let cfg = endpoint.get_config();
            endpoint.switch(cfg).unwrap_err();
        }
        State::Accepting => {
            endpoint.hello().unwrap();
            let cfg = endpoint.get_config();
            endpoint.accept_switch(cfg).unwrap_err();
        }
        State::Refusing => {
            endpoint.hello().unwrap();
            endpoint.refuse_switch().unwrap_err();
        }
        State::End => {
            endpoint.hello().unwrap();
            endpoint.bye(CloseDirection::All).unwrap();
        }
    }

    assert_eq!(endpoint.get_state(), state, "setup failed to reach state");
    endpoint
}
