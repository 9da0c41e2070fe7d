//! Renegotiation ("switching") from both sides.

mod common;

use common::{config, idle_transport, provider};
use nettls::{
    engine::{Alert, IoDirection},
    Error, ErrorCode, PeerAuth, RawCredentials, Role, State, TlsProvider,
};
use testengine::{FakeEngine, RecvStep, SessionScript, Step};

/// Initiator side of a refused switch: request goes out, the peer answers
/// with `no_renegotiation`, and the endpoint falls back to normal data flow.
#[test]
fn refused_switch_round_trip() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let handle = engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok])
            .rehandshake([Step::Ok])
            .recvs([RecvStep::Err(Step::WarningAlert {
                code: "TESTENGINE_E_WARNING_ALERT_RECEIVED",
                alert: Alert::NoRenegotiation,
            })]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();

    let new_cfg = config(&provider, PeerAuth::None);
    endpoint.switch(new_cfg).unwrap();
    assert_eq!(endpoint.get_state(), State::DataRS);

    assert_eq!(
        endpoint.recv(&mut [0u8; 16]),
        Err(Error::SwitchResponse(false))
    );
    assert_eq!(endpoint.get_state(), State::DataRW);
    assert_eq!(handle.priority(), Some("NORMAL".to_owned()));
}

/// Initiator side of an accepted switch: the peer acknowledges, and the
/// rehandshake is finished with `hello`.
#[test]
fn accepted_switch_finishes_with_hello() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let handle = engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok])
            .rehandshake([Step::Ok])
            .recvs([RecvStep::Err(Step::Rehandshake)]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();

    let new_cfg = config(&provider, PeerAuth::None);
    endpoint.switch(new_cfg.clone()).unwrap();
    assert_eq!(endpoint.get_state(), State::DataRS);

    assert_eq!(
        endpoint.recv(&mut [0u8; 16]),
        Err(Error::SwitchResponse(true))
    );
    assert_eq!(endpoint.get_state(), State::Switching);

    handle.push_handshake([Step::Ok]);
    endpoint.hello().unwrap();
    assert_eq!(endpoint.get_state(), State::DataRW);

    // The switch installed the new configuration.
    assert!(std::sync::Arc::ptr_eq(&endpoint.get_config(), &new_cfg));
}

/// Responder side: the request arrives through `recv`, and refusing it sends
/// the `no_renegotiation` alert and stays in data mode.
#[test]
fn responder_can_refuse_a_switch_request() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let handle = engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok])
            .recvs([RecvStep::Err(Step::Rehandshake)])
            .alerts([Step::Ok]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Server, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();

    assert_eq!(endpoint.recv(&mut [0u8; 16]), Err(Error::SwitchRequest));
    assert_eq!(endpoint.get_state(), State::DataRW);

    endpoint.refuse_switch().unwrap();
    assert_eq!(endpoint.get_state(), State::DataRW);
    assert_eq!(handle.alerts_sent(), vec![Alert::NoRenegotiation]);
}

/// Responder side: accepting drives the rehandshake under the new
/// configuration and refreshes the presented certificate.
#[test]
fn responder_can_accept_a_switch_request() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let handle = engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok, Step::Ok])
            .our_cert(b"old leaf")
            .recvs([RecvStep::Err(Step::Rehandshake)]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Server, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();
    assert_eq!(
        endpoint.get_endpoint_creds(),
        RawCredentials::X509(b"old leaf".to_vec())
    );

    assert_eq!(endpoint.recv(&mut [0u8; 16]), Err(Error::SwitchRequest));

    // The rehandshake negotiates a different identity.
    handle.set_our_cert(b"new leaf");

    let new_cfg = config(&provider, PeerAuth::None);
    endpoint.accept_switch(new_cfg).unwrap();
    assert_eq!(endpoint.get_state(), State::DataRW);
    assert_eq!(
        endpoint.get_endpoint_creds(),
        RawCredentials::X509(b"new leaf".to_vec())
    );
    assert_eq!(handle.credentials_sets(), 2);
}

/// A suspended switch request is retried from `Switching` and applies the
/// new configuration only once.
#[test]
fn switch_retries_after_would_block() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let handle = engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok])
            .rehandshake([Step::Again(IoDirection::Write), Step::Ok]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();

    let new_cfg = config(&provider, PeerAuth::None);
    assert_eq!(endpoint.switch(new_cfg.clone()), Err(Error::AgainWrite));
    assert_eq!(endpoint.get_state(), State::Switching);

    endpoint.switch(new_cfg).unwrap();
    assert_eq!(endpoint.get_state(), State::DataRS);

    // One credential attachment at creation, one at the switch; the retry
    // must not re-apply the configuration.
    assert_eq!(handle.credentials_sets(), 2);
}

#[test]
fn accept_switch_retries_after_would_block() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok, Step::Again(IoDirection::Read), Step::Ok])
            .recvs([RecvStep::Err(Step::Rehandshake)]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Server, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();
    assert_eq!(endpoint.recv(&mut [0u8; 16]), Err(Error::SwitchRequest));

    let new_cfg = config(&provider, PeerAuth::None);
    assert_eq!(
        endpoint.accept_switch(new_cfg.clone()),
        Err(Error::AgainRead)
    );
    assert_eq!(endpoint.get_state(), State::Accepting);

    endpoint.accept_switch(new_cfg).unwrap();
    assert_eq!(endpoint.get_state(), State::DataRW);
}

/// A rejected configuration exchange is atomic: the engine refuses it as a
/// unit, so the endpoint keeps both its state and the configuration that is
/// actually live on the session.
#[test]
fn failed_switch_config_exchange_leaves_the_old_config_in_force() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let handle = engine.add_session(
        SessionScript::new()
            .configures([Step::Ok, Step::Fatal("TESTENGINE_E_CONFIG")])
            .handshake([Step::Ok]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Client, recv, send, None, cfg.clone())
        .unwrap();
    endpoint.hello().unwrap();

    let new_cfg = config(&provider, PeerAuth::None);
    assert_eq!(
        endpoint.switch(new_cfg),
        Err(Error::Tls(ErrorCode::from_static("TESTENGINE_E_CONFIG")))
    );

    // Nothing moved: same state, same config, one configuration applied.
    assert_eq!(endpoint.get_state(), State::DataRW);
    assert!(std::sync::Arc::ptr_eq(&endpoint.get_config(), &cfg));
    assert_eq!(handle.credentials_sets(), 1);
}

#[test]
fn failed_accept_switch_config_exchange_is_atomic_too() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let handle = engine.add_session(
        SessionScript::new()
            .configures([Step::Ok, Step::Fatal("TESTENGINE_E_CONFIG")])
            .handshake([Step::Ok])
            .recvs([RecvStep::Err(Step::Rehandshake)]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Server, recv, send, None, cfg.clone())
        .unwrap();
    endpoint.hello().unwrap();
    assert_eq!(endpoint.recv(&mut [0u8; 16]), Err(Error::SwitchRequest));

    let new_cfg = config(&provider, PeerAuth::None);
    assert_eq!(
        endpoint.accept_switch(new_cfg),
        Err(Error::Tls(ErrorCode::from_static("TESTENGINE_E_CONFIG")))
    );

    assert_eq!(endpoint.get_state(), State::DataRW);
    assert!(std::sync::Arc::ptr_eq(&endpoint.get_config(), &cfg));
    assert_eq!(handle.credentials_sets(), 1);
}

/// A fatal failure while refusing leaves the endpoint in `Refusing`; a
/// retried refusal may still complete later.
#[test]
fn failed_refusal_is_absorbing_until_retried() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok])
            .recvs([RecvStep::Err(Step::Rehandshake)])
            .alerts([Step::Fatal("TESTENGINE_E_PUSH"), Step::Ok]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Server, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();
    assert_eq!(endpoint.recv(&mut [0u8; 16]), Err(Error::SwitchRequest));

    assert_eq!(
        endpoint.refuse_switch(),
        Err(Error::Tls(ErrorCode::from_static("TESTENGINE_E_PUSH")))
    );
    assert_eq!(endpoint.get_state(), State::Refusing);

    endpoint.refuse_switch().unwrap();
    assert_eq!(endpoint.get_state(), State::DataRW);
}
