//! Application data transfer and shutdown.

mod common;

use common::{config, eof_transport, idle_transport, provider};
use nettls::{CloseDirection, Error, PeerAuth, Role, State, TlsProvider};
use testengine::{FakeEngine, RecvStep, SendStep, SessionScript, Step};

fn data_endpoint(script: SessionScript) -> (nettls::Endpoint, testengine::SessionHandle) {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);
    let handle = engine.add_session(script.handshake([Step::Ok]));

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();

    (endpoint, handle)
}

#[test]
fn send_returns_accepted_bytes() {
    let (mut endpoint, _) = data_endpoint(SessionScript::new().sends([SendStep::Accept(5)]));

    assert_eq!(endpoint.send(b"hello world").unwrap(), 5);
    assert_eq!(endpoint.get_state(), State::DataRW);
}

#[test]
fn send_surfaces_would_block_by_direction() {
    let (mut endpoint, _) = data_endpoint(SessionScript::new().sends([
        SendStep::Err(Step::Again(nettls::engine::IoDirection::Write)),
        SendStep::Accept(11),
    ]));

    assert_eq!(endpoint.send(b"hello world"), Err(Error::AgainWrite));
    assert_eq!(endpoint.send(b"hello world").unwrap(), 11);
}

#[test]
fn recv_fills_the_buffer() {
    let (mut endpoint, _) =
        data_endpoint(SessionScript::new().recvs([RecvStep::Data(b"payload".to_vec())]));

    let mut buf = [0u8; 32];
    let n = endpoint.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"payload");
}

#[test]
fn recv_with_an_empty_buffer_is_inert() {
    // No recv step scripted: the engine must not be consulted at all.
    let (mut endpoint, _) = data_endpoint(SessionScript::new());

    assert_eq!(endpoint.recv(&mut []).unwrap(), 0);
    assert_eq!(endpoint.get_state(), State::DataRW);
}

#[test]
fn tls_eof_half_closes_the_read_side() {
    let (mut endpoint, _) = data_endpoint(
        SessionScript::new()
            .recvs([RecvStep::Eof])
            .sends([SendStep::Accept(4)])
            .byes([Step::Ok]),
    );

    assert_eq!(endpoint.recv(&mut [0u8; 16]).unwrap(), 0);
    assert_eq!(endpoint.get_state(), State::DataW);

    // The write side still works, and closing it ends the session.
    assert_eq!(endpoint.send(b"last").unwrap(), 4);
    endpoint.bye(CloseDirection::Send).unwrap();
    assert_eq!(endpoint.get_state(), State::End);
}

#[test]
fn tls_eof_after_our_close_ends_the_session() {
    let (mut endpoint, _) = data_endpoint(
        SessionScript::new()
            .byes([Step::Ok])
            .recvs([RecvStep::Eof]),
    );

    endpoint.bye(CloseDirection::Send).unwrap();
    assert_eq!(endpoint.get_state(), State::DataR);

    assert_eq!(endpoint.recv(&mut [0u8; 16]).unwrap(), 0);
    assert_eq!(endpoint.get_state(), State::End);
}

#[test]
fn bye_all_ends_the_session() {
    let (mut endpoint, _) = data_endpoint(SessionScript::new().byes([Step::Ok]));

    endpoint.bye(CloseDirection::All).unwrap();
    assert_eq!(endpoint.get_state(), State::End);
}

#[test]
fn bye_receive_is_a_no_op() {
    // No bye step scripted: the engine must not be consulted.
    let (mut endpoint, _) = data_endpoint(SessionScript::new());

    endpoint.bye(CloseDirection::Receive).unwrap();
    assert_eq!(endpoint.get_state(), State::DataRW);
}

#[test]
fn bye_retries_after_would_block() {
    let (mut endpoint, _) = data_endpoint(SessionScript::new().byes([
        Step::Again(nettls::engine::IoDirection::Write),
        Step::Ok,
    ]));

    assert_eq!(endpoint.bye(CloseDirection::Send), Err(Error::AgainWrite));
    assert_eq!(endpoint.get_state(), State::DataRW);

    endpoint.bye(CloseDirection::Send).unwrap();
    assert_eq!(endpoint.get_state(), State::DataR);
}

/// Transport end-of-file latches forever.
#[test]
fn transport_eof_is_latched() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok])
            .recvs([RecvStep::FromTransport])
            .sends([SendStep::Accept(2)]),
    );

    let (recv, send) = eof_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();
    assert!(!endpoint.at_transport_eof());

    // The engine relays the transport EOF as a TLS-level EOF.
    assert_eq!(endpoint.recv(&mut [0u8; 16]).unwrap(), 0);
    assert!(endpoint.at_transport_eof());
    assert_eq!(endpoint.get_state(), State::DataW);

    // Still latched after unrelated activity.
    assert_eq!(endpoint.send(b"ok").unwrap(), 2);
    assert!(endpoint.at_transport_eof());
}

/// A transport that would block surfaces as a read suspension through the
/// engine, and the latch stays untouched.
#[test]
fn would_block_transport_does_not_latch_eof() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    engine.add_session(
        SessionScript::new()
            .handshake([Step::Ok])
            .recvs([RecvStep::FromTransport]),
    );

    let (recv, send) = idle_transport();
    let mut endpoint = provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();
    endpoint.hello().unwrap();

    assert_eq!(endpoint.recv(&mut [0u8; 16]), Err(Error::AgainRead));
    assert!(!endpoint.at_transport_eof());
    assert_eq!(endpoint.get_state(), State::DataRW);
}
