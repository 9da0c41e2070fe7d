//! Configuration building.

mod common;

use common::{config, idle_transport, provider};
use nettls::{
    pem, CertSource, Config, Credentials, DhParams, Error, ErrorCode, PeerAuth, Role, TlsProvider,
};
use std::io::Write;
use testengine::{FakeEngine, SessionScript};

fn credentials(provider: &nettls::NativeProvider) -> Credentials {
    provider
        .create_x509_credentials(
            Credentials::builder().trust(CertSource::Der(vec![b"ca".to_vec()])),
        )
        .unwrap()
}

#[test]
fn priority_is_validated_by_the_engine() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    engine.reject_priority("NOT-A-PRIORITY");

    let creds = credentials(&provider);
    let error = provider
        .create_config(Config::builder(creds).priority("NOT-A-PRIORITY"))
        .unwrap_err();

    assert_eq!(
        error,
        Error::Tls(ErrorCode::from_static("TESTENGINE_E_INVALID_PRIORITY"))
    );
}

#[test]
fn default_priority_reaches_the_session() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);
    assert_eq!(cfg.priority(), "NORMAL");

    let handle = engine.add_session(SessionScript::new());
    let (recv, send) = idle_transport();
    provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();

    assert_eq!(handle.priority(), Some("NORMAL".to_owned()));
    assert_eq!(handle.credentials_sets(), 1);
}

#[test]
fn dh_params_from_der_are_imported_once() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);

    let creds = credentials(&provider);
    let cfg = provider
        .create_config(Config::builder(creds).dh_params(DhParams::Der(b"dh der".to_vec())))
        .unwrap();

    assert_eq!(engine.dh_imports(), vec![b"dh der".to_vec()]);

    // Every endpoint sharing the config reuses the imported handle.
    let first = engine.add_session(SessionScript::new());
    let (recv, send) = idle_transport();
    provider
        .create_endpoint(Role::Server, recv, send, None, cfg.clone())
        .unwrap();

    let second = engine.add_session(SessionScript::new());
    let (recv, send) = idle_transport();
    provider
        .create_endpoint(Role::Server, recv, send, None, cfg)
        .unwrap();

    assert_eq!(engine.dh_imports().len(), 1);
    assert_eq!(first.dh_sets(), 1);
    assert_eq!(second.dh_sets(), 1);
}

#[test]
fn dh_params_from_a_pem_file() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(pem::encode("DH PARAMETERS", b"dh pem der").as_bytes())
        .unwrap();
    file.flush().unwrap();

    let creds = credentials(&provider);
    provider
        .create_config(
            Config::builder(creds).dh_params(DhParams::PemFile(file.path().to_owned())),
        )
        .unwrap();

    assert_eq!(engine.dh_imports(), vec![b"dh pem der".to_vec()]);
}

#[test]
fn dh_params_can_be_generated() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);

    let creds = credentials(&provider);
    provider
        .create_config(Config::builder(creds).dh_params(DhParams::Generate(2048)))
        .unwrap();

    assert_eq!(engine.dh_generated(), vec![2048]);
}

#[test]
fn config_without_dh_params_attaches_none() {
    let engine = FakeEngine::new();
    let provider = provider(&engine);
    let cfg = config(&provider, PeerAuth::None);

    let handle = engine.add_session(SessionScript::new());
    let (recv, send) = idle_transport();
    provider
        .create_endpoint(Role::Client, recv, send, None, cfg)
        .unwrap();

    assert_eq!(handle.dh_sets(), 0);
}
