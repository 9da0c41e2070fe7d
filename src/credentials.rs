//! Credential material and the builder that assembles it.
//!
//! A [`Credentials`] value bundles trust anchors, revocation lists, and any
//! number of (certificate chain, private key) identities into one engine
//! credential set. The same set is usable for the server and the client side
//! of a connection, and may be shared by any number of configurations and
//! endpoints; the engine holds the only copy of the key material.

use crate::{
    engine::{Engine, EngineCredentials, KeyImport},
    error::Error,
    pem,
};
use std::{env, fmt, path::PathBuf, sync::Arc};

/// A source of one or more X.509 certificates.
#[derive(Clone, Debug)]
pub enum CertSource {
    /// A PEM file containing any number of certificate blocks.
    PemFile(PathBuf),

    /// DER-encoded certificates held in memory.
    Der(Vec<Vec<u8>>),
}

/// A source of one or more certificate revocation lists.
#[derive(Clone, Debug)]
pub enum CrlSource {
    /// A PEM file containing any number of `X509 CRL` blocks.
    PemFile(PathBuf),

    /// DER-encoded CRLs held in memory.
    Der(Vec<Vec<u8>>),
}

/// A source of exactly one private key.
#[derive(Clone)]
pub enum PrivateKeySource {
    /// A PEM file; the first recognized key block is used and its header tag
    /// dictates how the key is decoded.
    PemFile(PathBuf),

    /// A DER-encoded PKCS#1 RSA key.
    Rsa(Vec<u8>),

    /// A DER-encoded DSA key.
    Dsa(Vec<u8>),

    /// A DER-encoded SEC1 elliptic-curve key.
    Ec(Vec<u8>),

    /// A DER-encoded plain PKCS#8 key.
    Pkcs8(Vec<u8>),

    /// A DER-encoded encrypted PKCS#8 key; requires a password.
    Pkcs8Encrypted(Vec<u8>),
}

impl fmt::Debug for PrivateKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key bytes stay out of logs.
        match self {
            PrivateKeySource::PemFile(path) => f.debug_tuple("PemFile").field(path).finish(),
            PrivateKeySource::Rsa(_) => f.write_str("Rsa(..)"),
            PrivateKeySource::Dsa(_) => f.write_str("Dsa(..)"),
            PrivateKeySource::Ec(_) => f.write_str("Ec(..)"),
            PrivateKeySource::Pkcs8(_) => f.write_str("Pkcs8(..)"),
            PrivateKeySource::Pkcs8Encrypted(_) => f.write_str("Pkcs8Encrypted(..)"),
        }
    }
}

/// One (certificate chain, private key) identity to install.
#[derive(Clone)]
struct IdentitySource {
    chain: CertSource,
    key: PrivateKeySource,
    password: Option<String>,
}

impl fmt::Debug for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySource")
            .field("chain", &self.chain)
            .field("key", &self.key)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A builder for creating an X.509 credential set.
#[derive(Clone, Debug, Default)]
#[must_use = "builders have no effect if unused"]
pub struct X509CredentialsBuilder {
    system_trust: bool,
    trust: Vec<CertSource>,
    revoke: Vec<CrlSource>,
    keys: Vec<IdentitySource>,
}

impl X509CredentialsBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also trust the platform's certificate store.
    ///
    /// If the `SSL_CERT_FILE` environment variable points at a PEM bundle,
    /// that file is parsed as trust anchors; otherwise the engine is asked to
    /// load whatever native store it knows about.
    pub fn system_trust(mut self, enable: bool) -> Self {
        self.system_trust = enable;
        self
    }

    /// Add trust anchors from the given source.
    pub fn trust(mut self, source: CertSource) -> Self {
        self.trust.push(source);
        self
    }

    /// Add certificate revocation lists from the given source.
    pub fn revoke(mut self, source: CrlSource) -> Self {
        self.revoke.push(source);
        self
    }

    /// Add one identity: a certificate chain, its private key, and the key
    /// password if the key is encrypted.
    pub fn identity(
        mut self,
        chain: CertSource,
        key: PrivateKeySource,
        password: impl Into<Option<String>>,
    ) -> Self {
        self.keys.push(IdentitySource {
            chain,
            key,
            password: password.into(),
        });
        self
    }

    /// Assemble the credential set against the given engine.
    pub(crate) fn build(self, engine: &dyn Engine) -> Result<Credentials, Error> {
        let mut creds = engine.new_credentials()?;

        if self.system_trust {
            add_system_trust(&mut *creds)?;
        }

        for source in &self.trust {
            for der in load_certs(source)? {
                creds.add_trust_anchor(&der)?;
            }
        }

        for source in &self.revoke {
            let ders = match source {
                CrlSource::PemFile(path) => pem::decode_file(path, pem::CRL_TAGS, false)?
                    .into_iter()
                    .map(|(_, der)| der)
                    .collect(),
                CrlSource::Der(ders) => ders.clone(),
            };
            for der in ders {
                creds.add_crl(&der)?;
            }
        }

        for identity in self.keys {
            let chain = load_certs(&identity.chain)?;
            install_key_pair(&mut *creds, &chain, &identity.key, identity.password.as_deref())?;
            tracing::debug!(chain_len = chain.len(), "installed identity");
        }

        creds.set_default_verify_flags();

        Ok(Credentials {
            inner: Arc::from(creds),
        })
    }
}

/// An immutable, shareable X.509 credential set.
#[derive(Clone)]
pub struct Credentials {
    inner: Arc<dyn EngineCredentials>,
}

impl Credentials {
    /// Start building a credential set.
    pub fn builder() -> X509CredentialsBuilder {
        X509CredentialsBuilder::new()
    }

    /// The engine-side credential handle.
    pub(crate) fn engine(&self) -> &Arc<dyn EngineCredentials> {
        &self.inner
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

/// Load trust anchors from the platform, preferring an explicitly configured
/// PEM bundle over the engine's own notion of a native store.
fn add_system_trust(creds: &mut dyn EngineCredentials) -> Result<(), Error> {
    // Note: OpenSSL checks `SSL_CERT_FILE` by default but other engines do
    // not; honoring it here makes the behavior uniform across engines.
    if let Some(path) = env::var_os("SSL_CERT_FILE") {
        let path = PathBuf::from(path);
        let anchors = pem::decode_file(&path, pem::CERTIFICATE_TAGS, false)?;
        let count = anchors.len();
        for (_, der) in anchors {
            creds.add_trust_anchor(&der)?;
        }
        tracing::debug!(count, path = %path.display(), "loaded trust anchors from SSL_CERT_FILE");
    } else {
        let count = creds.add_system_trust()?;
        tracing::debug!(count, "loaded platform trust store");
    }

    Ok(())
}

fn load_certs(source: &CertSource) -> Result<Vec<Vec<u8>>, Error> {
    match source {
        CertSource::PemFile(path) => Ok(pem::decode_file(path, pem::CERTIFICATE_TAGS, false)?
            .into_iter()
            .map(|(_, der)| der)
            .collect()),
        CertSource::Der(ders) => Ok(ders.clone()),
    }
}

/// Install one identity, deciding how the key reaches the engine.
///
/// The engine has two key importers: PEM (any algorithm) and PKCS#8 DER.
/// Bare RSA/DSA/EC DER keys therefore get re-armored into PEM on the way in.
fn install_key_pair(
    creds: &mut dyn EngineCredentials,
    chain: &[Vec<u8>],
    key: &PrivateKeySource,
    password: Option<&str>,
) -> Result<(), Error> {
    match key {
        PrivateKeySource::PemFile(path) => {
            let blocks = pem::decode_file(path, pem::PRIVATE_KEY_TAGS, false)?;
            let (tag, der) = &blocks[0];
            match tag.as_str() {
                "PRIVATE KEY" => install_pkcs8(creds, chain, der, None)?,
                "ENCRYPTED PRIVATE KEY" => {
                    let password = password.ok_or(Error::PasswordRequired)?;
                    install_pkcs8(creds, chain, der, Some(password))?;
                }
                _ => {
                    let pem = pem::encode(tag, der);
                    creds.add_key_pair(chain, KeyImport::Pem(pem.as_bytes()))?;
                }
            }
        }
        PrivateKeySource::Rsa(der) => install_rewrapped(creds, chain, "RSA PRIVATE KEY", der)?,
        PrivateKeySource::Dsa(der) => install_rewrapped(creds, chain, "DSA PRIVATE KEY", der)?,
        PrivateKeySource::Ec(der) => install_rewrapped(creds, chain, "EC PRIVATE KEY", der)?,
        PrivateKeySource::Pkcs8(der) => install_pkcs8(creds, chain, der, None)?,
        PrivateKeySource::Pkcs8Encrypted(der) => {
            let password = password.ok_or(Error::PasswordRequired)?;
            install_pkcs8(creds, chain, der, Some(password))?;
        }
    }

    Ok(())
}

fn install_rewrapped(
    creds: &mut dyn EngineCredentials,
    chain: &[Vec<u8>],
    tag: &str,
    der: &[u8],
) -> Result<(), Error> {
    let pem = pem::encode(tag, der);
    creds.add_key_pair(chain, KeyImport::Pem(pem.as_bytes()))?;
    Ok(())
}

fn install_pkcs8(
    creds: &mut dyn EngineCredentials,
    chain: &[Vec<u8>],
    der: &[u8],
    password: Option<&str>,
) -> Result<(), Error> {
    creds.add_key_pair(chain, KeyImport::Pkcs8 { der, password })?;
    Ok(())
}
