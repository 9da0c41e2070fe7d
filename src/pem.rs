//! PEM armor decoding and encoding.
//!
//! The native engine mostly wants DER, while credential material on disk is
//! usually ASCII-armored. This module converts between the two: [`decode`]
//! splits a byte blob into the DER payloads of the blocks whose header tags
//! the caller accepts, preserving file order, and [`encode`] re-armors a DER
//! payload under a given tag (needed for key formats the engine only imports
//! from PEM).

use crate::error::Error;
use data_encoding::BASE64;
use once_cell::sync::Lazy;
use std::{fs, path::Path};

/// Header tags accepted for X.509 certificates.
pub const CERTIFICATE_TAGS: &[&str] = &["X509 CERTIFICATE", "CERTIFICATE"];

/// Header tags accepted for certificate revocation lists.
pub const CRL_TAGS: &[&str] = &["X509 CRL"];

/// Header tags accepted for private keys, in the order they are recognized.
pub const PRIVATE_KEY_TAGS: &[&str] = &[
    "RSA PRIVATE KEY",
    "DSA PRIVATE KEY",
    "EC PRIVATE KEY",
    "PRIVATE KEY",
    "ENCRYPTED PRIVATE KEY",
];

/// Header tags accepted for Diffie-Hellman parameters.
pub const DH_PARAMS_TAGS: &[&str] = &["DH PARAMETERS"];

/// Base64 encoding wrapped at the conventional PEM line width.
static PEM_BASE64: Lazy<data_encoding::Encoding> = Lazy::new(|| {
    let mut spec = BASE64.specification();
    spec.wrap.width = 64;
    spec.wrap.separator.push_str("\n");
    spec.encoding().unwrap()
});

/// Decode all accepted PEM blocks from a file.
///
/// See [`decode`] for the contract; an unreadable file is a
/// [`Error::Parse`].
pub fn decode_file(
    path: &Path,
    tags: &[&str],
    allow_empty: bool,
) -> Result<Vec<(String, Vec<u8>)>, Error> {
    let bytes = fs::read(path)
        .map_err(|e| Error::Parse(format!("cannot read {}: {}", path.display(), e)))?;
    decode(&bytes, tags, allow_empty)
}

/// Decode all accepted PEM blocks from a byte blob.
///
/// Returns `(tag, der)` pairs in the order the blocks appear. Blocks with
/// tags not listed in `tags` are skipped. Malformed armor (an unterminated
/// block, mismatched `BEGIN`/`END` tags, or a body that is not base64) is an
/// [`Error::Parse`]; an empty result is [`Error::EmptyPem`] unless
/// `allow_empty` is set.
pub fn decode(bytes: &[u8], tags: &[&str], allow_empty: bool) -> Result<Vec<(String, Vec<u8>)>, Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::Parse("PEM data is not valid UTF-8".into()))?;

    let mut blocks = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in text.lines() {
        let line = line.trim();

        match current.take() {
            None => {
                if let Some(tag) = armor_boundary(line, "-----BEGIN ") {
                    current = Some((tag.to_owned(), String::new()));
                }
                // Anything between blocks is free-form commentary.
            }
            Some((tag, mut body)) => {
                if let Some(end_tag) = armor_boundary(line, "-----END ") {
                    if end_tag != tag {
                        return Err(Error::Parse(format!(
                            "PEM block \"{}\" terminated by \"{}\"",
                            tag, end_tag
                        )));
                    }

                    if tags.contains(&tag.as_str()) {
                        let der = BASE64.decode(body.as_bytes()).map_err(|e| {
                            Error::Parse(format!("bad base64 in PEM block \"{}\": {}", tag, e))
                        })?;
                        blocks.push((tag, der));
                    } else {
                        tracing::trace!(tag = %tag, "skipping unrecognized PEM block");
                    }
                } else if line.starts_with("-----") {
                    return Err(Error::Parse(format!(
                        "unexpected armor boundary inside PEM block \"{}\"",
                        tag
                    )));
                } else {
                    body.push_str(line);
                    current = Some((tag, body));
                }
            }
        }
    }

    if let Some((tag, _)) = current {
        return Err(Error::Parse(format!("unterminated PEM block \"{}\"", tag)));
    }

    if blocks.is_empty() && !allow_empty {
        return Err(Error::EmptyPem);
    }

    Ok(blocks)
}

/// Armor a DER payload under the given header tag.
pub fn encode(tag: &str, der: &[u8]) -> String {
    let mut pem = String::new();

    pem.push_str("-----BEGIN ");
    pem.push_str(tag);
    pem.push_str("-----\n");
    PEM_BASE64.encode_append(der, &mut pem);
    if !pem.ends_with('\n') {
        pem.push('\n');
    }
    pem.push_str("-----END ");
    pem.push_str(tag);
    pem.push_str("-----\n");

    pem
}

/// If `line` is an armor boundary with the given prefix, return its tag.
fn armor_boundary<'l>(line: &'l str, prefix: &str) -> Option<&'l str> {
    line.strip_prefix(prefix)?.strip_suffix("-----")
}
