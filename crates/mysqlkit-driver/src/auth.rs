//! Authentication plugin scrambles.
//!
//! `mysql_native_password`:
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! `caching_sha2_password` fast path:
//! ```text
//! SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)
//! ```
//!
//! When the server has no cached entry it asks for full authentication. On a
//! plain TCP connection the client then fetches the server's RSA public key
//! and sends the NUL-terminated password, XORed with the seed, encrypted
//! with RSA-OAEP.

use mysqlkit_core::error::{ConnectionError, ConnectionErrorKind};
use mysqlkit_core::{Error, Result};
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
}

/// Status bytes in `caching_sha2_password` auth-more-data packets.
pub mod caching_sha2 {
    /// Client request for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

fn xor(left: &[u8], right: &[u8]) -> Vec<u8> {
    left.iter().zip(right).map(|(a, b)| a ^ b).collect()
}

/// Scramble for `mysql_native_password`; empty for an empty password.
pub fn mysql_native_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = &seed[..seed.len().min(20)];

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let stage3 = Sha1::new().chain_update(seed).chain_update(stage2).finalize();
    xor(&stage1, &stage3)
}

/// Fast-path scramble for `caching_sha2_password`; empty for an empty password.
pub fn caching_sha2_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = trim_seed(seed);

    let hashed = Sha256::digest(password.as_bytes());
    let double = Sha256::digest(hashed);
    let scramble = Sha256::new()
        .chain_update(double)
        .chain_update(seed)
        .finalize();
    xor(&hashed, &scramble)
}

/// Handshake seeds arrive as 20 bytes plus a NUL terminator.
fn trim_seed(seed: &[u8]) -> &[u8] {
    match seed {
        [head @ .., 0] if head.len() == 20 => head,
        _ => seed,
    }
}

/// Encrypt the password for full authentication without TLS.
///
/// Accepts SPKI (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`)
/// PEM. `use_oaep` selects OAEP padding (MySQL 8.0.5+) over PKCS#1 v1.5.
pub fn sha256_password_rsa(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
    use_oaep: bool,
) -> Result<Vec<u8>> {
    let seed = trim_seed(seed);
    if seed.is_empty() {
        return Err(auth_error("server sent an empty scramble", None));
    }

    let mut plain = password.as_bytes().to_vec();
    plain.push(0);
    for (byte, key) in plain.iter_mut().zip(seed.iter().cycle()) {
        *byte ^= key;
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_error("server public key is not PEM text", Some(Box::new(e))))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| auth_error("cannot parse server public key", Some(Box::new(e))))?;

    let encrypted = if use_oaep {
        key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plain)
    } else {
        key.encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, &plain)
    };
    encrypted.map_err(|e| auth_error("RSA encryption of password failed", Some(Box::new(e))))
}

fn auth_error(
    message: &str,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: message.to_string(),
        source,
    })
}
