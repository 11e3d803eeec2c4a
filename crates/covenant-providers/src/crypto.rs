//! Cryptography: `std.crypto.*`.
//!
//! Keys, digests and signatures cross the boundary hex-encoded.

use std::sync::Arc;

use covenant_abi::AbiValue;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

/// Lower-case hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decode hex, accepting either case.
///
/// # Errors
///
/// Returns [`HostCallError::InvalidInput`] for odd lengths or non-hex digits.
pub fn from_hex(text: &str) -> HostCallResult<Vec<u8>> {
    fn nibble(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            b'A'..=b'F' => Some(c - b'A' + 10),
            _ => None,
        }
    }

    let bytes = text.as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(HostCallError::InvalidInput("odd-length hex string".into()));
    }

    bytes
        .chunks_exact(2)
        .map(|pair| match (nibble(pair[0]), nibble(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(HostCallError::InvalidInput("invalid hex digit".into())),
        })
        .collect()
}

fn fixed<const N: usize>(text: &str, what: &str) -> HostCallResult<[u8; N]> {
    from_hex(text)?
        .try_into()
        .map_err(|_| HostCallError::InvalidInput(format!("{what} must be {N} bytes")))
}

/// Cryptographic primitives available to guests.
pub trait Crypto: Send + Sync {
    /// Hex digest of `data` under `algorithm`.
    fn hash(&self, algorithm: &str, data: &[u8]) -> HostCallResult<String>;
    /// Hex signature of `message` under a hex secret key.
    fn sign(&self, secret_key: &str, message: &[u8]) -> HostCallResult<String>;
    /// Check a hex signature against a hex public key.
    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> HostCallResult<bool>;
}

/// SHA-2 hashing and Ed25519 signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCrypto;

impl DefaultCrypto {
    /// The hex public key belonging to a hex Ed25519 secret key.
    ///
    /// # Errors
    ///
    /// Returns an error when the secret key is not 32 hex-encoded bytes.
    pub fn public_key(&self, secret_key: &str) -> HostCallResult<String> {
        let key = SigningKey::from_bytes(&fixed::<32>(secret_key, "secret key")?);
        Ok(to_hex(key.verifying_key().as_bytes()))
    }
}

impl Crypto for DefaultCrypto {
    fn hash(&self, algorithm: &str, data: &[u8]) -> HostCallResult<String> {
        match algorithm.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(to_hex(&Sha256::digest(data))),
            "sha512" | "sha-512" => Ok(to_hex(&Sha512::digest(data))),
            other => Err(HostCallError::Crypto(format!(
                "unsupported hash algorithm: {other}"
            ))),
        }
    }

    fn sign(&self, secret_key: &str, message: &[u8]) -> HostCallResult<String> {
        let key = SigningKey::from_bytes(&fixed::<32>(secret_key, "secret key")?);
        Ok(to_hex(&key.sign(message).to_bytes()))
    }

    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> HostCallResult<bool> {
        let key = VerifyingKey::from_bytes(&fixed::<32>(public_key, "public key")?)
            .map_err(|e| HostCallError::Crypto(format!("invalid public key: {e}")))?;
        let signature = Signature::from_bytes(&fixed::<64>(signature, "signature")?);
        Ok(key.verify(message, &signature).is_ok())
    }
}

pub(crate) fn register(table: &mut HostFunctionTable, crypto: Arc<dyn Crypto>) {
    host_functions!(table, FunctionKind::Effect, "std.crypto", with crypto, {
        "hash" => (Str, Str) -> Str, move |a| {
            Ok(AbiValue::Str(crypto.hash(a.str(0)?, a.str(1)?.as_bytes())?))
        };
        "sign" => (Str, Str) -> Str, move |a| {
            Ok(AbiValue::Str(crypto.sign(a.str(0)?, a.str(1)?.as_bytes())?))
        };
        "verify" => (Str, Str, Str) -> Bool, move |a| {
            Ok(AbiValue::Bool(crypto.verify(a.str(0)?, a.str(1)?.as_bytes(), a.str(2)?)?))
        };
    });
}
