use core::fmt;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// A minimal secret container that zeroizes its contents on drop.
///
/// This is intentionally small and avoids exposing secrets via `Debug`.
#[derive(Clone)]
pub(crate) struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn empty() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn to_key_sha1(&self) -> [u8; 20] {
        normalize_key_sha1(self.expose())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

pub(crate) type HmacSha1 = Hmac<Sha1>;

/// Normalize a password into a fixed 20-byte key.
///
/// The secret is truncated and the remainder is zero-padded.
pub(crate) fn normalize_key_sha1(secret: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    let n = secret.len().min(out.len());
    out[..n].copy_from_slice(&secret[..n]);
    out
}

pub(crate) fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<[u8; 20]> {
    let mut mac =
        <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| Error::Crypto("invalid HMAC key"))?;
    mac.update(data);
    let bytes = mac.finalize().into_bytes();
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes[..]);
    Ok(out)
}

/// Auth code placed in the `Activate Session` request of a single-session link.
///
/// `HMAC-SHA1(K[password], temporary_session_id || challenge)`, truncated to 16 bytes.
pub(crate) fn single_session_auth_code(
    password: &SecretBytes,
    temporary_session_id: u32,
    challenge: &[u8; 16],
) -> Result<[u8; 16]> {
    let mut key = password.to_key_sha1();

    let mut data = [0u8; 4 + 16];
    data[..4].copy_from_slice(&temporary_session_id.to_le_bytes());
    data[4..].copy_from_slice(challenge);

    let full = hmac_sha1(&key, &data);
    key.zeroize();
    let full = full?;

    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    Ok(out)
}
