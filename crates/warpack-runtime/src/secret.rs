// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reversible handling of sensitive configuration values.
//!
//! Two schemes are recognised by a prefix on the stored string:
//!
//! | Prefix | Scheme | Password |
//! |--------|--------|----------|
//! | `OBF`  | Byte scrambling, base-36 groups of 4 characters | none |
//! | `ENC`  | AES-256-GCM, key derived from password + random salt | required |
//!
//! `OBF` only hides a value from casual inspection. `ENC` values carry their
//! salt (12 base64 characters) directly after the prefix.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha512};
use thiserror::Error;
use zeroize::Zeroizing;

/// Prefix of obfuscated values.
pub const OBF_PREFIX: &str = "OBF";
/// Prefix of encrypted values.
pub const ENC_PREFIX: &str = "ENC";

const SALT_LEN: usize = 8;
/// Base64 length of an 8 byte salt.
const ENCODED_SALT_LEN: usize = 12;
const ITERATIONS: usize = 20;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Offset of an encoded group: the value produced by two zero bytes.
const GROUP_BASE: u32 = 127 * 256 + 127;

/// Errors from secret decoding and encryption.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SecretError {
    /// An `ENC` value was found but no password was supplied.
    #[error("a password is required to decrypt ENC values")]
    PasswordRequired,

    /// The password was wrong or the ciphertext was tampered with.
    #[error("decryption failed: wrong password or corrupted value")]
    DecryptionFailed,

    /// Encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// The stored value is not well formed.
    #[error("malformed {scheme} value: {reason}")]
    Malformed {
        /// Scheme prefix of the value.
        scheme: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result type for secret operations.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Obfuscate `plain` into its `OBF` form.
pub fn obfuscate(plain: &str) -> String {
    let bytes = plain.as_bytes();
    let mut out = String::with_capacity(OBF_PREFIX.len() + bytes.len() * 4);
    out.push_str(OBF_PREFIX);

    for (i, &b1) in bytes.iter().enumerate() {
        let b2 = bytes[bytes.len() - 1 - i];
        let (b1, b2) = (i32::from(b1), i32::from(b2));
        let i1 = 127 + b1 + b2;
        let i2 = 127 + b1 - b2;
        // Always positive: the smallest group is GROUP_BASE.
        let group = (i1 * 256 + i2) as u32;
        let digits = to_base36(group);
        for _ in digits.len()..4 {
            out.push('0');
        }
        out.push_str(&digits);
    }
    out
}

/// Recover the plaintext of an `OBF` value. The prefix is optional.
pub fn deobfuscate(value: &str) -> Result<String> {
    let body = value.strip_prefix(OBF_PREFIX).unwrap_or(value);
    let malformed = |reason: String| SecretError::Malformed {
        scheme: OBF_PREFIX,
        reason,
    };

    if body.len() % 4 != 0 || !body.is_ascii() {
        return Err(malformed(format!(
            "expected groups of 4 base-36 digits, got {} characters",
            body.len()
        )));
    }

    let mut bytes = Vec::with_capacity(body.len() / 4);
    for group in body.as_bytes().chunks(4) {
        // chunks of an ASCII string are valid UTF-8
        let text = std::str::from_utf8(group).unwrap_or_default();
        let i0 = u32::from_str_radix(text, 36)
            .map_err(|_| malformed(format!("invalid group '{text}'")))?;
        bytes.push(decode_group(i0).ok_or_else(|| malformed(format!("invalid group '{text}'")))?);
    }

    String::from_utf8(bytes).map_err(|_| malformed("decoded bytes are not UTF-8".to_string()))
}

/// Solve `i0 - GROUP_BASE = 257 * b1 + 255 * b2` for the leading byte `b1`.
fn decode_group(i0: u32) -> Option<u8> {
    let n = i0.checked_sub(GROUP_BASE)?;
    // 2 * 128 == 1 (mod 255)
    let mut b1 = (n % 255) * 128 % 255;
    if b1 == 0 && n > 255 * 255 {
        b1 = 255;
    }
    let rest = n.checked_sub(257 * b1)?;
    if rest % 255 != 0 || rest / 255 > 255 {
        return None;
    }
    u8::try_from(b1).ok()
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Encrypt `plain` with `password` into its `ENC` form.
///
/// A fresh random salt is used for every call, so encrypting the same value
/// twice yields different strings.
pub fn encrypt(plain: &str, password: &str) -> Result<String> {
    let salt: [u8; SALT_LEN] = rand::random();
    let (key, nonce) = derive_key(password, &salt);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce[..]), plain.as_bytes())
        .map_err(|_| SecretError::EncryptionFailed)?;

    Ok(format!(
        "{ENC_PREFIX}{}{}",
        BASE64.encode(salt),
        BASE64.encode(ciphertext)
    ))
}

/// Decrypt an `ENC` value. The prefix is optional.
pub fn decrypt(value: &str, password: &str) -> Result<String> {
    let body = value.strip_prefix(ENC_PREFIX).unwrap_or(value);
    let malformed = |reason: &str| SecretError::Malformed {
        scheme: ENC_PREFIX,
        reason: reason.to_string(),
    };

    if body.len() <= ENCODED_SALT_LEN || !body.is_char_boundary(ENCODED_SALT_LEN) {
        return Err(malformed("value too short"));
    }
    let (salt_b64, data_b64) = body.split_at(ENCODED_SALT_LEN);
    let salt = BASE64
        .decode(salt_b64)
        .map_err(|_| malformed("salt is not valid base64"))?;
    let data = BASE64
        .decode(data_b64)
        .map_err(|_| malformed("ciphertext is not valid base64"))?;

    let (key, nonce) = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let plain = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce[..]), data.as_slice())
            .map_err(|_| SecretError::DecryptionFailed)?,
    );

    String::from_utf8(plain.to_vec()).map_err(|_| SecretError::DecryptionFailed)
}

/// Iterated SHA-512 over `password || salt`; the digest supplies key and nonce.
fn derive_key(
    password: &str,
    salt: &[u8],
) -> (Zeroizing<[u8; KEY_LEN]>, Zeroizing<[u8; NONCE_LEN]>) {
    let mut hasher = Sha512::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    let mut digest = Zeroizing::new(hasher.finalize().to_vec());
    for _ in 1..ITERATIONS {
        digest = Zeroizing::new(Sha512::digest(&digest[..]).to_vec());
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&digest[..KEY_LEN]);
    let mut nonce = Zeroizing::new([0u8; NONCE_LEN]);
    nonce.copy_from_slice(&digest[KEY_LEN..KEY_LEN + NONCE_LEN]);
    (key, nonce)
}

/// Whether `value` carries one of the secret prefixes.
pub fn is_protected(value: &str) -> bool {
    value.starts_with(OBF_PREFIX) || value.starts_with(ENC_PREFIX)
}

/// Return the plaintext of a possibly protected value.
///
/// Values without a prefix are returned unchanged. `ENC` values need a
/// password; a missing or wrong one is an error.
pub fn to_plaintext(value: &str, password: Option<&str>) -> Result<String> {
    if value.starts_with(OBF_PREFIX) {
        deobfuscate(value)
    } else if value.starts_with(ENC_PREFIX) {
        let password = password.ok_or(SecretError::PasswordRequired)?;
        decrypt(value, password)
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obfuscate_known_value() {
        // Same output as the classic servlet-container obfuscator.
        assert_eq!(obfuscate("password"), "OBF1v2j1uum1xtv1zej1zer1xtn1uvk1v1v");
    }

    #[test]
    fn test_obfuscate_roundtrip_text() {
        for plain in ["", "a", "secret", "p@ss w0rd!", "zażółć gęślą jaźń", "日本語"] {
            let hidden = obfuscate(plain);
            assert!(hidden.starts_with(OBF_PREFIX));
            assert_eq!((hidden.len() - 3) % 4, 0);
            assert_eq!(deobfuscate(&hidden).unwrap(), plain);
        }
    }

    #[test]
    fn test_obfuscate_every_byte_pair_decodes() {
        for b1 in 0..=255i64 {
            for b2 in [0i64, 1, 127, 128, 254, 255] {
                let i0 = (127 + b1 + b2) * 256 + 127 + b1 - b2;
                assert_eq!(decode_group(i0 as u32), Some(b1 as u8), "b1={b1} b2={b2}");
            }
        }
    }

    #[test]
    fn test_deobfuscate_rejects_garbage() {
        assert!(deobfuscate("OBFabc").is_err());
        assert!(deobfuscate("OBF!!!!").is_err());
        assert!(deobfuscate("OBF0000").is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let enc = encrypt("db-secret", "master").unwrap();
        assert!(enc.starts_with(ENC_PREFIX));
        assert_eq!(decrypt(&enc, "master").unwrap(), "db-secret");
    }

    #[test]
    fn test_encrypt_uses_fresh_salt() {
        let a = encrypt("same", "pw").unwrap();
        let b = encrypt("same", "pw").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_wrong_password_fails() {
        let enc = encrypt("db-secret", "right").unwrap();
        assert!(matches!(
            decrypt(&enc, "wrong"),
            Err(SecretError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_decrypt_malformed() {
        assert!(matches!(
            decrypt("ENCshort", "pw"),
            Err(SecretError::Malformed { .. })
        ));
    }

    #[test]
    fn test_to_plaintext_passthrough() {
        assert_eq!(to_plaintext("plain", None).unwrap(), "plain");
        assert_eq!(to_plaintext("", Some("pw")).unwrap(), "");
    }

    #[test]
    fn test_to_plaintext_dispatch() {
        let obf = obfuscate("hidden");
        assert_eq!(to_plaintext(&obf, None).unwrap(), "hidden");

        let enc = encrypt("hidden", "pw").unwrap();
        assert_eq!(to_plaintext(&enc, Some("pw")).unwrap(), "hidden");
        assert!(matches!(
            to_plaintext(&enc, None),
            Err(SecretError::PasswordRequired)
        ));
    }
}
