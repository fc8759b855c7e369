//! Low-level cryptographic operations.
//!
//! This module and `keys` are the only two places in the crate that import
//! `ring` directly. Everything else encrypts, decrypts and hashes through
//! the functions exposed here or through `engine::Encryptor`.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit (12 bytes), fresh per operation via `SystemRandom`
//! - **Tag**: 128-bit (16 bytes)
//! - **Blind index**: SHA-256, unkeyed
//!
//! # Stored format
//! ```text
//! hex( nonce (12 bytes) || tag (16 bytes) || ciphertext )
//! ```
//! There is no algorithm or version byte. Changing the cipher means a
//! migration of every stored value.

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{ImmoguardError, Result};

const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Size of a derived key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Number of random bytes in a principal salt before hex encoding.
pub const SALT_LEN: usize = 24;

/// A nonce generated for a single encryption operation.
/// Newtype so a nonce is consumed by the seal that uses it.
struct OwnedNonce(Nonce);

fn generate_nonce() -> Result<OwnedNonce> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf).map_err(|_| ImmoguardError::RandomnessFailure)?;
    Ok(OwnedNonce(Nonce::assume_unique_for_key(buf)))
}

fn aead_key(key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| ImmoguardError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt a UTF-8 string with AES-256-GCM and return the hex envelope.
pub fn encrypt(key_bytes: &[u8; KEY_LEN], plaintext: &str) -> Result<String> {
    let key = aead_key(key_bytes)?;
    let nonce = generate_nonce()?;
    let nonce_bytes: [u8; NONCE_LEN] = *nonce.0.as_ref();

    let mut in_out = plaintext.as_bytes().to_vec();
    let tag = key
        .seal_in_place_separate_tag(nonce.0, aead::Aad::empty(), &mut in_out)
        .map_err(|_| ImmoguardError::EncryptionFailure)?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + TAG_LEN + in_out.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(tag.as_ref());
    envelope.extend_from_slice(&in_out);

    Ok(hex::encode(envelope))
}

/// Decrypt a hex envelope produced by [`encrypt`].
///
/// Wrong key, a flipped bit anywhere in the nonce, tag or ciphertext, bad
/// hex, truncated input and non-UTF-8 output all fail with
/// `DecryptionFailed`. No partial plaintext is ever returned.
pub fn decrypt(key_bytes: &[u8; KEY_LEN], envelope_hex: &str) -> Result<String> {
    let envelope = hex::decode(envelope_hex).map_err(|_| ImmoguardError::DecryptionFailed)?;
    if envelope.len() < NONCE_LEN + TAG_LEN {
        return Err(ImmoguardError::DecryptionFailed);
    }

    let (nonce_bytes, rest) = envelope.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes
        .try_into()
        .map_err(|_| ImmoguardError::DecryptionFailed)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let key = aead_key(key_bytes)?;

    // `ring` expects the tag appended to the ciphertext.
    let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext = key
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| ImmoguardError::DecryptionFailed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| ImmoguardError::DecryptionFailed)
}

/// Deterministic blind index of a plaintext: lowercase hex SHA-256.
///
/// Unkeyed on purpose so the same value hashes identically for every
/// principal. Not a substitute for encryption.
pub fn hash(plaintext: &str) -> String {
    hex::encode(digest::digest(&digest::SHA256, plaintext.as_bytes()))
}

/// Generate a fresh principal salt (24 random bytes, hex encoded).
pub fn generate_salt() -> Result<String> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; SALT_LEN];
    rng.fill(&mut buf).map_err(|_| ImmoguardError::RandomnessFailure)?;
    Ok(hex::encode(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [7u8; KEY_LEN];

    #[test]
    fn roundtrip() {
        let sealed = encrypt(&KEY, "Jean Dupont").unwrap();
        assert_ne!(sealed, "Jean Dupont");
        assert_eq!(decrypt(&KEY, &sealed).unwrap(), "Jean Dupont");
    }

    #[test]
    fn envelope_layout() {
        let sealed = encrypt(&KEY, "abc").unwrap();
        // nonce + tag + 3 bytes, two hex chars per byte
        assert_eq!(sealed.len(), (NONCE_LEN + TAG_LEN + 3) * 2);
    }

    #[test]
    fn fresh_nonce_per_call() {
        let a = encrypt(&KEY, "same").unwrap();
        let b = encrypt(&KEY, "same").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..NONCE_LEN * 2], b[..NONCE_LEN * 2]);
    }

    #[test]
    fn empty_plaintext_still_authenticated() {
        let sealed = encrypt(&KEY, "").unwrap();
        assert_eq!(decrypt(&KEY, &sealed).unwrap(), "");
        assert!(decrypt(&[8u8; KEY_LEN], &sealed).is_err());
    }

    #[test]
    fn rejects_short_and_non_hex_input() {
        assert!(matches!(decrypt(&KEY, "abcd"), Err(ImmoguardError::DecryptionFailed)));
        assert!(matches!(decrypt(&KEY, "zz-not-hex"), Err(ImmoguardError::DecryptionFailed)));
        assert!(matches!(decrypt(&KEY, ""), Err(ImmoguardError::DecryptionFailed)));
    }

    #[test]
    fn hash_is_stable_sha256() {
        assert_eq!(hash("IFU-123"), hash("IFU-123"));
        assert_ne!(hash("IFU-123"), hash("IFU-999"));
        assert_eq!(
            hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn salts_are_random_hex() {
        let a = generate_salt().unwrap();
        let b = generate_salt().unwrap();
        assert_eq!(a.len(), SALT_LEN * 2);
        assert!(hex::decode(&a).is_ok());
        assert_ne!(a, b);
    }
}
