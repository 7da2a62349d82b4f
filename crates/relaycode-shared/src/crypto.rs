use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};

use crate::constants::{AES_KEY_SIZE, GCM_NONCE_SIZE, SESSION_PREFIX_SIZE};
use crate::error::CryptoError;

pub type SessionKey = [u8; AES_KEY_SIZE];

pub fn generate_session_key() -> SessionKey {
    let mut key = [0u8; AES_KEY_SIZE];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);
    key
}

/// Which side of a session a sender is. Determines its IV session prefix
/// deterministically rather than drawing it at random, so the two senders'
/// IV spaces can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRole {
    Initiator,
    Joiner,
}

impl SenderRole {
    fn session_prefix(self) -> [u8; SESSION_PREFIX_SIZE] {
        match self {
            SenderRole::Initiator => [0x00, 0x00, 0x00, 0x00],
            SenderRole::Joiner => [0x00, 0x00, 0x00, 0x01],
        }
    }
}

/// Builds never-reused IVs for one sender: `session_prefix || counter`,
/// with `counter` strictly increasing for the lifetime of the key.
#[derive(Debug)]
pub struct IvSequence {
    prefix: [u8; SESSION_PREFIX_SIZE],
    counter: u64,
}

impl IvSequence {
    pub fn new(role: SenderRole) -> Self {
        Self {
            prefix: role.session_prefix(),
            counter: 0,
        }
    }

    /// Returns the next IV and advances the counter. Never reuses a value.
    pub fn next_iv(&mut self) -> Result<[u8; GCM_NONCE_SIZE], CryptoError> {
        let counter = self.counter;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterExhausted)?;

        let mut iv = [0u8; GCM_NONCE_SIZE];
        iv[..SESSION_PREFIX_SIZE].copy_from_slice(&self.prefix);
        iv[SESSION_PREFIX_SIZE..].copy_from_slice(&counter.to_be_bytes());
        Ok(iv)
    }
}

/// Encrypts one plaintext chunk with AES-256-GCM under the given key and IV.
/// No associated data; the 16-byte GCM tag is appended to the ciphertext.
pub fn encrypt_chunk(
    key: &SessionKey,
    iv: &[u8; GCM_NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypts one chunk. A GCM authentication failure (tampering, corruption,
/// or wrong key) surfaces as `CryptoError::DecryptionFailed`.
pub fn decrypt_chunk(
    key: &SessionKey,
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != GCM_NONCE_SIZE {
        return Err(CryptoError::InvalidIvLength {
            expected: GCM_NONCE_SIZE,
            actual: iv.len(),
        });
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = generate_session_key();
        let mut ivs = IvSequence::new(SenderRole::Initiator);
        let iv = ivs.next_iv().unwrap();
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let ciphertext = encrypt_chunk(&key, &iv, plaintext).unwrap();
        let decrypted = decrypt_chunk(&key, &iv, &ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = generate_session_key();
        let key2 = generate_session_key();
        let mut ivs = IvSequence::new(SenderRole::Initiator);
        let iv = ivs.next_iv().unwrap();

        let ciphertext = encrypt_chunk(&key1, &iv, b"secret").unwrap();
        assert!(decrypt_chunk(&key2, &iv, &ciphertext).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_session_key();
        let mut ivs = IvSequence::new(SenderRole::Initiator);
        let iv = ivs.next_iv().unwrap();

        let mut ciphertext = encrypt_chunk(&key, &iv, b"important data").unwrap();
        let len = ciphertext.len();
        ciphertext[len - 1] ^= 0xFF;

        assert!(decrypt_chunk(&key, &iv, &ciphertext).is_err());
    }

    #[test]
    fn iv_sequence_never_repeats_and_is_contiguous() {
        let mut ivs = IvSequence::new(SenderRole::Joiner);
        let first = ivs.next_iv().unwrap();
        let second = ivs.next_iv().unwrap();
        let third = ivs.next_iv().unwrap();

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(&first[..4], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&first[4..], &0u64.to_be_bytes());
        assert_eq!(&second[4..], &1u64.to_be_bytes());
        assert_eq!(&third[4..], &2u64.to_be_bytes());
    }

    #[test]
    fn initiator_and_joiner_prefixes_never_collide() {
        let initiator_prefix = SenderRole::Initiator.session_prefix();
        let joiner_prefix = SenderRole::Joiner.session_prefix();
        assert_ne!(initiator_prefix, joiner_prefix);
    }
}
