//! The AID codec: anonymization and trial decryption.
//!
//! A device turns its 8-byte UID into a 16-byte Anonymous ID (AID) by
//! appending a fresh 8-byte random nonce and encrypting the resulting single
//! AES block with its device key. There is no chaining and no padding: the
//! whole message is exactly one block, and freshness comes from the nonce.
//!
//! The server recovers the sender by trial decryption: decrypt the AID under
//! a candidate key and compare the first 8 bytes of the plaintext with the
//! candidate's UID. A random block matches a given UID with probability
//! 2^-64, which is the forgery/false-match bound of the scheme.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
pub use aes::Aes128;
use rand::RngCore;

use crate::constants::{AID_SIZE, KEY_SIZE, NONCE_SIZE, UID_SIZE};
use crate::types::{Aid, Uid};

pub type SecretKey = [u8; KEY_SIZE];

pub fn generate_key() -> SecretKey {
    let mut key = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_uid() -> Uid {
    let mut bytes = [0u8; UID_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    Uid(bytes)
}

/// Anonymize a UID under the device key. Every call draws a fresh nonce, so
/// two AIDs from the same device are unlinkable without the key.
pub fn anonymize(uid: &Uid, key: &SecretKey) -> Aid {
    let mut block = [0u8; AID_SIZE];
    block[..UID_SIZE].copy_from_slice(uid.as_bytes());
    rand::rngs::OsRng.fill_bytes(&mut block[UID_SIZE..UID_SIZE + NONCE_SIZE]);

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut ga = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut ga);

    let mut out = [0u8; AID_SIZE];
    out.copy_from_slice(&ga);
    Aid(out)
}

/// Build the decryption key schedule for a device key.
///
/// Key-schedule setup dominates the cost of a single-block trial decryption,
/// so callers keep the returned cipher alive for the lifetime of the key and
/// reuse it across attempts.
pub fn init_cipher(key: &SecretKey) -> Aes128 {
    Aes128::new(GenericArray::from_slice(key))
}

/// Decrypt an AID under a candidate key schedule. Never fails for well-formed
/// input; whether the result means anything is decided by [`matches`].
pub fn trial_decrypt(cipher: &Aes128, aid: &Aid) -> [u8; AID_SIZE] {
    let mut block = GenericArray::clone_from_slice(aid.as_bytes());
    cipher.decrypt_block(&mut block);

    let mut out = [0u8; AID_SIZE];
    out.copy_from_slice(&block);
    out
}

/// True iff the first 8 bytes of the plaintext equal the candidate UID. The
/// trailing 8 bytes are the decrypted nonce and are discarded.
pub fn matches(plaintext: &[u8; AID_SIZE], uid: &Uid) -> bool {
    plaintext[..UID_SIZE] == uid.as_bytes()[..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let uid = generate_uid();
        let key = generate_key();

        let aid = anonymize(&uid, &key);
        let cipher = init_cipher(&key);
        assert!(matches(&trial_decrypt(&cipher, &aid), &uid));
    }

    #[test]
    fn successive_aids_differ() {
        let uid = generate_uid();
        let key = generate_key();

        // Nonce collision probability is 2^-64; equal AIDs here would mean
        // the nonce is not being refreshed.
        assert_ne!(anonymize(&uid, &key), anonymize(&uid, &key));
    }

    #[test]
    fn wrong_key_does_not_match() {
        let uid = generate_uid();
        let key = generate_key();
        let other_key = generate_key();

        let aid = anonymize(&uid, &key);
        let cipher = init_cipher(&other_key);
        assert!(!matches(&trial_decrypt(&cipher, &aid), &uid));
    }

    #[test]
    fn wrong_uid_does_not_match() {
        let uid = generate_uid();
        let other = generate_uid();
        let key = generate_key();

        let aid = anonymize(&uid, &key);
        let cipher = init_cipher(&key);
        assert!(!matches(&trial_decrypt(&cipher, &aid), &other));
    }
}
