//! Sealed boxes for the keyring.
//!
//! Ephemeral X25519 Diffie-Hellman + HKDF-SHA256 + XChaCha20-Poly1305.
//! Recipients are addressed by their Ed25519 identity key, converted to
//! X25519 with the Edwards→Montgomery map.
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::ProtocolError;

const HKDF_INFO: &[u8] = b"murmeli-sealed-box-xchacha20poly1305-v1";

/// Ciphertext plus what the recipient needs to rebuild the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 24],
    pub ephemeral_pk: [u8; 32],
}

fn to_x25519_public(ed25519_pk: &[u8; 32]) -> Result<[u8; 32], ProtocolError> {
    CompressedEdwardsY(*ed25519_pk)
        .decompress()
        .map(|point| point.to_montgomery().to_bytes())
        .ok_or_else(|| ProtocolError::Crypto("invalid Ed25519 public key".into()))
}

/// SHA-512 of the seed, first half, clamped (libsodium's sk_to_curve25519).
fn to_x25519_secret(ed25519_seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(ed25519_seed);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&hash[..32]);
    secret[0] &= 248;
    secret[31] &= 127;
    secret[31] |= 64;
    secret
}

fn cipher_for(shared_secret: &[u8; 32]) -> XChaCha20Poly1305 {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
    XChaCha20Poly1305::new(&key.into())
}

pub(crate) fn seal(plaintext: &[u8], recipient_pk: &[u8; 32]) -> Result<SealedBox, ProtocolError> {
    use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

    let recipient = X25519PublicKey::from(to_x25519_public(recipient_pk)?);
    let ephemeral_secret = X25519Secret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
    let cipher = cipher_for(ephemeral_secret.diffie_hellman(&recipient).as_bytes());

    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(&XNonce::from(nonce), plaintext)
        .map_err(|e| ProtocolError::Crypto(format!("encryption failed: {e}")))?;

    Ok(SealedBox {
        ciphertext,
        nonce,
        ephemeral_pk: ephemeral_public.to_bytes(),
    })
}

pub(crate) fn open(sealed: &SealedBox, recipient_seed: &[u8; 32]) -> Result<Vec<u8>, ProtocolError> {
    let secret = X25519Secret::from(to_x25519_secret(recipient_seed));
    let ephemeral = X25519PublicKey::from(sealed.ephemeral_pk);
    let cipher = cipher_for(secret.diffie_hellman(&ephemeral).as_bytes());
    cipher
        .decrypt(&XNonce::from(sealed.nonce), sealed.ciphertext.as_ref())
        .map_err(|_| ProtocolError::Crypto("decryption failed: authentication error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn keypair(seed: u8) -> ([u8; 32], [u8; 32]) {
        let sk = SigningKey::from_bytes(&[seed; 32]);
        (sk.to_bytes(), sk.verifying_key().to_bytes())
    }

    #[test]
    fn seal_open_roundtrip() {
        let (sk, pk) = keypair(7);
        let sealed = seal(b"hello murmeli", &pk).unwrap();
        assert_eq!(open(&sealed, &sk).unwrap(), b"hello murmeli");
    }

    #[test]
    fn fresh_ephemeral_per_message() {
        let (_, pk) = keypair(7);
        let a = seal(b"same", &pk).unwrap();
        let b = seal(b"same", &pk).unwrap();
        assert_ne!(a.ephemeral_pk, b.ephemeral_pk);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (sk, pk) = keypair(7);
        let mut sealed = seal(b"hello", &pk).unwrap();
        sealed.ciphertext[0] ^= 1;
        assert!(open(&sealed, &sk).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let (_, pk) = keypair(7);
        let (other_sk, _) = keypair(8);
        let sealed = seal(b"hello", &pk).unwrap();
        assert!(open(&sealed, &other_sk).is_err());
    }
}
