//! The codec's only door to cryptography.

use crate::keyring::Keyring;
use crate::message::EncType;
use crate::ProtocolError;

/// Protects an outgoing payload.
pub trait Encrypter {
    fn encrypt(&self, payload: &[u8], enc_type: EncType) -> Result<Vec<u8>, ProtocolError>;
}

/// Opens an incoming payload.
///
/// The returned key id is `Some` only when a signature was verified
/// against a known key.
pub trait Decrypter {
    fn decrypt(
        &self,
        payload: &[u8],
        enc_type: EncType,
    ) -> Result<(Vec<u8>, Option<String>), ProtocolError>;
}

/// Pass-through gateway: bytes in, same bytes out, nobody signed.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityGateway;

impl Encrypter for IdentityGateway {
    fn encrypt(&self, payload: &[u8], enc_type: EncType) -> Result<Vec<u8>, ProtocolError> {
        match enc_type {
            EncType::None | EncType::Asymmetric => Ok(payload.to_vec()),
            other => Err(ProtocolError::Crypto(format!("cannot encrypt as {other:?}"))),
        }
    }
}

impl Decrypter for IdentityGateway {
    fn decrypt(
        &self,
        payload: &[u8],
        _enc_type: EncType,
    ) -> Result<(Vec<u8>, Option<String>), ProtocolError> {
        Ok((payload.to_vec(), None))
    }
}

/// Encrypts for one recipient key and signs with ours.
pub struct KeyringEncrypter<'a> {
    keyring: &'a dyn Keyring,
    recipient_key_id: &'a str,
}

impl<'a> KeyringEncrypter<'a> {
    pub fn new(keyring: &'a dyn Keyring, recipient_key_id: &'a str) -> Self {
        Self {
            keyring,
            recipient_key_id,
        }
    }
}

impl Encrypter for KeyringEncrypter<'_> {
    fn encrypt(&self, payload: &[u8], enc_type: EncType) -> Result<Vec<u8>, ProtocolError> {
        match enc_type {
            EncType::None => Ok(payload.to_vec()),
            EncType::Asymmetric => {
                let own = self.keyring.own_key_id();
                self.keyring
                    .encrypt_and_sign(payload, self.recipient_key_id, &own)
            }
            EncType::Relay => Err(ProtocolError::Crypto(
                "relay parcels are signed, not encrypted".into(),
            )),
        }
    }
}

/// Decrypts with our private key and checks signatures.
pub struct KeyringDecrypter<'a> {
    keyring: &'a dyn Keyring,
}

impl<'a> KeyringDecrypter<'a> {
    pub fn new(keyring: &'a dyn Keyring) -> Self {
        Self { keyring }
    }
}

impl Decrypter for KeyringDecrypter<'_> {
    fn decrypt(
        &self,
        payload: &[u8],
        enc_type: EncType,
    ) -> Result<(Vec<u8>, Option<String>), ProtocolError> {
        let (plain, signer) = match enc_type {
            EncType::None => return Ok((payload.to_vec(), None)),
            EncType::Asymmetric => self.keyring.decrypt_and_check_signature(payload),
            EncType::Relay => self.keyring.verify_signed_data(payload),
        };
        plain
            .map(|p| (p, signer))
            .ok_or_else(|| ProtocolError::Crypto(format!("cannot open {enc_type:?} payload")))
    }
}
