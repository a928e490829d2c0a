//! Key management: the interface the protocol needs, and a local
//! Ed25519 implementation of it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{self, SealedBox};
use crate::ProtocolError;

/// Prefix of an exported public key.
pub const PUBLIC_KEY_PREFIX: &str = "murmeli-ed25519:";

/// What the protocol needs from a keyring.
///
/// Signer ids are reported only for signatures that verified against a
/// key we already know.
pub trait Keyring: Send + Sync {
    fn own_key_id(&self) -> String;

    /// Our public key in exportable text form.
    fn export_public_key(&self) -> String;

    /// Learn a public key; returns its key id, or `None` if unparsable.
    fn import_public_key(&self, exported: &str) -> Option<String>;

    fn public_key(&self, key_id: &str) -> Option<String>;

    fn encrypt_and_sign(
        &self,
        data: &[u8],
        recipient_key_id: &str,
        own_key_id: &str,
    ) -> Result<Vec<u8>, ProtocolError>;

    fn decrypt_and_check_signature(&self, data: &[u8]) -> (Option<Vec<u8>>, Option<String>);

    fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError>;

    fn verify_signed_data(&self, data: &[u8]) -> (Option<Vec<u8>>, Option<String>);
}

/// Data with a detached signature and the signer's key id.
#[derive(Serialize, Deserialize)]
struct SignedBlob {
    signer: String,
    #[serde(with = "serde_bytes_vec")]
    signature: Vec<u8>,
    #[serde(with = "serde_bytes_vec")]
    data: Vec<u8>,
}

/// Key id for a verifying key: upper-case hex of the first 8 bytes of
/// SHA-256 over the key.
pub fn key_id_for(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode_upper(&digest[..8])
}

fn parse_public_key(exported: &str) -> Option<VerifyingKey> {
    let hex_part = exported.trim().strip_prefix(PUBLIC_KEY_PREFIX)?;
    let bytes: [u8; 32] = hex::decode(hex_part).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn export(key: &VerifyingKey) -> String {
    format!("{PUBLIC_KEY_PREFIX}{}", hex::encode(key.as_bytes()))
}

/// On-disk form of a [`LocalKeyring`].
#[derive(Serialize, Deserialize)]
struct KeyringFile {
    seed: String,
    known: BTreeMap<String, String>,
}

/// Ed25519 keyring held in memory, optionally saved as JSON.
pub struct LocalKeyring {
    signing: SigningKey,
    own_id: String,
    known: Mutex<BTreeMap<String, VerifyingKey>>,
}

impl LocalKeyring {
    /// Fresh random identity.
    pub fn generate() -> Self {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let verifying = signing.verifying_key();
        let own_id = key_id_for(&verifying);
        let mut known = BTreeMap::new();
        known.insert(own_id.clone(), verifying);
        Self {
            signing,
            own_id,
            known: Mutex::new(known),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ProtocolError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Crypto(format!("read {}: {e}", path.display())))?;
        let file: KeyringFile = serde_json::from_str(&text)?;
        let seed: [u8; 32] = hex::decode(&file.seed)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ProtocolError::Crypto("corrupt keyring seed".into()))?;

        let keyring = Self::from_seed(seed);
        for (id, exported) in file.known {
            match keyring.import_public_key(&exported) {
                Some(imported) if imported == id => {}
                _ => tracing::warn!(key_id = %id, "skipping corrupt keyring entry"),
            }
        }
        Ok(keyring)
    }

    pub fn save(&self, path: &Path) -> Result<(), ProtocolError> {
        let file = KeyringFile {
            seed: hex::encode(self.signing.to_bytes()),
            known: self
                .known()
                .iter()
                .map(|(id, key)| (id.clone(), export(key)))
                .collect(),
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| ProtocolError::Crypto(format!("write {}: {e}", path.display())))
    }

    fn known(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, VerifyingKey>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signed_blob(&self, data: &[u8]) -> SignedBlob {
        SignedBlob {
            signer: self.own_id.clone(),
            signature: self.signing.sign(data).to_bytes().to_vec(),
            data: data.to_vec(),
        }
    }

    /// Signer id if `blob` carries a valid signature from a known key.
    fn check(&self, blob: &SignedBlob) -> Option<String> {
        let signature = Signature::from_slice(&blob.signature).ok()?;
        let key = *self.known().get(&blob.signer)?;
        key.verify(&blob.data, &signature).ok()?;
        Some(blob.signer.clone())
    }
}

impl Keyring for LocalKeyring {
    fn own_key_id(&self) -> String {
        self.own_id.clone()
    }

    fn export_public_key(&self) -> String {
        export(&self.signing.verifying_key())
    }

    fn import_public_key(&self, exported: &str) -> Option<String> {
        let key = parse_public_key(exported)?;
        let id = key_id_for(&key);
        self.known().insert(id.clone(), key);
        Some(id)
    }

    fn public_key(&self, key_id: &str) -> Option<String> {
        self.known().get(key_id).map(export)
    }

    fn encrypt_and_sign(
        &self,
        data: &[u8],
        recipient_key_id: &str,
        own_key_id: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        if own_key_id != self.own_id {
            return Err(ProtocolError::Crypto(format!(
                "no private key for {own_key_id}"
            )));
        }
        let recipient = *self
            .known()
            .get(recipient_key_id)
            .ok_or_else(|| ProtocolError::Crypto(format!("unknown recipient key {recipient_key_id}")))?;

        let signed = rmp_serde::to_vec(&self.signed_blob(data))?;
        let sealed = crypto::seal(&signed, recipient.as_bytes())?;
        Ok(rmp_serde::to_vec(&sealed)?)
    }

    fn decrypt_and_check_signature(&self, data: &[u8]) -> (Option<Vec<u8>>, Option<String>) {
        let Ok(sealed) = rmp_serde::from_slice::<SealedBox>(data) else {
            return (None, None);
        };
        let Ok(signed) = crypto::open(&sealed, &self.signing.to_bytes()) else {
            return (None, None);
        };
        let Ok(blob) = rmp_serde::from_slice::<SignedBlob>(&signed) else {
            return (None, None);
        };
        let signer = self.check(&blob);
        (Some(blob.data), signer)
    }

    fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec(&self.signed_blob(data))?)
    }

    fn verify_signed_data(&self, data: &[u8]) -> (Option<Vec<u8>>, Option<String>) {
        match rmp_serde::from_slice::<SignedBlob>(data) {
            Ok(blob) => {
                let signer = self.check(&blob);
                (Some(blob.data), signer)
            }
            Err(_) => (None, None),
        }
    }
}

/// MessagePack bin encoding for byte vectors.
mod serde_bytes_vec {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a byte array")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
                Ok(v)
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
                let mut out = Vec::new();
                while let Some(b) = seq.next_element::<u8>()? {
                    out.push(b);
                }
                Ok(out)
            }
        }

        d.deserialize_bytes(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_shape() {
        let k = LocalKeyring::from_seed([9; 32]);
        let id = k.own_key_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn export_import_yields_same_id() {
        let a = LocalKeyring::from_seed([1; 32]);
        let b = LocalKeyring::from_seed([2; 32]);
        let exported = a.export_public_key();
        assert!(exported.starts_with(PUBLIC_KEY_PREFIX));
        assert_eq!(b.import_public_key(&exported), Some(a.own_key_id()));
        assert_eq!(b.public_key(&a.own_key_id()), Some(exported));
    }

    #[test]
    fn import_rejects_garbage() {
        let k = LocalKeyring::from_seed([1; 32]);
        assert_eq!(k.import_public_key("nope"), None);
        assert_eq!(k.import_public_key("murmeli-ed25519:abcd"), None);
    }

    #[test]
    fn unknown_signer_is_not_reported() {
        let b = LocalKeyring::from_seed([2; 32]);
        let c = LocalKeyring::from_seed([3; 32]);
        let b_id = c.import_public_key(&b.export_public_key()).unwrap();

        // b never imported c's key.
        let sealed = c.encrypt_and_sign(b"hi", &b_id, &c.own_key_id()).unwrap();
        let (plain, signer) = b.decrypt_and_check_signature(&sealed);
        assert_eq!(plain.as_deref(), Some(&b"hi"[..]));
        assert_eq!(signer, None);
    }

    #[test]
    fn encrypt_needs_known_recipient_and_own_key() {
        let a = LocalKeyring::from_seed([1; 32]);
        assert!(a.encrypt_and_sign(b"x", "DEADBEEFDEADBEEF", &a.own_key_id()).is_err());
        assert!(a.encrypt_and_sign(b"x", &a.own_key_id(), "DEADBEEFDEADBEEF").is_err());
    }

    #[test]
    fn tampered_signed_data_loses_signer() {
        let a = LocalKeyring::from_seed([1; 32]);
        let signed = a.sign_data(b"parcel").unwrap();
        let (_, signer) = a.verify_signed_data(&signed);
        assert_eq!(signer, Some(a.own_key_id()));

        let mut blob: SignedBlob = rmp_serde::from_slice(&signed).unwrap();
        blob.data = b"other".to_vec();
        let forged = rmp_serde::to_vec(&blob).unwrap();
        let (data, signer) = a.verify_signed_data(&forged);
        assert_eq!(data.as_deref(), Some(&b"other"[..]));
        assert_eq!(signer, None);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyring.json");
        let a = LocalKeyring::from_seed([1; 32]);
        let b = LocalKeyring::from_seed([2; 32]);
        let b_id = a.import_public_key(&b.export_public_key()).unwrap();
        a.save(&path).unwrap();

        let loaded = LocalKeyring::load(&path).unwrap();
        assert_eq!(loaded.own_key_id(), a.own_key_id());
        assert!(loaded.public_key(&b_id).is_some());
    }
}
