//! Key management backed by a [`Storage`] adapter.
//!
//! Signatures are ECDSA on P-256 over the SHA-256 digest of the message,
//! serialized as hex of the fixed-width `r || s` big-endian pair. Public
//! keys travel as hex of the uncompressed `X || Y` affine coordinates.

use std::sync::Arc;

use bytes::Bytes;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};
use parking_lot::Mutex;
use rand_core::OsRng;

use gyre_store::{MemoryStore, Storage, StoreError};

use crate::{Error, Result};

const KEY_PREFIX: &str = "private_";

/// Keystore holding one signing key per identity id.
///
/// Private scalars are stored hex-encoded in the backing store under
/// `private_<id>`. Mutating operations hold an exclusive lock.
#[derive(Debug, Clone)]
pub struct Keystore {
    storage: Arc<dyn Storage>,
    lock: Arc<Mutex<()>>,
}

impl Keystore {
    /// Create a keystore over the given backing store.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a keystore over a fresh in-memory store.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Generate and store a new signing key for `id`.
    ///
    /// Fails if a key already exists for this id.
    pub fn create_key(&self, id: &str) -> Result<SigningKey> {
        let _guard = self.lock.lock();
        if self.has_key_inner(id) {
            return Err(Error::InvalidArgument(format!(
                "key already exists for id {id}"
            )));
        }
        let key = SigningKey::random(&mut OsRng);
        self.put_key(id, &key)?;
        Ok(key)
    }

    /// Whether a key exists for `id`.
    pub fn has_key(&self, id: &str) -> bool {
        let _guard = self.lock.lock();
        self.has_key_inner(id)
    }

    /// Store an externally generated key under `id`.
    ///
    /// Fails if a key already exists for this id.
    pub fn add_key(&self, id: &str, key: SigningKey) -> Result<()> {
        let _guard = self.lock.lock();
        if self.has_key_inner(id) {
            return Err(Error::InvalidArgument(format!(
                "key already exists for id {id}"
            )));
        }
        self.put_key(id, &key)
    }

    /// Retrieve the signing key for `id`.
    pub fn get_key(&self, id: &str) -> Result<SigningKey> {
        let _guard = self.lock.lock();
        self.get_key_inner(id)
    }

    /// Sign `data` with the key stored for `id`.
    ///
    /// Returns the hex-encoded `r || s` signature.
    pub fn sign_message(&self, id: &str, data: &[u8]) -> Result<String> {
        let key = self.get_key(id)?;
        let sig: Signature = key.sign(data);
        Ok(hex::encode(sig.to_bytes()))
    }

    /// Verify a hex signature over `data` against a hex `X || Y` public key.
    pub fn verify_message(public_key_hex: &str, data: &[u8], sig_hex: &str) -> bool {
        let Ok(pk) = hex::decode(public_key_hex) else {
            return false;
        };
        if pk.len() != 64 {
            return false;
        }
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&pk[..32]),
            FieldBytes::from_slice(&pk[32..]),
            false,
        );
        let Ok(verifying_key) = VerifyingKey::from_encoded_point(&point) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(sig_hex) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        verifying_key.verify(data, &sig).is_ok()
    }

    /// Hex `X || Y` presentation of a key's public half.
    pub fn public_key_hex(key: &SigningKey) -> Result<String> {
        let point = key.verifying_key().to_encoded_point(false);
        match (point.x(), point.y()) {
            (Some(x), Some(y)) => Ok(format!("{}{}", hex::encode(x), hex::encode(y))),
            _ => Err(Error::Codec("public key is not an affine point".into())),
        }
    }

    /// Remove all keys.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.storage.clear()?;
        Ok(())
    }

    fn has_key_inner(&self, id: &str) -> bool {
        self.storage.get(&storage_key(id)).is_ok()
    }

    fn get_key_inner(&self, id: &str) -> Result<SigningKey> {
        let raw = match self.storage.get(&storage_key(id)) {
            Ok(raw) => raw,
            Err(StoreError::NotFound(_)) => return Err(Error::NotFound(format!("key for {id}"))),
            Err(err) => return Err(err.into()),
        };
        let scalar = hex::decode(&raw).map_err(Error::codec)?;
        SigningKey::from_slice(&scalar).map_err(Error::codec)
    }

    fn put_key(&self, id: &str, key: &SigningKey) -> Result<()> {
        let scalar = hex::encode(key.to_bytes());
        self.storage
            .put(&storage_key(id), Bytes::from(scalar.into_bytes()))?;
        Ok(())
    }
}

fn storage_key(id: &str) -> String {
    format!("{KEY_PREFIX}{id}")
}
