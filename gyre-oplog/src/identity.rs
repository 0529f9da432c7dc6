//! Writer identities.
//!
//! An identity binds a caller-chosen id to a public key through two
//! embedded signatures: one over the id, one over the hex public key. The
//! identity itself is content-addressed with the same dag-cbor/CID stack as
//! log entries, and the resulting hash is what entries embed in their
//! `identity` field.

use std::collections::BTreeMap;

use bytes::Bytes;
use libipld::cbor::DagCborCodec;
use libipld::codec::Codec;
use libipld::Ipld;

use crate::entry::content_id;
use crate::{Error, Keystore, Result};

/// Identity kind produced by the public-key provider.
pub const PROVIDER_PUBLICKEY: &str = "publickey";

/// The two signatures embedded in an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySignatures {
    /// Signature over the identity id.
    pub id: String,
    /// Signature over the hex public key.
    pub public_key: String,
}

/// A writer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Caller-chosen identity id.
    pub id: String,
    /// Hex `X || Y` public key.
    pub public_key: String,
    /// Content address of the canonical encoding.
    pub hash: String,
    /// Canonical encoded bytes.
    pub bytes: Bytes,
    /// Embedded signatures.
    pub signatures: IdentitySignatures,
    /// Provider kind, e.g. [`PROVIDER_PUBLICKEY`].
    pub kind: String,
}

impl Identity {
    /// Create an identity for `id`, generating a signing key in `keystore`
    /// if one does not exist yet.
    pub fn create(keystore: &Keystore, id: &str) -> Result<Identity> {
        if id.is_empty() {
            return Err(Error::InvalidArgument("identity id is required".into()));
        }
        if !keystore.has_key(id) {
            keystore.create_key(id)?;
        }
        let key = keystore.get_key(id)?;
        let public_key = Keystore::public_key_hex(&key)?;

        let id_sig = keystore.sign_message(id, id.as_bytes())?;
        let public_key_sig = keystore.sign_message(id, public_key.as_bytes())?;

        let mut identity = Identity {
            id: id.to_owned(),
            public_key,
            hash: String::new(),
            bytes: Bytes::new(),
            signatures: IdentitySignatures {
                id: id_sig,
                public_key: public_key_sig,
            },
            kind: PROVIDER_PUBLICKEY.to_owned(),
        };
        let (hash, bytes) = encode(&identity)?;
        identity.hash = hash;
        identity.bytes = bytes;
        Ok(identity)
    }

    /// Whether every field is populated.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.public_key.is_empty()
            && !self.hash.is_empty()
            && !self.bytes.is_empty()
            && !self.signatures.id.is_empty()
            && !self.signatures.public_key.is_empty()
            && !self.kind.is_empty()
    }

    /// Check shape and both embedded signatures.
    pub fn verify(&self) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::InvalidArgument(
                "identity is missing required fields".into(),
            ));
        }
        if !Keystore::verify_message(&self.public_key, self.id.as_bytes(), &self.signatures.id) {
            return Err(Error::InvalidSignature(format!("identity id of {}", self.id)));
        }
        if !Keystore::verify_message(
            &self.public_key,
            self.public_key.as_bytes(),
            &self.signatures.public_key,
        ) {
            return Err(Error::InvalidSignature(format!(
                "identity public key of {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Decode an identity from its canonical bytes.
    ///
    /// The hash and bytes fields are recomputed from the re-encoded form.
    pub fn decode(bytes: &[u8]) -> Result<Identity> {
        let ipld: Ipld = DagCborCodec.decode(bytes).map_err(Error::codec)?;
        let Ipld::StringMap(map) = ipld else {
            return Err(Error::Codec("identity: expected map".into()));
        };

        let signatures = match map.get("signatures") {
            Some(Ipld::StringMap(sigs)) => IdentitySignatures {
                id: require_str(sigs.get("id"), "signatures.id")?,
                public_key: require_str(sigs.get("publicKey"), "signatures.publicKey")?,
            },
            _ => return Err(Error::Codec("identity: missing signatures map".into())),
        };

        let mut identity = Identity {
            id: require_str(map.get("id"), "id")?,
            public_key: require_str(map.get("publicKey"), "publicKey")?,
            hash: String::new(),
            bytes: Bytes::new(),
            signatures,
            kind: require_str(map.get("type"), "type")?,
        };
        let (hash, bytes) = encode(&identity)?;
        identity.hash = hash;
        identity.bytes = bytes;
        Ok(identity)
    }
}

/// Canonical encoding of the identity record; returns `(hash, bytes)`.
fn encode(identity: &Identity) -> Result<(String, Bytes)> {
    let mut signatures = BTreeMap::new();
    signatures.insert(
        "id".to_owned(),
        Ipld::String(identity.signatures.id.clone()),
    );
    signatures.insert(
        "publicKey".to_owned(),
        Ipld::String(identity.signatures.public_key.clone()),
    );

    let mut map = BTreeMap::new();
    map.insert("id".to_owned(), Ipld::String(identity.id.clone()));
    map.insert(
        "publicKey".to_owned(),
        Ipld::String(identity.public_key.clone()),
    );
    map.insert("signatures".to_owned(), Ipld::StringMap(signatures));
    map.insert("type".to_owned(), Ipld::String(identity.kind.clone()));

    let bytes = DagCborCodec
        .encode(&Ipld::StringMap(map))
        .map_err(Error::codec)?;
    let (_, hash) = content_id(&bytes);
    Ok((hash, Bytes::from(bytes)))
}

fn require_str(value: Option<&Ipld>, field: &str) -> Result<String> {
    match value {
        Some(Ipld::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(Error::Codec(format!(
            "identity: invalid or missing field {field}"
        ))),
    }
}
