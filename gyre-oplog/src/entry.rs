//! Canonical entry encoding, content addressing, and signature binding.
//!
//! An entry is encoded as a strict dag-cbor map of nine fields. The encoding
//! is deterministic: map keys are emitted in canonical dag-cbor order and
//! the `next`/`refs` lists are pre-sorted, so identical field values produce
//! byte-identical output on every replica. The entry's address is the
//! base58btc string of a CIDv1 (dag-cbor codec, sha2-256) over those bytes.
//!
//! The signature covers the encoding of the entry with `key`, `identity`,
//! and `sig` set to the empty string; the final encoding (with those fields
//! populated) is what gets hashed and stored.

use std::collections::BTreeMap;

use bytes::Bytes;
use cid::multihash::{Code, MultihashDigest};
use cid::Cid;
use derive_more::Deref;
use libipld::cbor::DagCborCodec;
use libipld::codec::Codec;
use libipld::Ipld;
use multibase::Base;

use crate::{Error, Identity, Keystore, LamportClock, Result};

/// Entry format version.
pub const ENTRY_VERSION: u64 = 2;

/// Multicodec code for dag-cbor, the codec tag carried in entry CIDs.
const DAG_CBOR: u64 = 0x71;

/// A single record of the operation log.
///
/// `next` holds the hashes of the immediate causal predecessors at write
/// time, `refs` optional extra back-references for skip traversal. `key` is
/// the writer's public key (hex), `identity` the writer's identity hash, and
/// `sig` the hex signature over the canonical encoding without those three
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub payload: String,
    pub next: Vec<String>,
    pub refs: Vec<String>,
    pub clock: LamportClock,
    pub v: u64,
    pub key: String,
    pub identity: String,
    pub sig: String,
}

impl Entry {
    /// Create, sign, and encode a new entry.
    ///
    /// `next` and `refs` are sorted and deduplicated. The signing key for
    /// `identity.id` must exist in `keystore`.
    pub fn create(
        keystore: &Keystore,
        identity: &Identity,
        id: &str,
        payload: &str,
        clock: LamportClock,
        next: Vec<String>,
        refs: Vec<String>,
    ) -> Result<EncodedEntry> {
        if id.is_empty() || payload.is_empty() {
            return Err(Error::InvalidArgument(
                "entry requires an id and payload".into(),
            ));
        }
        if !identity.is_valid() {
            return Err(Error::InvalidArgument("valid identity is required".into()));
        }

        let mut next = next;
        next.sort_unstable();
        next.dedup();
        let mut refs = refs;
        refs.sort_unstable();
        refs.dedup();

        let mut entry = Entry {
            id: id.to_owned(),
            payload: payload.to_owned(),
            next,
            refs,
            clock,
            v: ENTRY_VERSION,
            key: String::new(),
            identity: String::new(),
            sig: String::new(),
        };

        let signable = encode_bytes(&entry)?;
        let sig = keystore.sign_message(&identity.id, &signable)?;

        entry.key = identity.public_key.clone();
        entry.identity = identity.hash.clone();
        entry.sig = sig;

        entry.encode()
    }

    /// Encode into the canonical form, deriving CID and hash.
    pub fn encode(self) -> Result<EncodedEntry> {
        let bytes = encode_bytes(&self)?;
        let (cid, hash) = content_id(&bytes);
        Ok(EncodedEntry {
            entry: self,
            bytes: Bytes::from(bytes),
            cid,
            hash,
        })
    }

    /// Whether the entry has the shape of a well-formed log record.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.payload.is_empty()
            && !self.clock.id().is_empty()
            && self.clock.time() >= 1
    }
}

/// An [`Entry`] together with its canonical bytes, CID, and hash.
///
/// Equality is content-address equality: two encoded entries are equal iff
/// they have the same hash, which holds iff their canonical encodings are
/// byte-identical.
#[derive(Debug, Clone, Deref)]
pub struct EncodedEntry {
    #[deref]
    entry: Entry,
    bytes: Bytes,
    cid: Cid,
    hash: String,
}

impl EncodedEntry {
    /// Decode an entry from its canonical bytes.
    ///
    /// The hash and CID are recomputed from the input bytes. Fails with a
    /// codec error on malformed input and with
    /// [`Error::UnsupportedVersion`] if the version field is not
    /// [`ENTRY_VERSION`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let ipld: Ipld = DagCborCodec.decode(bytes).map_err(Error::codec)?;
        let map = as_map(&ipld)?;

        let v = get_u64(map, "v")?;
        if v != ENTRY_VERSION {
            return Err(Error::UnsupportedVersion(v));
        }

        let clock_ipld = map
            .get("clock")
            .ok_or_else(|| Error::Codec("missing field clock".into()))?;
        let clock_map = as_map(clock_ipld)?;
        let clock = LamportClock::new(get_str(clock_map, "id")?, get_u64(clock_map, "time")?);

        let entry = Entry {
            id: get_str(map, "id")?,
            payload: get_str(map, "payload")?,
            next: get_str_list(map, "next")?,
            refs: get_str_list(map, "refs")?,
            clock,
            v,
            key: get_str(map, "key")?,
            identity: get_str(map, "identity")?,
            sig: get_str(map, "sig")?,
        };

        let (cid, hash) = content_id(bytes);
        Ok(EncodedEntry {
            entry,
            bytes: Bytes::copy_from_slice(bytes),
            cid,
            hash,
        })
    }

    /// Verify the signature against the entry's embedded public key.
    pub fn verify(&self) -> Result<()> {
        let signable = Entry {
            key: String::new(),
            identity: String::new(),
            sig: String::new(),
            ..self.entry.clone()
        };
        let bytes = encode_bytes(&signable)?;
        if Keystore::verify_message(&self.entry.key, &bytes, &self.entry.sig) {
            Ok(())
        } else {
            Err(Error::InvalidSignature(self.hash.clone()))
        }
    }

    /// The decoded entry fields.
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// The canonical encoded bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// The CID over the canonical bytes.
    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// The base58btc content address.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl PartialEq for EncodedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for EncodedEntry {}

fn encode_bytes(entry: &Entry) -> Result<Vec<u8>> {
    let mut clock = BTreeMap::new();
    clock.insert("id".to_owned(), Ipld::String(entry.clock.id().to_owned()));
    clock.insert("time".to_owned(), Ipld::Integer(entry.clock.time() as i128));

    let mut map = BTreeMap::new();
    map.insert("id".to_owned(), Ipld::String(entry.id.clone()));
    map.insert("payload".to_owned(), Ipld::String(entry.payload.clone()));
    map.insert("next".to_owned(), str_list(&entry.next));
    map.insert("refs".to_owned(), str_list(&entry.refs));
    map.insert("clock".to_owned(), Ipld::StringMap(clock));
    map.insert("v".to_owned(), Ipld::Integer(entry.v as i128));
    map.insert("key".to_owned(), Ipld::String(entry.key.clone()));
    map.insert("identity".to_owned(), Ipld::String(entry.identity.clone()));
    map.insert("sig".to_owned(), Ipld::String(entry.sig.clone()));

    DagCborCodec.encode(&Ipld::StringMap(map)).map_err(Error::codec)
}

/// CID and base58btc address over canonical bytes.
pub(crate) fn content_id(bytes: &[u8]) -> (Cid, String) {
    let digest = Code::Sha2_256.digest(bytes);
    let cid = Cid::new_v1(DAG_CBOR, digest);
    let hash = cid
        .to_string_of_base(Base::Base58Btc)
        .expect("base58btc is a valid base for cidv1");
    (cid, hash)
}

fn str_list(values: &[String]) -> Ipld {
    Ipld::List(values.iter().cloned().map(Ipld::String).collect())
}

fn as_map(ipld: &Ipld) -> Result<&BTreeMap<String, Ipld>> {
    match ipld {
        Ipld::StringMap(map) => Ok(map),
        other => Err(Error::Codec(format!("expected map, got {other:?}"))),
    }
}

fn get_str(map: &BTreeMap<String, Ipld>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Ipld::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::Codec(format!(
            "field {key}: expected string, got {other:?}"
        ))),
        None => Err(Error::Codec(format!("missing field {key}"))),
    }
}

fn get_u64(map: &BTreeMap<String, Ipld>, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(Ipld::Integer(i)) => {
            u64::try_from(*i).map_err(|_| Error::Codec(format!("field {key}: out of range")))
        }
        Some(other) => Err(Error::Codec(format!(
            "field {key}: expected integer, got {other:?}"
        ))),
        None => Err(Error::Codec(format!("missing field {key}"))),
    }
}

fn get_str_list(map: &BTreeMap<String, Ipld>, key: &str) -> Result<Vec<String>> {
    match map.get(key) {
        Some(Ipld::List(items)) => items
            .iter()
            .map(|item| match item {
                Ipld::String(s) => Ok(s.clone()),
                other => Err(Error::Codec(format!(
                    "field {key}: expected string element, got {other:?}"
                ))),
            })
            .collect(),
        Some(other) => Err(Error::Codec(format!(
            "field {key}: expected list, got {other:?}"
        ))),
        None => Err(Error::Codec(format!("missing field {key}"))),
    }
}
