//! Codec registry: versioned mappings between primary keys and tree paths.
//!
//! Each dataset version is a [`Codec`] value in a static registry keyed by
//! its version tag. New encoding schemes are added as registry entries.
//!
//! # Layouts (relative to the dataset root)
//!
//! | version | meta               | feature                                     | feature kind |
//! |---------|--------------------|---------------------------------------------|--------------|
//! | `0.0.1` | `meta/<name>`      | `features/<id[..4]>/<id>/<column>`          | subtree      |
//! | `0.1.0` | `.strata-table/meta/<name>` | `.strata-table/<h[..2]>/<h[2..4]>/<key>/<column>` | subtree |
//! | `0.2.0` | `.strata-table/meta/<name>` | `.strata-table/<h[..2]>/<h[2..4]>/<key>` | blob |
//!
//! `<key>` is the encoded primary key, `<h>` the SHA-256 hex digest of it
//! and `<id>` a name-based UUID of it.

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use git2::{Repository, Tree};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::PrimaryKey;

/// Hidden directory holding meta and features for the newer layouts.
pub const TABLE_DIR: &str = ".strata-table";

/// Name of the meta item carrying the version tag.
pub const VERSION_ITEM: &str = "version";

/// Dataset encoding scheme versions, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatasetVersion {
    #[serde(rename = "0.0.1")]
    V0_0_1,
    #[serde(rename = "0.1.0")]
    V0_1_0,
    #[serde(rename = "0.2.0")]
    V0_2_0,
}

impl DatasetVersion {
    pub const DEFAULT: Self = Self::V0_2_0;

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V0_0_1 => "0.0.1",
            Self::V0_1_0 => "0.1.0",
            Self::V0_2_0 => "0.2.0",
        }
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatasetVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        lookup(s).map(|c| c.version)
    }
}

/// How a single feature is stored in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureStorage {
    /// One blob per column inside a per-feature subtree.
    Tree,
    /// One JSON blob holding the whole row.
    Blob,
}

/// How the leaf name of a feature is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keying {
    /// Opaque identifier; lookups by key need a full walk.
    Opaque,
    /// The encoded primary key itself.
    PrimaryKey,
}

/// A dataset encoding scheme.
#[derive(Debug)]
pub struct Codec {
    pub version: DatasetVersion,
    /// Directory (relative to the dataset root) holding meta items.
    pub meta_dir: &'static str,
    /// Directory (relative to the dataset root) holding the feature shards.
    pub feature_dir: &'static str,
    pub storage: FeatureStorage,
    /// Number of shard directory levels between `feature_dir` and a feature.
    pub shard_depth: usize,
    keying: Keying,
}

static REGISTRY: [Codec; 3] = [
    Codec {
        version: DatasetVersion::V0_0_1,
        meta_dir: "meta",
        feature_dir: "features",
        storage: FeatureStorage::Tree,
        shard_depth: 1,
        keying: Keying::Opaque,
    },
    Codec {
        version: DatasetVersion::V0_1_0,
        meta_dir: ".strata-table/meta",
        feature_dir: TABLE_DIR,
        storage: FeatureStorage::Tree,
        shard_depth: 2,
        keying: Keying::PrimaryKey,
    },
    Codec {
        version: DatasetVersion::V0_2_0,
        meta_dir: ".strata-table/meta",
        feature_dir: TABLE_DIR,
        storage: FeatureStorage::Blob,
        shard_depth: 2,
        keying: Keying::PrimaryKey,
    },
];

/// All registered version tags, oldest first.
#[must_use]
pub fn version_numbers() -> Vec<&'static str> {
    REGISTRY.iter().map(|c| c.version.as_str()).collect()
}

/// Look up a codec by version tag.
///
/// # Errors
///
/// Returns `UnsupportedVersion` if the tag is not registered.
pub fn lookup(tag: &str) -> Result<&'static Codec> {
    REGISTRY
        .iter()
        .find(|c| c.version.as_str() == tag)
        .ok_or_else(|| Error::UnsupportedVersion(tag.to_string()))
}

/// The codec for a known version.
#[must_use]
pub fn for_version(version: DatasetVersion) -> &'static Codec {
    match version {
        DatasetVersion::V0_0_1 => &REGISTRY[0],
        DatasetVersion::V0_1_0 => &REGISTRY[1],
        DatasetVersion::V0_2_0 => &REGISTRY[2],
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionItem {
    version: String,
}

/// JSON body of the `version` meta item.
#[must_use]
pub fn version_item(version: DatasetVersion) -> serde_json::Value {
    serde_json::json!({ "version": version.as_str() })
}

/// Select the codec for a dataset tree from its `version` meta item.
///
/// The newer layouts keep the item under [`TABLE_DIR`]; the oldest layout
/// keeps it under `meta/` or omits it entirely.
///
/// # Errors
///
/// Returns `UnsupportedVersion` for an unknown tag, or a JSON error for a
/// malformed version item.
pub fn sniff(repo: &Repository, dataset_tree: &Tree<'_>) -> Result<&'static Codec> {
    for dir in [REGISTRY[2].meta_dir, REGISTRY[0].meta_dir] {
        let item_path = format!("{dir}/{VERSION_ITEM}");
        if let Ok(entry) = dataset_tree.get_path(Path::new(&item_path)) {
            let blob = repo.find_blob(entry.id())?;
            let item: VersionItem = serde_json::from_slice(blob.content())?;
            return lookup(&item.version);
        }
    }
    Ok(for_version(DatasetVersion::V0_0_1))
}

impl Codec {
    /// Encode a primary key as a path-safe string.
    ///
    /// The key is packed into its compact binary form and then URL-safe
    /// base64 encoded, so it is always a valid path segment.
    #[must_use]
    pub fn encode_pk(&self, pk: &PrimaryKey) -> String {
        URL_SAFE.encode(pack_pk(pk))
    }

    /// Decode a string produced by [`Codec::encode_pk`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for malformed input.
    pub fn decode_pk(&self, encoded: &str) -> Result<PrimaryKey> {
        let bytes = URL_SAFE
            .decode(encoded)
            .map_err(|e| Error::InvalidArgument(format!("bad encoded key '{encoded}': {e}")))?;
        unpack_pk(&bytes)
    }

    /// Whether a feature's location follows from its primary key alone.
    #[must_use]
    pub const fn is_pk_addressable(&self) -> bool {
        matches!(self.keying, Keying::PrimaryKey)
    }

    /// Dataset-relative path of the feature with this key, for layouts where
    /// the path is derived from the key.
    #[must_use]
    pub fn feature_path(&self, pk: &PrimaryKey) -> Option<String> {
        match self.keying {
            Keying::PrimaryKey => Some(self.layout(&self.encode_pk(pk))),
            Keying::Opaque => None,
        }
    }

    /// Path a newly written feature with this key is stored at.
    #[must_use]
    pub fn allocate_path(&self, pk: &PrimaryKey) -> String {
        let encoded = self.encode_pk(pk);
        match self.keying {
            Keying::PrimaryKey => self.layout(&encoded),
            Keying::Opaque => {
                let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, encoded.as_bytes())
                    .to_string();
                self.layout(&id)
            }
        }
    }

    /// Dataset-relative path of a meta item.
    #[must_use]
    pub fn meta_path(&self, name: &str) -> String {
        format!("{}/{name}", self.meta_dir)
    }

    /// Shard directories plus leaf name for a feature leaf key.
    fn layout(&self, leaf: &str) -> String {
        match self.keying {
            Keying::PrimaryKey => {
                let digest = format!("{:x}", Sha256::digest(leaf.as_bytes()));
                format!(
                    "{}/{}/{}/{leaf}",
                    self.feature_dir,
                    &digest[..2],
                    &digest[2..4]
                )
            }
            Keying::Opaque => format!("{}/{}/{leaf}", self.feature_dir, &leaf[..4]),
        }
    }
}

// ── Primary key binary form ───────────────────────────────────
//
// Compact, type-tagged, big-endian; byte-compatible with the MessagePack
// integer and string encodings.

/// Pack a primary key into its binary form.
#[must_use]
pub fn pack_pk(pk: &PrimaryKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    match pk {
        PrimaryKey::Int(i) => pack_int(*i, &mut out),
        PrimaryKey::Text(s) => pack_str(s, &mut out),
    }
    out
}

fn pack_int(i: i64, out: &mut Vec<u8>) {
    let be = i.to_be_bytes();
    if i >= 0 {
        if i < 0x80 {
            out.push(be[7]);
        } else if i <= 0xff {
            out.push(0xcc);
            out.push(be[7]);
        } else if i <= 0xffff {
            out.push(0xcd);
            out.extend_from_slice(&be[6..]);
        } else if i <= 0xffff_ffff {
            out.push(0xce);
            out.extend_from_slice(&be[4..]);
        } else {
            out.push(0xcf);
            out.extend_from_slice(&be);
        }
    } else if i >= -32 {
        out.push(be[7]);
    } else if i >= i64::from(i8::MIN) {
        out.push(0xd0);
        out.push(be[7]);
    } else if i >= i64::from(i16::MIN) {
        out.push(0xd1);
        out.extend_from_slice(&be[6..]);
    } else if i >= i64::from(i32::MIN) {
        out.push(0xd2);
        out.extend_from_slice(&be[4..]);
    } else {
        out.push(0xd3);
        out.extend_from_slice(&be);
    }
}

fn pack_str(s: &str, out: &mut Vec<u8>) {
    let len = s.len();
    let len_be = (len as u64).to_be_bytes();
    if len < 32 {
        out.push(0xa0 | len_be[7]);
    } else if len <= 0xff {
        out.push(0xd9);
        out.push(len_be[7]);
    } else if len <= 0xffff {
        out.push(0xda);
        out.extend_from_slice(&len_be[6..]);
    } else {
        out.push(0xdb);
        out.extend_from_slice(&len_be[4..]);
    }
    out.extend_from_slice(s.as_bytes());
}

/// Unpack a binary primary key. The whole input must be consumed.
///
/// # Errors
///
/// Returns `InvalidArgument` for truncated, trailing or unsupported input.
pub fn unpack_pk(bytes: &[u8]) -> Result<PrimaryKey> {
    let bad = || Error::InvalidArgument(format!("bad primary key encoding: {bytes:02x?}"));
    let (&tag, rest) = bytes.split_first().ok_or_else(bad)?;

    let (pk, used) = match tag {
        0x00..=0x7f => (PrimaryKey::Int(i64::from(tag)), 0),
        0xe0..=0xff => (PrimaryKey::Int(i64::from(i8::from_be_bytes([tag]))), 0),
        0xcc | 0xcd | 0xce | 0xcf => {
            let n = 1usize << (tag - 0xcc);
            let u = read_be(rest, n).ok_or_else(bad)?;
            (PrimaryKey::Int(i64::try_from(u).map_err(|_| bad())?), n)
        }
        0xd0..=0xd3 => {
            let n = 1usize << (tag - 0xd0);
            let u = read_be(rest, n).ok_or_else(bad)?;
            // sign-extend from n bytes
            let shift = 64 - 8 * n as u32;
            let i = i64::from_be_bytes(u.to_be_bytes()) << shift >> shift;
            (PrimaryKey::Int(i), n)
        }
        0xa0..=0xbf => {
            let len = usize::from(tag & 0x1f);
            (read_str(rest, 0, len).ok_or_else(bad)?, len)
        }
        0xd9 | 0xda | 0xdb => {
            let n = 1usize << (tag - 0xd9);
            let len = usize::try_from(read_be(rest, n).ok_or_else(bad)?).map_err(|_| bad())?;
            (read_str(rest, n, len).ok_or_else(bad)?, n + len)
        }
        _ => return Err(bad()),
    };

    if used != rest.len() {
        return Err(bad());
    }
    Ok(pk)
}

fn read_be(bytes: &[u8], n: usize) -> Option<u64> {
    let slice = bytes.get(..n)?;
    Some(slice.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn read_str(bytes: &[u8], offset: usize, len: usize) -> Option<PrimaryKey> {
    let slice = bytes.get(offset..offset.checked_add(len)?)?;
    std::str::from_utf8(slice)
        .ok()
        .map(|s| PrimaryKey::Text(s.to_string()))
}
