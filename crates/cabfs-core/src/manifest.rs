//! Boundary types handed across from the external manifest parser.
//!
//! The on-medium manifest is a proprietary property-file format owned by a
//! separate parser; cabfs consumes its output as plain data. Two distinct
//! shapes exist: the extraction tree ([`ManifestNode`]) and the flat
//! verification list ([`FileRecord`]).

use serde::{Deserialize, Serialize};

/// A node of the extraction manifest tree.
///
/// File nodes may carry a 20-byte storage digest naming the obfuscated
/// on-disk location of the entry, and a content-key index into the keyring.
/// An absent index (or the index 0) means the entry is stored unencrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestNode {
    Dir {
        name: String,
        #[serde(default)]
        children: Vec<ManifestNode>,
    },
    File {
        name: String,
        /// Raw keyed-hash digest of the entry's sharded storage location.
        #[serde(default, with = "crate::b64::opt")]
        storage_digest: Option<Vec<u8>>,
        /// Index of the content key that decrypts this entry.
        #[serde(default)]
        key_index: Option<u32>,
    },
}

impl ManifestNode {
    pub fn name(&self) -> &str {
        match self {
            ManifestNode::Dir { name, .. } | ManifestNode::File { name, .. } => name,
        }
    }
}

/// One record of the verification list: expected digest and size of a file
/// already present on disk at its destination path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    #[serde(with = "crate::b64")]
    pub md5: Vec<u8>,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_tree_from_json() {
        let doc = r#"{
            "kind": "dir",
            "name": "",
            "children": [
                {"kind": "dir", "name": "data", "children": [
                    {"kind": "file", "name": "song.bin", "key_index": 3}
                ]},
                {"kind": "file", "name": "readme.txt"}
            ]
        }"#;

        let root: ManifestNode = serde_json::from_str(doc).unwrap();
        let ManifestNode::Dir { children, .. } = &root else {
            panic!("root must be a directory");
        };
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name(), "data");

        let ManifestNode::File {
            storage_digest,
            key_index,
            ..
        } = &children[1]
        else {
            panic!("expected file node");
        };
        assert!(storage_digest.is_none());
        assert!(key_index.is_none());
    }

    #[test]
    fn test_storage_digest_base64() {
        let digest = vec![0xABu8; 20];
        let node = ManifestNode::File {
            name: "x".into(),
            storage_digest: Some(digest.clone()),
            key_index: Some(1),
        };
        let json = serde_json::to_string(&node).unwrap();
        let back: ManifestNode = serde_json::from_str(&json).unwrap();
        let ManifestNode::File { storage_digest, .. } = back else {
            panic!("expected file node");
        };
        assert_eq!(storage_digest.unwrap(), digest);
    }
}
