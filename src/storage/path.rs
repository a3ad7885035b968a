//! Content addressing: maps an opaque key to a sharded on-disk location.
//!
//! The key is hashed with SHA-1, hex-encoded, and the hex string is cut into
//! fixed-size blocks that become nested directory names. The full hex string
//! is the file name. Spreading entries this way keeps every directory small
//! even with millions of stored keys.

use sha1::{Digest, Sha1};

/// Number of hex characters per directory segment.
pub const DEFAULT_BLOCK_SIZE: usize = 5;

/// Signature of a key -> path mapping used by [`ContentStore`](super::store::ContentStore).
pub type PathTransformFn = fn(&str) -> PathKey;

/// Location of a key relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    /// Sharded directory, segments joined with `/`.
    pub path_name: String,
    /// Full hex digest of the key.
    pub file_name: String,
}

impl PathKey {
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path_name, self.file_name)
    }

    /// Top-level shard directory that owns this key.
    pub fn first_segment(&self) -> &str {
        self.path_name
            .split('/')
            .next()
            .unwrap_or(self.path_name.as_str())
    }
}

/// Default transform: SHA-1 of the key, split into blocks of [`DEFAULT_BLOCK_SIZE`].
pub fn cas_path_transform(key: &str) -> PathKey {
    transform_with_block_size(key, DEFAULT_BLOCK_SIZE)
}

pub fn transform_with_block_size(key: &str, block_size: usize) -> PathKey {
    let hash = Sha1::digest(key.as_bytes());
    let hash_str = hex::encode(hash);

    let block_size = block_size.clamp(1, hash_str.len());
    let segments: Vec<&str> = hash_str
        .as_bytes()
        .chunks(block_size)
        .filter(|chunk| chunk.len() == block_size)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();

    PathKey {
        path_name: segments.join("/"),
        file_name: hash_str.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_known_key() {
        let path_key = cas_path_transform("somepiture.jpg");

        assert_eq!(
            path_key.path_name,
            "1fc6c/388d4/f5030/0ab78/9cc66/2adf1/b9db4/97b45"
        );
        assert_eq!(path_key.file_name, "1fc6c388d4f50300ab789cc662adf1b9db497b45");
        assert_eq!(path_key.first_segment(), "1fc6c");
    }

    #[test]
    fn test_transform_is_deterministic() {
        let a = cas_path_transform("some/key");
        let b = cas_path_transform("some/key");
        assert_eq!(a, b);
        assert_ne!(a, cas_path_transform("some/other-key"));
    }

    #[test]
    fn test_transform_drops_trailing_partial_block() {
        // 40 hex chars / 3 = 13 full blocks, 1 char left over
        let path_key = transform_with_block_size("somepiture.jpg", 3);
        let segments: Vec<&str> = path_key.path_name.split('/').collect();

        assert_eq!(segments.len(), 13);
        assert!(segments.iter().all(|s| s.len() == 3));
        assert_eq!(path_key.file_name.len(), 40);
    }
}
