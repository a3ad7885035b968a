//! Storage Module Tests
//!
//! Validates the content-addressable store against a real temporary directory.
//!
//! ## Test Scopes
//! - **Round trip**: written bytes read back unchanged, byte counts exact.
//! - **Has/Delete**: presence flips correctly for both existing and missing keys.
//! - **Layout**: shard directories are created and reclaimed as expected.

#[cfg(test)]
mod tests {
    use crate::storage::path::PathKey;
    use crate::storage::store::{ContentStore, StoreError};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn test_store() -> (TempDir, ContentStore) {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::new(tmp.path().join("picklenetwork"));
        (tmp, store)
    }

    async fn read_all(store: &ContentStore, key: &str) -> Vec<u8> {
        let (size, mut file) = store.read(key).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(size, buf.len() as u64);
        buf
    }

    // ============================================================
    // WRITE / READ
    // ============================================================

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (_tmp, store) = test_store();
        let data = b"somedata".to_vec();

        let written = store
            .write("somepicture", &mut data.as_slice())
            .await
            .unwrap();

        assert_eq!(written, data.len() as u64);
        assert_eq!(read_all(&store, "somepicture").await, data);
    }

    #[tokio::test]
    async fn test_write_lands_at_sharded_path() {
        let (_tmp, store) = test_store();

        store
            .write("somepiture.jpg", &mut &b"jpeg bytes"[..])
            .await
            .unwrap();

        let expected = store
            .root()
            .join("1fc6c/388d4/f5030/0ab78/9cc66/2adf1/b9db4/97b45")
            .join("1fc6c388d4f50300ab789cc662adf1b9db497b45");
        assert!(expected.is_file());
    }

    #[tokio::test]
    async fn test_write_empty_payload() {
        let (_tmp, store) = test_store();

        let written = store.write("empty", &mut &b""[..]).await.unwrap();

        assert_eq!(written, 0);
        assert!(store.has("empty").await);
        assert!(read_all(&store, "empty").await.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (_tmp, store) = test_store();

        store.write("key", &mut &b"first version"[..]).await.unwrap();
        store.write("key", &mut &b"v2"[..]).await.unwrap();

        assert_eq!(read_all(&store, "key").await, b"v2".to_vec());
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let (_tmp, store) = test_store();

        store.write("key", &mut &b"payload"[..]).await.unwrap();

        let path_key = store.path_key("key");
        let leaf = store.root().join(&path_key.path_name);
        let names: Vec<String> = std::fs::read_dir(leaf)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![path_key.file_name]);
    }

    fn leaf_entries(store: &ContentStore, key: &str) -> Vec<String> {
        let leaf = store.root().join(store.path_key(key).path_name);
        std::fs::read_dir(leaf)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_write_exact_rejects_short_source() {
        let (_tmp, store) = test_store();

        let result = store.write_exact("short", &mut &b"only ten.."[..], 64).await;

        assert!(matches!(result, Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof));
        assert!(!store.has("short").await);
        assert!(leaf_entries(&store, "short").is_empty());
    }

    #[tokio::test]
    async fn test_write_exact_commits_matching_length() {
        let (_tmp, store) = test_store();

        let written = store.write_exact("exact", &mut &b"12345"[..], 5).await.unwrap();

        assert_eq!(written, 5);
        assert_eq!(read_all(&store, "exact").await, b"12345".to_vec());
    }

    #[tokio::test]
    async fn test_cancelled_write_leaves_no_temp_file() {
        let (_tmp, store) = test_store();
        let (_writer, mut never_finishes) = tokio::io::duplex(64);

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.write_exact("stalled", &mut never_finishes, 10),
        )
        .await;

        assert!(cancelled.is_err());
        assert!(!store.has("stalled").await);
        assert!(leaf_entries(&store, "stalled").is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_key_is_not_found() {
        let (_tmp, store) = test_store();

        let result = store.read("does-not-exist").await;
        assert!(matches!(result, Err(StoreError::NotFound(k)) if k == "does-not-exist"));
    }

    // ============================================================
    // HAS
    // ============================================================

    #[tokio::test]
    async fn test_has_existing_and_missing_keys() {
        let (_tmp, store) = test_store();

        assert!(!store.has("somepicture").await, "has should be false before write");

        store
            .write("somepicture", &mut &b"somedata"[..])
            .await
            .unwrap();

        assert!(store.has("somepicture").await, "has should return true");
        assert!(!store.has("not exists").await, "has should return false");
    }

    #[tokio::test]
    async fn test_has_is_false_for_directory_at_key_path() {
        let (_tmp, store) = test_store();
        let path_key = store.path_key("dir-key");
        std::fs::create_dir_all(store.root().join(path_key.full_path())).unwrap();

        assert!(!store.has("dir-key").await);
    }

    // ============================================================
    // DELETE / CLEAR
    // ============================================================

    #[tokio::test]
    async fn test_delete_repeatedly_with_random_payloads() {
        let (_tmp, store) = test_store();
        let key = "pictureKey";

        for i in 0..=50 {
            let buf: Vec<u8> = (0..10 * i).map(|_| rand::random::<u8>()).collect();

            store.write(key, &mut buf.as_slice()).await.unwrap();
            assert_eq!(read_all(&store, key).await, buf);

            store.delete(key).await.unwrap();
            assert!(!store.has(key).await, "expected key to be gone");
        }
    }

    #[tokio::test]
    async fn test_delete_removes_top_level_shard() {
        let (_tmp, store) = test_store();

        store.write("somepiture.jpg", &mut &b"x"[..]).await.unwrap();
        assert!(store.root().join("1fc6c").is_dir());

        store.delete("somepiture.jpg").await.unwrap();

        assert!(!store.root().join("1fc6c").exists());
        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn test_delete_missing_key_fails() {
        let (_tmp, store) = test_store();

        let result = store.delete("never-written").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    fn shared_prefix_transform(key: &str) -> PathKey {
        PathKey {
            path_name: format!("aaaaa/{}", key.len()),
            file_name: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_delete_keeps_keys_sharing_a_shard() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::with_transform(tmp.path().join("root"), shared_prefix_transform);

        store.write("one", &mut &b"1"[..]).await.unwrap();
        store.write("four", &mut &b"4"[..]).await.unwrap();

        store.delete("one").await.unwrap();

        assert!(!store.has("one").await);
        assert!(store.has("four").await);
        assert!(!store.root().join("aaaaa/3").exists());
        assert!(store.root().join("aaaaa/4").is_dir());
    }

    #[tokio::test]
    async fn test_clear_removes_root() {
        let (_tmp, store) = test_store();

        store.write("a", &mut &b"1"[..]).await.unwrap();
        store.write("b", &mut &b"2"[..]).await.unwrap();

        store.clear().await.unwrap();

        assert!(!store.root().exists());
        assert!(!store.has("a").await);
        // clearing twice is harmless
        store.clear().await.unwrap();
    }
}
