use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

use common::constants::CHECKSUM_PREFIX;

/// On-disk location of a stored payload: a two-char prefix shard keeps
/// directories shallow.
pub fn data_path(root: &Path, file_id: &str) -> PathBuf {
    if file_id.len() < 2 {
        return root.join(file_id);
    }
    root.join(&file_id[..2]).join(file_id)
}

pub async fn file_exists(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Re-hash a stored payload into the wire's `sha256:<hex>` form.
pub async fn file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{}{}", CHECKSUM_PREFIX, hex::encode(hasher.finalize())))
}

/// Seed the usage counter from what is already on disk.
pub fn scan_used_bytes(root: &Path) -> i64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len() as i64)
        .sum()
}

pub struct StoredEntry {
    pub file_id: String,
    pub size: i64,
}

pub fn list_stored(root: &Path) -> Vec<StoredEntry> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let size = e.metadata().map(|m| m.len() as i64).unwrap_or(0);
            StoredEntry {
                file_id: e.file_name().to_string_lossy().to_string(),
                size,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn data_path_shards_by_prefix() {
        let root = Path::new("/data");
        let path = data_path(root, "ab12cdef-3456");
        assert_eq!(path, root.join("ab").join("ab12cdef-3456"));

        // Degenerate ids fall back to the root.
        assert_eq!(data_path(root, "x"), root.join("x"));
    }

    #[tokio::test]
    async fn checksum_matches_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let checksum = file_checksum(&path).await.unwrap();
        assert_eq!(
            checksum,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn scan_and_list_agree() {
        let dir = TempDir::new().unwrap();
        let shard = dir.path().join("ab");
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(shard.join("ab-file-1"), b"12345").unwrap();
        std::fs::write(shard.join("ab-file-2"), b"678").unwrap();

        assert_eq!(scan_used_bytes(dir.path()), 8);
        let mut listed = list_stored(dir.path());
        listed.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].file_id, "ab-file-1");
        assert_eq!(listed[0].size, 5);
    }
}
