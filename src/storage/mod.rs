//! Image Store
//!
//! Filesystem-backed storage for firmware images, rooted at the configured
//! images directory with one subdirectory per device serial. Also serves the
//! per-device configuration file kept at the data-directory root.

mod types;

pub use types::{ImageEntry, StorageError};

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::config::StorageConfig;

/// Filesystem image store shared across request handlers.
#[derive(Debug, Clone)]
pub struct ImageStore {
    images_dir: PathBuf,
    data_dir: PathBuf,
}

impl ImageStore {
    /// Create a store over the configured directories, creating the images
    /// directory if it does not exist yet.
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&config.images_dir).await?;
        Ok(Self {
            images_dir: config.images_dir.clone(),
            data_dir: config.data_dir.clone(),
        })
    }

    /// Resolve `serial/filename` below the images root.
    ///
    /// Rejects path components that could escape the root. The serial is
    /// validated separately by the upload validator; this guards the
    /// filename half for every route that touches disk.
    pub fn resolve(&self, serial: &str, filename: &str) -> Result<PathBuf, StorageError> {
        validate_component(filename)?;
        Ok(self.images_dir.join(serial.to_lowercase()).join(filename))
    }

    /// Create the per-serial directory if needed and return the resolved
    /// destination path.
    pub async fn prepare(&self, serial: &str, filename: &str) -> Result<PathBuf, StorageError> {
        let path = self.resolve(serial, filename)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }

    /// Open a stored image for reading.
    pub async fn open(&self, serial: &str, filename: &str) -> Result<tokio::fs::File, StorageError> {
        let path = self.resolve(serial, filename)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a whole image, overwriting any previous content.
    pub async fn write(
        &self,
        serial: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.prepare(serial, filename).await?;
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// List the newest image per type stored for a serial.
    pub async fn list_images(&self, serial: &str) -> Result<Vec<ImageEntry>, StorageError> {
        let dir = self.images_dir.join(serial.to_lowercase());
        let mut newest: HashMap<String, (Version, ImageEntry)> = HashMap::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some((image, version)) = parse_image_name(&filename) else {
                continue;
            };
            match newest.get(&image.image_type) {
                Some((existing, _)) if *existing >= version => {}
                _ => {
                    newest.insert(image.image_type.clone(), (version, image));
                }
            }
        }

        let mut manifest: Vec<ImageEntry> = newest.into_values().map(|(_, e)| e).collect();
        manifest.sort_by(|a, b| a.image_type.cmp(&b.image_type));
        Ok(manifest)
    }

    /// Look up a device's entry in `{data_dir}/config.json`.
    ///
    /// Returns `Ok(None)` when the device has no entry; a missing or
    /// unparsable config file is a storage error.
    pub async fn device_config(&self, mac: &str) -> Result<Option<Value>, StorageError> {
        let path = self.data_dir.join("config.json");
        let raw = tokio::fs::read_to_string(&path).await?;
        let config: HashMap<String, Value> = serde_json::from_str(&raw)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        Ok(config.get(mac).cloned())
    }
}

/// Numeric version triple, ordered component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Version(u64, u64, u64);

/// Parse `{type}_v{major}.{minor}.{patch}{suffix}` into a manifest entry.
/// Filenames without a type prefix or version are skipped.
fn parse_image_name(filename: &str) -> Option<(ImageEntry, Version)> {
    let (image_type, rest) = filename.split_once('_')?;
    if image_type.is_empty() {
        return None;
    }

    let rest = rest.strip_prefix('v')?;
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = digits.trim_end_matches('.').splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;

    let entry = ImageEntry {
        image_type: image_type.to_string(),
        version: format!("{major}.{minor}.{patch}"),
        filename: filename.to_string(),
    };
    Some((entry, Version(major, minor, patch)))
}

/// Reject filename components that could escape the storage root.
fn validate_component(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(StorageError::InvalidPath(name.to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(StorageError::InvalidPath(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> ImageStore {
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            images_dir: dir.path().join("images"),
        };
        ImageStore::new(&config).await.unwrap()
    }

    #[test]
    fn parses_typed_versioned_filename() {
        let (entry, version) = parse_image_name("dev-x_v1.2.3.bin.zz").unwrap();
        assert_eq!(entry.image_type, "dev-x");
        assert_eq!(entry.version, "1.2.3");
        assert_eq!(entry.filename, "dev-x_v1.2.3.bin.zz");
        assert_eq!(version, Version(1, 2, 3));
    }

    #[test]
    fn skips_unversioned_filenames() {
        assert!(parse_image_name("notes.txt").is_none());
        assert!(parse_image_name("dev-x_1.0.0.bin").is_none());
        assert!(parse_image_name("_v1.0.0.bin").is_none());
        assert!(parse_image_name("dev-x_v1.0.bin").is_none());
    }

    #[test]
    fn version_ordering_is_numeric() {
        let (_, v10) = parse_image_name("a_v1.10.0.bin").unwrap();
        let (_, v9) = parse_image_name("a_v1.9.0.bin").unwrap();
        assert!(v10 > v9);
    }

    #[tokio::test]
    async fn write_then_open_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        store.write("deadbeef", "a_v1.0.0.bin", b"payload").await.unwrap();
        let mut file = store.open("deadbeef", "a_v1.0.0.bin").await.unwrap();
        let mut content = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut content)
            .await
            .unwrap();
        assert_eq!(content, b"payload");
    }

    #[tokio::test]
    async fn open_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        assert!(matches!(
            store.open("deadbeef", "missing.bin").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn traversal_components_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        for bad in ["..", ".", "", "a/b", "a\\b"] {
            assert!(
                matches!(store.resolve("deadbeef", bad), Err(StorageError::InvalidPath(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn manifest_lists_newest_per_type() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        store.write("deadbeef", "dev-x_v1.0.0.bin.zz", b"a").await.unwrap();
        store.write("deadbeef", "dev-x_v1.2.0.bin.zz", b"b").await.unwrap();
        store.write("deadbeef", "dev-y_v0.1.0.bin.zz", b"c").await.unwrap();
        store.write("deadbeef", "README", b"d").await.unwrap();

        let manifest = store.list_images("deadbeef").await.unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0].image_type, "dev-x");
        assert_eq!(manifest[0].version, "1.2.0");
        assert_eq!(manifest[1].image_type, "dev-y");
    }

    #[tokio::test]
    async fn manifest_for_unknown_serial_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        assert!(store.list_images("cafebabe").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn device_config_lookup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        tokio::fs::write(
            dir.path().join("config.json"),
            r#"{"aa:bb:cc:dd:ee:ff":{"channel":"stable"}}"#,
        )
        .await
        .unwrap();

        let entry = store.device_config("aa:bb:cc:dd:ee:ff").await.unwrap();
        assert_eq!(entry.unwrap()["channel"], "stable");
        assert!(store.device_config("00:00:00:00:00:00").await.unwrap().is_none());
    }
}
