// Private key storage on the local filesystem

use super::DeviceKeys;
use super::IdentityError;
use std::path::{Path, PathBuf};

/// File name used when no device id is configured
const ANONYMOUS_KEY_FILE: &str = "device_private_key.pem";

/// Directory of PEM private keys named `<did>_private_key.pem`
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Create a key store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Key directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the private key for `device_id`
    pub fn key_path(&self, device_id: Option<&str>) -> PathBuf {
        match device_id {
            Some(did) if !did.trim().is_empty() => {
                self.dir.join(format!("{}_private_key.pem", did.trim()))
            }
            _ => self.dir.join(ANONYMOUS_KEY_FILE),
        }
    }

    /// Whether a key file exists for `device_id`
    pub fn exists(&self, device_id: Option<&str>) -> bool {
        self.key_path(device_id).is_file()
    }

    /// Load the key pair for `device_id`
    pub fn load(&self, device_id: Option<&str>) -> Result<DeviceKeys, IdentityError> {
        let path = self.key_path(device_id);
        if !path.is_file() {
            return Err(IdentityError::KeyNotFound(path));
        }
        let pem = zeroize::Zeroizing::new(
            std::fs::read_to_string(&path).map_err(|e| IdentityError::Io(e.to_string()))?,
        );
        Ok(DeviceKeys::from_pem(&pem)?)
    }

    /// Save the key pair for `device_id` as PKCS#8 PEM, owner-readable only
    pub fn save(&self, device_id: Option<&str>, keys: &DeviceKeys) -> Result<PathBuf, IdentityError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| IdentityError::Io(e.to_string()))?;
        let path = self.key_path(device_id);
        let pem = keys.to_pkcs8_pem()?;
        write_private(&path, pem.as_bytes())?;
        Ok(path)
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<(), IdentityError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| IdentityError::Io(e.to_string()))?;
    file.write_all(contents)
        .map_err(|e| IdentityError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<(), IdentityError> {
    std::fs::write(path, contents).map_err(|e| IdentityError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keys;
    use tempfile::tempdir;

    #[test]
    fn test_key_path_naming() {
        let store = KeyStore::new("/etc/edgelink/Cert");
        assert_eq!(
            store.key_path(Some("did-123")),
            PathBuf::from("/etc/edgelink/Cert/did-123_private_key.pem")
        );
        assert_eq!(
            store.key_path(None),
            PathBuf::from("/etc/edgelink/Cert/device_private_key.pem")
        );
        assert_eq!(store.key_path(Some("  ")), store.key_path(None));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("Cert"));
        let keys = DeviceKeys::from_pem(test_keys::PRIVATE_PEM).unwrap();

        assert!(!store.exists(Some("did-1")));
        let path = store.save(Some("did-1"), &keys).unwrap();
        assert!(path.is_file());
        assert!(store.exists(Some("did-1")));

        let loaded = store.load(Some("did-1")).unwrap();
        assert_eq!(loaded.public_key(), keys.public_key());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let keys = DeviceKeys::from_pem(test_keys::PRIVATE_PEM).unwrap();
        let path = store.save(None, &keys).unwrap();

        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_missing_key() {
        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        assert!(matches!(
            store.load(Some("absent")),
            Err(IdentityError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_load_corrupt_key() {
        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        std::fs::write(store.key_path(Some("bad")), "not a key").unwrap();
        assert!(matches!(
            store.load(Some("bad")),
            Err(IdentityError::Crypto(_))
        ));
    }
}
