// JSON settings document holding the control-plane address
//
// The address lives at a nested key path (default `SenderReceiverSet.NCBIP`)
// inside a larger application settings file. Writes preserve every other key
// and go through a temp file + rename so a crash never leaves a torn file.

use super::backend::{ConfigStore, StoreError};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Default key path of the control-plane address
pub const DEFAULT_ADDRESS_KEY_PATH: [&str; 2] = ["SenderReceiverSet", "NCBIP"];

/// `ConfigStore` backed by a JSON settings file
#[derive(Debug, Clone)]
pub struct JsonFileConfigStore {
    path: PathBuf,
    key_path: Vec<String>,
}

impl JsonFileConfigStore {
    /// Store at `path` using the default key path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key_path: DEFAULT_ADDRESS_KEY_PATH.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Override the key path (outermost key first)
    pub fn with_key_path<I, S>(mut self, key_path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_path = key_path.into_iter().map(Into::into).collect();
        self
    }

    /// Settings file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_document(&self) -> Result<Option<Value>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| StoreError::Io(e.to_string()))?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::Parse(e.to_string()))
    }

    fn save_document(&self, document: &Value) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(document)
            .map_err(|e| StoreError::Parse(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "settings.json".to_string());
        let tmp = dir.join(format!(".{}.tmp", file_name));

        std::fs::write(&tmp, contents).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::Io(e.to_string())
        })
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn read(&self) -> Result<Option<String>, StoreError> {
        let Some(document) = self.load_document()? else {
            return Ok(None);
        };
        let mut node = &document;
        for key in &self.key_path {
            match node.get(key) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(node.as_str().map(str::to_string).filter(|s| !s.is_empty()))
    }

    fn write(&self, address: &str) -> Result<(), StoreError> {
        let mut document = self
            .load_document()?
            .unwrap_or_else(|| Value::Object(Map::new()));

        let Some((leaf, parents)) = self.key_path.split_last() else {
            return Err(StoreError::Layout(String::new()));
        };

        let mut node = &mut document;
        for key in parents {
            let object = node
                .as_object_mut()
                .ok_or_else(|| StoreError::Layout(key.clone()))?;
            node = object
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        node.as_object_mut()
            .ok_or_else(|| StoreError::Layout(leaf.clone()))?
            .insert(leaf.clone(), Value::String(address.to_string()));

        self.save_document(&document)?;
        tracing::info!("💾 Saved control-plane address to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let store = JsonFileConfigStore::new(dir.path().join("appsettings.json"));
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn test_write_creates_nested_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appsettings.json");
        let store = JsonFileConfigStore::new(&path);

        store.write("192.168.1.20").unwrap();
        assert_eq!(store.read().unwrap().as_deref(), Some("192.168.1.20"));

        let document: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["SenderReceiverSet"]["NCBIP"], "192.168.1.20");
    }

    #[test]
    fn test_write_preserves_other_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appsettings.json");
        std::fs::write(
            &path,
            r#"{"Logging":{"Level":"Info"},"SenderReceiverSet":{"dId":"did-1","NCBIP":"10.0.0.1"}}"#,
        )
        .unwrap();

        let store = JsonFileConfigStore::new(&path);
        assert_eq!(store.read().unwrap().as_deref(), Some("10.0.0.1"));
        store.write("10.0.0.2").unwrap();

        let document: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["Logging"]["Level"], "Info");
        assert_eq!(document["SenderReceiverSet"]["dId"], "did-1");
        assert_eq!(document["SenderReceiverSet"]["NCBIP"], "10.0.0.2");
        assert!(!dir.path().join(".appsettings.json.tmp").exists());
    }

    #[test]
    fn test_write_rejects_non_object_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appsettings.json");
        std::fs::write(&path, r#"{"SenderReceiverSet":"flat"}"#).unwrap();

        let store = JsonFileConfigStore::new(&path);
        assert_eq!(
            store.write("10.0.0.2"),
            Err(StoreError::Layout("NCBIP".to_string()))
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"SenderReceiverSet":"flat"}"#);
    }

    #[test]
    fn test_corrupt_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appsettings.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileConfigStore::new(&path);
        assert!(matches!(store.read(), Err(StoreError::Parse(_))));
        assert!(matches!(store.write("10.0.0.2"), Err(StoreError::Parse(_))));
    }

    #[test]
    fn test_custom_key_path() {
        let dir = tempdir().unwrap();
        let store = JsonFileConfigStore::new(dir.path().join("s.json")).with_key_path(["ncb"]);
        store.write("::1").unwrap();
        assert_eq!(store.read().unwrap().as_deref(), Some("::1"));
    }
}
