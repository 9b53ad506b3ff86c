//! JSON-file-backed implementations of the persistence traits.
//! Plain JSON on disk, via serde_json.
//!
//! Path resolution is a plain injected path rather than a hardcoded one,
//! for testability.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sphere_core::{CameraSettingsStore, ColorStore, CoreError, CoreResult, PersistedSignature};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SignatureFile {
    signatures: HashMap<String, PersistedSignature>,
}

/// Persists calibrated color signatures to a single JSON file, keyed by
/// whatever identity string the caller assigns to a controller.
pub struct JsonColorStore {
    path: PathBuf,
    cache: SignatureFile,
}

impl JsonColorStore {
    pub fn new(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let cache = Self::read(&path)?;
        Ok(Self { path, cache })
    }

    fn read(path: &Path) -> CoreResult<SignatureFile> {
        if !path.exists() {
            return Ok(SignatureFile::default());
        }
        let bytes = std::fs::read(path).map_err(|e| CoreError::internal(e.to_string()))?;
        serde_json::from_slice(&bytes).or_else(|_| Ok(SignatureFile::default()))
    }

    fn flush(&self) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let bytes = serde_json::to_vec_pretty(&self.cache)?;
        std::fs::write(&self.path, bytes).map_err(|e| CoreError::internal(e.to_string()))
    }
}

impl ColorStore for JsonColorStore {
    fn load(&self, key: &str) -> CoreResult<Option<PersistedSignature>> {
        Ok(self.cache.signatures.get(key).copied())
    }

    fn save(&mut self, key: &str, sig: PersistedSignature) -> CoreResult<()> {
        self.cache.signatures.insert(key.to_string(), sig);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> CoreResult<()> {
        self.cache.signatures.remove(key);
        self.flush()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    exposure: Option<i32>,
}

/// Persists the pre-session camera-settings backup, restored best-effort
/// on session teardown. Only exposure is modeled here; a driver backing
/// store with a wider settings blob can still satisfy this trait.
pub struct JsonCameraSettingsStore {
    path: PathBuf,
}

impl JsonCameraSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraSettingsStore for JsonCameraSettingsStore {
    fn load(&self) -> CoreResult<Option<i32>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path).map_err(|e| CoreError::internal(e.to_string()))?;
        let file: SettingsFile = serde_json::from_slice(&bytes).unwrap_or_default();
        Ok(file.exposure)
    }

    fn save(&mut self, exposure: i32) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = SettingsFile { exposure: Some(exposure) };
        let bytes = serde_json::to_vec_pretty(&file)?;
        std::fs::write(&self.path, bytes).map_err(|e| CoreError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_signature() {
        let dir = std::env::temp_dir().join(format!("sphere-test-{}", std::process::id()));
        let path = dir.join("colors.json");
        let sig = PersistedSignature { assigned_rgb: [255, 0, 255], e_first_bgr: [200.0, 40.0, 210.0] };

        {
            let mut store = JsonColorStore::new(&path).unwrap();
            assert!(store.load("ctrl-1").unwrap().is_none());
            store.save("ctrl-1", sig).unwrap();
        }

        let store = JsonColorStore::new(&path).unwrap();
        assert_eq!(store.load("ctrl-1").unwrap(), Some(sig));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_settings_file_yields_none() {
        let dir = std::env::temp_dir().join(format!("sphere-test-settings-{}", std::process::id()));
        let path = dir.join("camera.json");
        let store = JsonCameraSettingsStore::new(&path);
        assert!(store.load().unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn settings_round_trip() {
        let dir = std::env::temp_dir().join(format!("sphere-test-settings2-{}", std::process::id()));
        let path = dir.join("camera.json");
        let mut store = JsonCameraSettingsStore::new(&path);
        store.save(2051).unwrap();
        assert_eq!(store.load().unwrap(), Some(2051));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
