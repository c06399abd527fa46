use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::sync::Mutex;

use doas_common::{PersistedState, RuntimeConfig};

/// JSON files under the data directory: runtime config and engine state.
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("DOAS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.doas"));
        Self::at(data_dir)
    }

    pub fn at(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("malformed {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn load_state(&self) -> anyhow::Result<PersistedState> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.state_path.as_ref()).await {
            Ok(raw) => PersistedState::from_json(&raw)
                .with_context(|| format!("malformed {}", self.state_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes to a sibling temp file and renames it over the old state.
    pub async fn save_state(&self, state: &PersistedState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.state_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("json.tmp");
        let payload = state.to_json()?;
        tokio::fs::write(&staging, payload)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, &path)
            .await
            .with_context(|| format!("failed to commit {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("doas-store-{}-{name}", std::process::id()))
    }

    #[tokio::test]
    async fn missing_files_load_defaults() {
        let dir = scratch_dir("missing");
        let _ = std::fs::remove_dir_all(&dir);
        let store = AppStore::at(dir.clone());

        let runtime = store.load_runtime_config().await.unwrap();
        assert_eq!(runtime.tick_interval_ms, RuntimeConfig::default().tick_interval_ms);
        assert_eq!(store.load_state().await.unwrap(), PersistedState::default());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn state_round_trips_through_disk() {
        let dir = scratch_dir("round-trip");
        let store = AppStore::at(dir.clone());
        let state = PersistedState {
            low_temp_since: Some(Utc.with_ymd_and_hms(2026, 1, 5, 6, 30, 0).unwrap()),
            dehumidifying: true,
            ..PersistedState::default()
        };

        store.save_state(&state).await.unwrap();
        assert!(!dir.join("state.json.tmp").exists());

        let reopened = AppStore::at(dir.clone());
        assert_eq!(reopened.load_state().await.unwrap(), state);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn malformed_state_is_an_error() {
        let dir = scratch_dir("malformed");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("state.json"), b"{not json").unwrap();

        let store = AppStore::at(dir.clone());
        assert!(store.load_state().await.is_err());

        let _ = std::fs::remove_dir_all(dir);
    }
}
