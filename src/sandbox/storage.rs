//! Sandbox session storage - JSON file persistence
//!
//! The store is a single JSON document mapping session keys to the remote run
//! they are attached to. It is loaded once per invocation, mutated in memory
//! and written back explicitly. There is no cross-process locking: two
//! invocations saving at the same time race and the last writer wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::key::{self, SessionKey};

pub const SESSIONS_FILE: &str = "sandboxes.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSession {
    pub run_id: String,
    pub config_file: String,
}

impl SandboxSession {
    pub fn new(run_id: &str, config_file: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            config_file: config_file.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageFile {
    #[serde(default)]
    sandboxes: Option<BTreeMap<String, SandboxSession>>,
}

#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    sandboxes: BTreeMap<String, SandboxSession>,
}

impl SessionStore {
    pub fn default_path() -> Result<PathBuf> {
        Ok(crate::config::get_app_dir()?.join(SESSIONS_FILE))
    }

    /// Load the store from its default location under the app directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path()?)
    }

    /// Load the store from `path`. A missing or blank file is an empty store.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            sandboxes: BTreeMap::new(),
        };

        if !store.path.exists() {
            return Ok(store);
        }

        let content = fs::read_to_string(&store.path)
            .with_context(|| format!("unable to read {}", store.path.display()))?;
        if content.trim().is_empty() {
            return Ok(store);
        }

        let file: StorageFile = serde_json::from_str(&content).with_context(|| {
            format!(
                "unable to parse sandbox sessions file {}",
                store.path.display()
            )
        })?;
        store.sandboxes = file.sandboxes.unwrap_or_default();
        debug!(
            "Loaded {} sandbox session(s) from {}",
            store.sandboxes.len(),
            store.path.display()
        );

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the store back to disk. The document is written to a sibling
    /// temp file and renamed over the old one.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("unable to create {}", dir.display()))?;

        let file = StorageFile {
            sandboxes: Some(self.sandboxes.clone()),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("unable to write {}", self.path.display()))?;

        Ok(())
    }

    pub fn get(&self, cwd: &str, branch: &str, config_file: &str) -> Option<&SandboxSession> {
        self.sandboxes.get(&key::encode(cwd, branch, config_file))
    }

    pub fn set(&mut self, cwd: &str, branch: &str, config_file: &str, session: SandboxSession) {
        self.sandboxes
            .insert(key::encode(cwd, branch, config_file), session);
    }

    pub fn delete(&mut self, cwd: &str, branch: &str, config_file: &str) -> Option<SandboxSession> {
        self.sandboxes
            .remove(&key::encode(cwd, branch, config_file))
    }

    /// Every session recorded for `cwd` on `branch`, whatever its config file.
    pub fn get_all_for_cwd_branch(&self, cwd: &str, branch: &str) -> Vec<(SessionKey, SandboxSession)> {
        let prefix = key::cwd_branch_prefix(cwd, branch);
        self.sandboxes
            .iter()
            .filter(|(k, _)| {
                k.strip_prefix(&prefix)
                    .is_some_and(|config_file| !config_file.contains(':'))
            })
            .map(|(k, session)| (SessionKey::decode(k), session.clone()))
            .collect()
    }

    pub fn find_by_run_id(&self, run_id: &str) -> Option<(SessionKey, SandboxSession)> {
        self.sandboxes
            .iter()
            .find(|(_, session)| session.run_id == run_id)
            .map(|(k, session)| (SessionKey::decode(k), session.clone()))
    }

    pub fn delete_by_run_id(&mut self, run_id: &str) -> Option<(SessionKey, SandboxSession)> {
        let raw_key = self
            .sandboxes
            .iter()
            .find(|(_, session)| session.run_id == run_id)
            .map(|(k, _)| k.clone())?;
        let session = self.sandboxes.remove(&raw_key)?;
        Some((SessionKey::decode(&raw_key), session))
    }

    pub fn entries(&self) -> Vec<(SessionKey, SandboxSession)> {
        self.sandboxes
            .iter()
            .map(|(k, session)| (SessionKey::decode(k), session.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.is_empty()
    }
}
