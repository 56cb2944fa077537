//! Durable per-user state behind an opaque load/save keyed by user id.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use tally_core::UserState;

pub trait StateStore: Send + Sync {
    /// Prior state for this user, if any was ever persisted
    fn load(&self, user_id: &str) -> Result<Option<UserState>>;
    fn save(&self, state: &UserState) -> Result<()>;
}

/// One pretty-printed JSON file per user under the data directory
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(user_id)))
    }
}

/// Keep user ids filesystem-safe without rejecting any of them
fn sanitize(user_id: &str) -> String {
    user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl StateStore for JsonFileStore {
    fn load(&self, user_id: &str) -> Result<Option<UserState>> {
        let p = self.path_for(user_id);
        if !p.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        let state =
            serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
        Ok(Some(state))
    }

    fn save(&self, state: &UserState) -> Result<()> {
        let p = self.path_for(&state.user_id);
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&p, json).with_context(|| format!("write {}", p.display()))?;
        Ok(())
    }
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, UserState>>,
}

impl StateStore for MemoryStore {
    fn load(&self, user_id: &str) -> Result<Option<UserState>> {
        let states = self
            .states
            .lock()
            .map_err(|_| anyhow!("state map poisoned"))?;
        Ok(states.get(user_id).cloned())
    }

    fn save(&self, state: &UserState) -> Result<()> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| anyhow!("state map poisoned"))?;
        states.insert(state.user_id.clone(), state.clone());
        Ok(())
    }
}
