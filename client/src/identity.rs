use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedIdentity {
    username: String,
}

/// Remembers the display name between runs.
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self {
            path: Self::resolve_path(),
        }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Option<String> {
        fs::read(&self.path)
            .ok()
            .and_then(|data| serde_json::from_slice::<PersistedIdentity>(&data).ok())
            .map(|identity| identity.username)
            .filter(|name| !name.trim().is_empty())
    }

    pub fn save(&self, username: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create identity directory")?;
        }
        let payload = serde_json::to_vec_pretty(&PersistedIdentity {
            username: username.to_string(),
        })?;
        fs::write(&self.path, payload).context("Failed to write identity file")?;
        Ok(())
    }

    /// Explicit override, then the stored name, then a freshly generated one
    /// that is stored for next time.
    pub fn resolve(&self, override_name: Option<String>) -> String {
        if let Some(name) = override_name.filter(|name| !name.trim().is_empty()) {
            return name;
        }
        if let Some(name) = self.load() {
            return name;
        }
        let name = generate_username();
        if let Err(e) = self.save(&name) {
            tracing::warn!("Could not persist display name: {:#}", e);
        }
        name
    }

    fn resolve_path() -> PathBuf {
        if let Some(dirs) = ProjectDirs::from("com", "watchparty", "Watchparty") {
            dirs.data_dir().join("identity.json")
        } else {
            env::temp_dir().join("watchparty-identity.json")
        }
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn generate_username() -> String {
    let n = Uuid::new_v4().as_u128() % 10_000;
    format!("User_{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> IdentityStore {
        let dir = env::temp_dir().join(format!("watchparty-identity-{}", Uuid::new_v4()));
        IdentityStore::at(dir.join("identity.json"))
    }

    #[test]
    fn generated_name_is_persisted() {
        let store = scratch_store();
        assert_eq!(store.load(), None);

        let first = store.resolve(None);
        assert!(first.starts_with("User_"));
        assert_eq!(store.resolve(None), first);
    }

    #[test]
    fn override_wins_without_touching_disk() {
        let store = scratch_store();
        store.save("stored").unwrap();

        assert_eq!(store.resolve(Some("picked".into())), "picked");
        assert_eq!(store.load().as_deref(), Some("stored"));
    }

    #[test]
    fn blank_override_is_ignored() {
        let store = scratch_store();
        store.save("stored").unwrap();
        assert_eq!(store.resolve(Some("  ".into())), "stored");
    }
}
