//! Role overrides set with `/role`, kept across restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::agent::AgentRegistry;
use crate::error::RelayError;
use crate::persist::write_json_atomic;

/// Role text by canonical agent id, backed by a JSON object on disk.
///
/// Entries for agents that are not registered right now are kept, so an
/// agent whose provider comes back later gets its role again.
pub struct RoleStore {
    path: PathBuf,
    overrides: BTreeMap<String, String>,
}

impl RoleStore {
    /// Read overrides from `path`. A missing file is an empty store; a file
    /// that cannot be read or parsed is logged and ignored.
    pub fn open(path: &Path) -> Self {
        let overrides = match std::fs::read_to_string(path) {
            Ok(contents) => parse_overrides(&contents).unwrap_or_else(|e| {
                warn!("Ignoring roles file {}: {e}", path.display());
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Cannot read roles file {}: {e}", path.display());
                BTreeMap::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            overrides,
        }
    }

    /// Apply saved roles to registered agents. Saved keys match agent ids
    /// case-insensitively and are re-keyed to the registered spelling.
    /// Returns how many agents took a saved role.
    pub fn apply(&mut self, registry: &mut AgentRegistry) -> usize {
        let mut applied = 0;
        for (key, role) in std::mem::take(&mut self.overrides) {
            let id = match registry.resolve(&key) {
                Some(id) => id.to_string(),
                None => {
                    debug!("No registered agent for saved role of '{key}'");
                    self.overrides.insert(key, role);
                    continue;
                }
            };
            if registry.set_role(&id, &role).is_ok() {
                applied += 1;
            }
            self.overrides.insert(id, role);
        }
        if applied > 0 {
            info!("Applied {applied} saved roles");
        }
        applied
    }

    /// Saved role for a canonical agent id.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.overrides.get(id).map(String::as_str)
    }

    /// Remember `role` for `id` and write the file. Returns false, without
    /// touching the file, when the role is unchanged.
    pub fn record(&mut self, id: &str, role: &str) -> Result<bool, RelayError> {
        if self.get(id) == Some(role) {
            return Ok(false);
        }
        // Drop differently-cased leftovers of the same agent.
        self.overrides
            .retain(|key, _| key == id || !key.eq_ignore_ascii_case(id));
        self.overrides.insert(id.to_string(), role.to_string());
        write_json_atomic(&self.path, &self.overrides)?;
        Ok(true)
    }
}

fn parse_overrides(contents: &str) -> Result<BTreeMap<String, String>, serde_json::Error> {
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut overrides: BTreeMap<String, String> = serde_json::from_str(contents)?;
    overrides.retain(|_, role| !role.trim().is_empty());
    Ok(overrides)
}
