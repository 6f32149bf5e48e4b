//! Flow-state carriers: make the verifier recoverable on the return leg even
//! when that leg runs in a different process than the one that started the
//! flow. Each carrier is a named `put`/`get`/`delete` store; the chain is
//! tried in priority order and the first hit wins — no quorum, no
//! cross-validation beyond the later challenge check in the flow.

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    anyhow::Result,
    tracing::{debug, warn},
};

use crate::{config_dir::sfdup_config_dir, types::FlowState};

/// Verifiers older than this are refused by the durable carrier, so a stale
/// flow cannot be replayed indefinitely.
pub const FLOW_STATE_TTL_SECS: u64 = 600;

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub trait Carrier: Send + Sync {
    fn name(&self) -> &'static str;
    fn put(&self, state: &FlowState) -> Result<()>;
    fn get(&self) -> Option<FlowState>;
    fn delete(&self);
}

fn write_state(path: &Path, state: &FlowState) -> Result<()> {
    let data = serde_json::to_string(state)?;
    std::fs::write(path, &data)?;

    // Set file permissions to 0600 on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

fn read_state(path: &Path) -> Option<FlowState> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

/// Session-scoped carrier: a file in the login-session runtime directory
/// (`$XDG_RUNTIME_DIR`, tmpfs on most Linux systems), gone when the session
/// ends. The ephemeral end of the scope ladder.
#[derive(Debug, Clone)]
pub struct SessionCarrier {
    path: PathBuf,
}

impl SessionCarrier {
    pub fn new() -> Self {
        let dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            path: dir.join("sfdup-flow.json"),
        }
    }

    /// Create a carrier at a specific path (useful for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Default for SessionCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Carrier for SessionCarrier {
    fn name(&self) -> &'static str {
        "session"
    }

    fn put(&self, state: &FlowState) -> Result<()> {
        write_state(&self.path, state)
    }

    fn get(&self) -> Option<FlowState> {
        read_state(&self.path)
    }

    fn delete(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Durable carrier: a file under the user config dir. Survives process and
/// terminal boundaries, but entries expire after [`FLOW_STATE_TTL_SECS`] —
/// expired state is treated as absent and removed on read.
#[derive(Debug, Clone)]
pub struct ConfigDirCarrier {
    path: PathBuf,
}

impl ConfigDirCarrier {
    pub fn new() -> Self {
        Self {
            path: sfdup_config_dir().join("pending_flow.json"),
        }
    }

    /// Create a carrier at a specific path (useful for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Default for ConfigDirCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Carrier for ConfigDirCarrier {
    fn name(&self) -> &'static str {
        "config-dir"
    }

    fn put(&self, state: &FlowState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_state(&self.path, state)
    }

    fn get(&self) -> Option<FlowState> {
        let state = read_state(&self.path)?;
        if unix_now().saturating_sub(state.created_at) > FLOW_STATE_TTL_SECS {
            debug!("stored flow state expired, discarding");
            self.delete();
            return None;
        }
        Some(state)
    }

    fn delete(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Prioritized chain of carriers. Writes are best-effort across all of them;
/// reads return the first non-empty result.
pub struct FlowStore {
    carriers: Vec<Box<dyn Carrier>>,
}

impl FlowStore {
    pub fn new() -> Self {
        Self {
            carriers: vec![
                Box::new(SessionCarrier::new()),
                Box::new(ConfigDirCarrier::new()),
            ],
        }
    }

    pub fn with_carriers(carriers: Vec<Box<dyn Carrier>>) -> Self {
        Self { carriers }
    }

    /// Write `state` to every carrier, unconditionally replacing whatever a
    /// prior attempt left behind. Individual failures are logged, not fatal.
    /// Returns how many carriers accepted the write.
    pub fn put(&self, state: &FlowState) -> usize {
        let mut written = 0;
        for carrier in &self.carriers {
            match carrier.put(state) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(carrier = carrier.name(), error = %e, "flow-state write failed");
                },
            }
        }
        written
    }

    /// First hit wins; any single carrier producing a value is authoritative.
    pub fn get(&self) -> Option<FlowState> {
        for carrier in &self.carriers {
            if let Some(state) = carrier.get() {
                debug!(carrier = carrier.name(), "flow state recovered");
                return Some(state);
            }
        }
        None
    }

    /// Delete the state from every carrier (not merely overwrite-on-next-use).
    pub fn clear(&self) {
        for carrier in &self.carriers {
            carrier.delete();
        }
    }
}

impl Default for FlowStore {
    fn default() -> Self {
        Self::new()
    }
}
