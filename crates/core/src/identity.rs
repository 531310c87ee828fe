use anyhow::{Context, Result};
use rand::Rng;
use std::fmt;
use std::path::PathBuf;

/// Opaque identifier for one conversation thread.
///
/// Replaced wholesale on `adopt`, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        SessionId(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

/// Mints a fresh session identifier.
///
/// Contract: 128 bits of randomness rendered as a UUIDv4-formatted string in
/// lowercase hex, `8-4-4-4-12` grouping, with the version nibble fixed to `4`
/// and the variant nibble constrained to `8..=b`.
pub fn mint_session_id() -> SessionId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    SessionId(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32],
    ))
}

/// Durable storage for the single active-session key.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityStore {
    fn load(&self) -> Result<Option<SessionId>>;
    fn save(&self, id: &SessionId) -> Result<()>;
}

/// File-backed store holding the identifier as one plain string, keyed
/// independently of any other application data.
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Places the key under the user configuration directory, falling back to
    /// a dotfile in the working directory when no such directory exists.
    pub fn in_user_config_dir() -> Self {
        let path = dirs::config_dir()
            .map(|dir| dir.join("alim").join("session_id"))
            .unwrap_or_else(|| PathBuf::from(".alim_session_id"));
        Self { path }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<SessionId>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(SessionId::from(trimmed)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("failed to read the persisted session id"),
        }
    }

    fn save(&self, id: &SessionId) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create the session id directory")?;
        }
        std::fs::write(&self.path, id.as_str())
            .context("failed to persist the session id")
    }
}

/// Owns the active session identifier.
///
/// Storage unavailability degrades to an in-memory-only identifier for the
/// lifetime of the process; it is never an error.
pub struct SessionIdentity<S> {
    store: S,
    current: Option<SessionId>,
}

impl<S: IdentityStore> SessionIdentity<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Reads the persisted identifier, minting and persisting a fresh one
    /// when absent. Returns the identifier and whether it was newly minted.
    /// Resolving twice without an `adopt` in between returns the same id.
    pub fn resolve(&mut self) -> (SessionId, bool) {
        if let Some(id) = &self.current {
            return (id.clone(), false);
        }
        match self.store.load() {
            Ok(Some(id)) => {
                self.current = Some(id.clone());
                (id, false)
            }
            Ok(None) => (self.mint_and_persist(), true),
            Err(e) => {
                tracing::warn!("session id store unavailable, using in-memory id: {e:#}");
                let id = mint_session_id();
                self.current = Some(id.clone());
                (id, true)
            }
        }
    }

    /// Overwrites the persisted and in-memory identifier. Used when the user
    /// switches to an existing session or starts a new conversation.
    pub fn adopt(&mut self, id: SessionId) {
        if let Err(e) = self.store.save(&id) {
            tracing::warn!("failed to persist session id, keeping it in memory: {e:#}");
        }
        self.current = Some(id);
    }

    pub fn current(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    fn mint_and_persist(&mut self) -> SessionId {
        let id = mint_session_id();
        if let Err(e) = self.store.save(&id) {
            tracing::warn!("failed to persist freshly minted session id: {e:#}");
        }
        self.current = Some(id.clone());
        id
    }
}
