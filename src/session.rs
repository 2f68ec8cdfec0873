//! Authentication session: token persistence and session-loss notification.
//!
//! The token is re-read from its store before every request. When the server
//! answers `401` the API client calls [`AuthSession::expire`], which purges the
//! token and publishes [`SessionState::Expired`] to every subscriber; the
//! transport itself never decides what the view does next.
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, token: &str) -> io::Result<()>;
    fn clear(&self) -> io::Result<()>;
}

/// Token persisted as a single line in a file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let token = raw.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    fn save(&self, token: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, token)
    }

    fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.token
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|t| !t.is_empty())
    }

    fn save(&self, token: &str) -> io::Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "token store poisoned"))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "token store poisoned"))?;
        *guard = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    SignedIn,
    /// The server rejected the token; the user must sign in again.
    Expired,
}

#[derive(Clone)]
pub struct AuthSession {
    store: Arc<dyn TokenStore>,
    state: Arc<watch::Sender<SessionState>>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        let initial = if store.load().is_some() {
            SessionState::SignedIn
        } else {
            SessionState::SignedOut
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            store,
            state: Arc::new(tx),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTokenStore::default()))
    }

    /// Current token, read from the store on every call.
    pub fn token(&self) -> Option<String> {
        self.store.load()
    }

    pub fn sign_in(&self, token: &str) -> io::Result<()> {
        self.store.save(token)?;
        self.state.send_replace(SessionState::SignedIn);
        info!("session started");
        Ok(())
    }

    pub fn sign_out(&self) -> io::Result<()> {
        self.store.clear()?;
        self.state.send_replace(SessionState::SignedOut);
        info!("session closed");
        Ok(())
    }

    /// Drop the token after the server refused it.
    pub fn expire(&self) {
        if let Err(err) = self.store.clear() {
            warn!(?err, "failed to clear expired token");
        }
        self.state.send_replace(SessionState::Expired);
        warn!("session expired; sign in again");
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}
