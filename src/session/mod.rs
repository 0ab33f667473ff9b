//! Session module - conversation state and persistence
//!
//! Sessions are cached in memory and, optionally, persisted as one JSON
//! file per session key.
//!
//! # Example
//!
//! ```
//! use clawgate::session::{Message, SessionManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = SessionManager::new_memory();
//!
//!     let mut session = manager.get_or_create("telegram:chat123").await.unwrap();
//!     session.add_message(Message::user("Hello!"));
//!     session.add_message(Message::assistant("Hi there!"));
//!     manager.save(&session).await.unwrap();
//!
//!     assert!(manager.exists("telegram:chat123").await);
//! }
//! ```

pub mod types;

pub use types::{Message, Role, Session, ToolCall};

use crate::config::Config;
use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Session store with an in-memory cache and optional file persistence.
///
/// Cloning shares the underlying cache.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    storage_path: Option<PathBuf>,
}

impl SessionManager {
    /// Create a manager persisting to `~/.clawgate/sessions/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions directory cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_path(Config::dir().join("sessions"))
    }

    /// Create an in-memory session manager without persistence.
    pub fn new_memory() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            storage_path: None,
        }
    }

    /// Create a manager persisting to `path`, creating it if missing.
    ///
    /// # Example
    /// ```no_run
    /// use clawgate::session::SessionManager;
    /// use std::path::PathBuf;
    ///
    /// let manager = SessionManager::with_path(PathBuf::from("/tmp/sessions")).unwrap();
    /// assert!(manager.storage_path().is_some());
    /// ```
    pub fn with_path(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(path),
        })
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    fn file_for(&self, key: &str) -> Option<PathBuf> {
        self.storage_path
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", sanitize_key(key))))
    }

    async fn load_from_disk(&self, key: &str) -> Result<Option<Session>> {
        let Some(file_path) = self.file_for(key) else {
            return Ok(None);
        };
        if !file_path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&file_path).await?;
        let session: Session = serde_json::from_str(&content)?;
        debug!(session_key = %key, messages = session.messages.len(), "Loaded session from disk");

        let mut sessions = self.sessions.write().await;
        sessions.insert(key.to_string(), session.clone());
        Ok(Some(session))
    }

    /// Get an existing session (memory, then disk) or create a new one.
    pub async fn get_or_create(&self, key: &str) -> Result<Session> {
        if let Some(session) = self.get(key).await? {
            return Ok(session);
        }

        let mut sessions = self.sessions.write().await;
        // Another task may have created it while the lock was released.
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key))
            .clone();
        Ok(session)
    }

    /// Get a session by key without creating it.
    pub async fn get(&self, key: &str) -> Result<Option<Session>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(key) {
                return Ok(Some(session.clone()));
            }
        }
        self.load_from_disk(key).await
    }

    /// Save a session to memory and, when persistence is enabled, to disk.
    pub async fn save(&self, session: &Session) -> Result<()> {
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session.key.clone(), session.clone());
        }

        if let Some(file_path) = self.file_for(&session.key) {
            let content = serde_json::to_string_pretty(session)?;
            tokio::fs::write(&file_path, content).await?;
        }

        Ok(())
    }

    /// Delete a session from memory and disk.
    pub async fn delete(&self, key: &str) -> Result<()> {
        {
            let mut sessions = self.sessions.write().await;
            sessions.remove(key);
        }

        if let Some(file_path) = self.file_for(key) {
            if file_path.exists() {
                tokio::fs::remove_file(&file_path).await?;
            }
        }

        Ok(())
    }

    /// List all session keys, sorted, from memory and disk.
    ///
    /// Keys on disk are read from the files themselves, so keys with
    /// characters that were escaped in the file name come back intact.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions.keys().cloned().collect()
        };

        if let Some(ref storage_path) = self.storage_path {
            let mut dir_entries = tokio::fs::read_dir(storage_path).await?;
            while let Some(entry) = dir_entries.next_entry().await? {
                let path = entry.path();
                if path.extension().map(|e| e != "json").unwrap_or(true) {
                    continue;
                }
                let Ok(content) = tokio::fs::read_to_string(&path).await else {
                    continue;
                };
                if let Ok(session) = serde_json::from_str::<Session>(&content) {
                    if !keys.contains(&session.key) {
                        keys.push(session.key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Check whether a session exists in memory or on disk.
    pub async fn exists(&self, key: &str) -> bool {
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(key) {
                return true;
            }
        }
        self.file_for(key).map(|p| p.exists()).unwrap_or(false)
    }

    /// Pin a session to a model alias, or clear the pin with `None`.
    ///
    /// The session is created if it does not exist yet.
    pub async fn set_model_override(&self, key: &str, model: Option<String>) -> Result<()> {
        let mut session = self.get_or_create(key).await?;
        session.model_override = model;
        session.updated_at = chrono::Utc::now();
        self.save(&session).await
    }

    /// Drop the in-memory cache; persisted sessions are untouched.
    pub async fn clear_cache(&self) {
        self.sessions.write().await.clear();
    }

    pub async fn cache_size(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new_memory()
    }
}

/// Percent-encode characters that are unsafe in file names.
///
/// `%` is escaped too, so distinct keys never share a file.
fn sanitize_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len() * 3);
    for c in key.chars() {
        match c {
            '/' => result.push_str("%2F"),
            '\\' => result.push_str("%5C"),
            ':' => result.push_str("%3A"),
            '*' => result.push_str("%2A"),
            '?' => result.push_str("%3F"),
            '"' => result.push_str("%22"),
            '<' => result.push_str("%3C"),
            '>' => result.push_str("%3E"),
            '|' => result.push_str("%7C"),
            '%' => result.push_str("%25"),
            c => result.push(c),
        }
    }
    result
}
