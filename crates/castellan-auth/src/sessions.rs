//! In-memory session table with idle expiry.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::model::{Role, Session};
use crate::secret::generate_token;

#[derive(Debug, Clone)]
struct Entry {
    username: String,
    role: Role,
    last_seen: Instant,
}

#[derive(Debug)]
pub(crate) struct SessionTable {
    idle: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SessionTable {
    pub(crate) fn new(idle: Duration) -> Self {
        Self {
            idle,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn issue(&self, username: &str, role: Role) -> Session {
        let token = generate_token();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle);
        entries.insert(
            token.clone(),
            Entry {
                username: username.to_string(),
                role,
                last_seen: now,
            },
        );
        Session {
            token,
            username: username.to_string(),
            role,
        }
    }

    /// Look up a token and refresh its idle timer.
    pub(crate) fn touch(&self, token: &str) -> Option<Session> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let entry = entries.get_mut(token)?;
        if now.duration_since(entry.last_seen) >= self.idle {
            entries.remove(token);
            return None;
        }
        entry.last_seen = now;
        Some(Session {
            token: token.to_string(),
            username: entry.username.clone(),
            role: entry.role,
        })
    }

    pub(crate) fn revoke(&self, token: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }

    pub(crate) fn revoke_user(&self, username: &str) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.username != username);
        before - entries.len()
    }

    pub(crate) fn set_role(&self, username: &str, role: Role) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values_mut().filter(|entry| entry.username == username) {
            entry.role = role;
        }
    }
}
