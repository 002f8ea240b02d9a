//! Server-side session state

use crate::database::RoleDefinition;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One authenticated server session
///
/// Settings live as long as the session; the pool resets them when the
/// connection is returned.
#[derive(Debug)]
pub struct Session {
    id: u64,
    role: Arc<RoleDefinition>,
    settings: Mutex<HashMap<String, String>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn open(id: u64, role: Arc<RoleDefinition>) -> Self {
        Self {
            id,
            role,
            settings: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Session id
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Role the session authenticated as
    #[inline]
    #[must_use]
    pub fn role(&self) -> &RoleDefinition {
        &self.role
    }

    /// `current_setting(name, true)`
    #[must_use]
    pub fn setting(&self, name: &str) -> Option<String> {
        self.settings.lock().get(name).cloned()
    }

    pub(crate) fn set(&self, name: &str, value: &str) {
        self.settings.lock().insert(name.to_string(), value.to_string());
    }

    /// `RESET ALL`
    pub(crate) fn reset(&self) {
        self.settings.lock().clear();
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the server terminated this session
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
