use crate::transport::error::RegistryError;
use crate::transport::{read, write};
use crate::types::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Binding that can be stored in a [`SessionRegistry`]
pub trait SessionBinding: Send + Sync + 'static {
    /// Current session id; `None` while the binding is still pending initialization
    fn session_id(&self) -> Option<SessionId>;
}

/// Binding whose session id may be reassigned after registration
pub trait AliasableBinding: SessionBinding {
    fn rebind_session_id(&self, session_id: SessionId);
}

/// Live sessions of one transport kind, keyed by session id.
///
/// Invariants: at most one binding per id, and every entry's binding reports
/// its registry key as its current session id. All mutations go through the
/// methods below; each runs under a single write lock.
pub struct SessionRegistry<B> {
    sessions: RwLock<HashMap<SessionId, Arc<B>>>,
}

impl<B> Default for SessionRegistry<B> {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl<B: SessionBinding> SessionRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bound binding under its own session id
    pub fn insert(&self, binding: Arc<B>) -> Result<SessionId, RegistryError> {
        let session_id = binding.session_id().ok_or(RegistryError::Pending)?;
        let mut sessions = write(&self.sessions);
        if sessions.contains_key(&session_id) {
            return Err(RegistryError::Occupied(session_id));
        }
        sessions.insert(session_id.clone(), binding);
        Ok(session_id)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<B>> {
        read(&self.sessions).get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        read(&self.sessions).contains_key(session_id)
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<Arc<B>> {
        write(&self.sessions).remove(session_id)
    }

    /// Removes whichever entry holds `binding`, whatever key it is under now
    pub fn remove_binding(&self, binding: *const B) -> bool {
        let mut sessions = write(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, existing| !std::ptr::eq(Arc::as_ptr(existing), binding));
        sessions.len() != before
    }

    pub fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.sessions).is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        read(&self.sessions).keys().cloned().collect()
    }
}

impl<B: AliasableBinding> SessionRegistry<B> {
    /// Moves the single live session from `old_id` to `new_id`.
    ///
    /// Preconditions, checked atomically: the registry holds exactly one
    /// entry, it is keyed `old_id`, and `new_id` differs from it. On success
    /// the binding's session id is rewritten to `new_id`. Returns false and
    /// leaves the registry untouched otherwise.
    pub fn rekey(&self, old_id: &SessionId, new_id: &SessionId) -> bool {
        let mut sessions = write(&self.sessions);
        Self::rekey_locked(&mut sessions, old_id, new_id).is_some()
    }

    /// Best-effort reconnection heuristic for single-tenant deployments.
    ///
    /// When exactly one session is live and `new_id` is unknown, re-keys that
    /// session to `new_id` and returns the superseded id with the binding.
    /// With several clients it cannot tell which one is reconnecting, so it
    /// refuses unless the registry size is exactly one.
    pub fn alias_sole_session(&self, new_id: &SessionId) -> Option<(SessionId, Arc<B>)> {
        let mut sessions = write(&self.sessions);
        let old_id = sessions.keys().next().cloned()?;
        let binding = Self::rekey_locked(&mut sessions, &old_id, new_id)?;
        Some((old_id, binding))
    }

    /// `rekey` under an already held write lock
    fn rekey_locked(
        sessions: &mut HashMap<SessionId, Arc<B>>,
        old_id: &SessionId,
        new_id: &SessionId,
    ) -> Option<Arc<B>> {
        if sessions.len() != 1 || old_id == new_id || !sessions.contains_key(old_id) {
            return None;
        }
        let binding = sessions.remove(old_id)?;
        binding.rebind_session_id(new_id.clone());
        sessions.insert(new_id.clone(), Arc::clone(&binding));
        Some(binding)
    }
}
