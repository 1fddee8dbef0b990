//! Authentication collaborator

use parking_lot::RwLock;

/// The signed-in user as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

/// Source of the current session; `None` means nobody is signed in
pub trait SessionProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
}

/// Session holder that the embedding application updates on sign-in/out
#[derive(Debug, Default)]
pub struct StaticSession {
    current: RwLock<Option<Session>>,
}

impl StaticSession {
    pub fn signed_in(session: Session) -> Self {
        Self {
            current: RwLock::new(Some(session)),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, session: Session) {
        *self.current.write() = Some(session);
    }

    pub fn sign_out(&self) {
        *self.current.write() = None;
    }
}

impl SessionProvider for StaticSession {
    fn current_session(&self) -> Option<Session> {
        self.current.read().clone()
    }
}
