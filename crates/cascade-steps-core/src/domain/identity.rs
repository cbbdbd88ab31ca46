//! Caller identity propagation.
//!
//! The current principal is thread-local state. This is the one ambient
//! boundary in the crate: executions read [`Principal::current`] on the
//! controlling thread before handing work off, and re-establish it inside the
//! worker with [`impersonate`], whose guard restores the previous principal
//! when dropped.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

/// Identity on whose behalf code runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Principal {
    /// The runtime itself
    System,
    /// An unauthenticated caller
    Anonymous,
    /// A named user
    User(String),
}

thread_local! {
    static CURRENT: RefCell<Principal> = RefCell::new(Principal::System);
}

impl Principal {
    /// The principal of the calling thread
    pub fn current() -> Principal {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Display name of the principal
    pub fn name(&self) -> &str {
        match self {
            Principal::System => "SYSTEM",
            Principal::Anonymous => "anonymous",
            Principal::User(name) => name,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Restores the previous principal on drop. Not `Send`: it must be dropped on
/// the thread that created it.
#[must_use = "the principal is restored as soon as the guard is dropped"]
pub struct PrincipalGuard {
    previous: Option<Principal>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for PrincipalGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|current| *current.borrow_mut() = previous);
        }
    }
}

/// Run as `principal` until the returned guard is dropped
pub fn impersonate(principal: Principal) -> PrincipalGuard {
    let previous = CURRENT.with(|current| current.replace(principal));
    PrincipalGuard {
        previous: Some(previous),
        _not_send: PhantomData,
    }
}

/// Put a freshly started worker thread into a known state
pub(crate) fn reset_thread_identity() {
    CURRENT.with(|current| *current.borrow_mut() = Principal::System);
}
