//! Identity provider collaborator contract
//!
//! Authentication itself is delegated to an external identity provider;
//! this module defines the trait the lifecycle core is written against,
//! the resolved caller context passed into every note operation, and a
//! local implementation for tests and offline use.

pub mod local;
pub mod session;

pub use local::LocalProvider;
pub use session::Session;

use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::sync::watch;

/// Stable user identifier issued by the identity provider.
pub type UserId = String;

/// An authenticated identity as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email_verified: bool,
}

/// Profile details captured at registration.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
}

/// Resolved caller context passed explicitly into every lifecycle call.
///
/// No ambient session lookups: whoever holds a `Caller` has already been
/// authenticated and had their role claim resolved (see [`Session`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    pub(crate) fn require_identity(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::Unauthenticated);
        }
        Ok(())
    }
}

/// Abstract identity provider consumed by the application.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account and return the new user's identifier.
    async fn register(&self, email: &str, password: &str, profile: Profile) -> Result<UserId>;

    /// Verify credentials and open a session.
    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthUser>;

    /// Deliver an email-verification challenge for the given user.
    async fn send_verification(&self, user_id: &str) -> Result<()>;

    /// Close the current session.
    async fn sign_out(&self);

    /// Session-change notification: the receiver holds the current identity
    /// (or `None`) and updates whenever session state changes.
    fn watch(&self) -> watch::Receiver<Option<AuthUser>>;
}
