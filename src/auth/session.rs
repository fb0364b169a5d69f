//! Session role resolution
//!
//! An authenticated identity becomes a [`Caller`] once its role claim has
//! been resolved. The claim is read from the user document exactly once per
//! session, with the standard retry policy; a claim that cannot be resolved
//! is treated as non-admin. Fail closed, never open.

use super::{AuthUser, Caller};
use crate::config::USERS_COLLECTION;
use crate::retry::RetryPolicy;
use crate::store::DocumentStore;
use serde_json::Value;
use std::sync::Arc;

/// An authenticated session with its resolved role claim.
pub struct Session {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    user: AuthUser,
    caller: Caller,
    role_resolved: bool,
}

impl Session {
    /// Resolve the role claim for `user` and establish the session.
    ///
    /// Never fails: an unreachable store leaves the session in place with
    /// admin denied until [`Session::network_restored`] succeeds.
    pub async fn establish(store: Arc<dyn DocumentStore>, user: AuthUser) -> Self {
        Self::establish_with_policy(store, user, RetryPolicy::default()).await
    }

    pub async fn establish_with_policy(
        store: Arc<dyn DocumentStore>,
        user: AuthUser,
        retry: RetryPolicy,
    ) -> Self {
        let (is_admin, role_resolved) = resolve_role(&store, &retry, &user.user_id).await;

        let caller = Caller {
            user_id: user.user_id.clone(),
            is_admin,
        };
        tracing::info!(
            user_id = %user.user_id,
            is_admin,
            role_resolved,
            "Session established"
        );

        Self {
            store,
            retry,
            user,
            caller,
            role_resolved,
        }
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn is_admin(&self) -> bool {
        self.caller.is_admin
    }

    /// Whether the role claim was actually read, as opposed to defaulted.
    pub fn role_resolved(&self) -> bool {
        self.role_resolved
    }

    /// Connectivity came back: retry a role claim that previously failed
    /// to resolve, instead of waiting on a timer.
    pub async fn network_restored(&mut self) {
        if self.role_resolved {
            return;
        }

        tracing::info!(user_id = %self.user.user_id, "Network restored, re-resolving role claim");
        let (is_admin, role_resolved) =
            resolve_role(&self.store, &self.retry, &self.user.user_id).await;
        self.caller.is_admin = is_admin;
        self.role_resolved = role_resolved;
    }
}

/// Read the `is_admin` claim from the user document.
///
/// Returns `(is_admin, resolved)`. A missing document or claim field is a
/// resolved non-admin; a store failure beyond the retry budget is an
/// unresolved non-admin.
async fn resolve_role(
    store: &Arc<dyn DocumentStore>,
    retry: &RetryPolicy,
    user_id: &str,
) -> (bool, bool) {
    let result = retry
        .run("resolve role claim", || {
            let store = store.clone();
            let user_id = user_id.to_string();
            async move { store.get(USERS_COLLECTION, &user_id).await }
        })
        .await;

    match result {
        Ok(Some(doc)) => {
            let is_admin = doc
                .fields
                .get("is_admin")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            (is_admin, true)
        }
        Ok(None) => (false, true),
        Err(err) => {
            tracing::warn!(user_id, error = %err, "Role claim unresolved, treating as non-admin");
            (false, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{Fields, MemoryStore};
    use serde_json::json;

    async fn user_with_claim(store: &MemoryStore, is_admin: bool) -> AuthUser {
        let mut fields = Fields::new();
        fields.insert("email".to_string(), json!("a@example.com"));
        fields.insert("is_admin".to_string(), json!(is_admin));
        let user_id = store.create(USERS_COLLECTION, fields).await.unwrap();
        AuthUser {
            user_id,
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn admin_claim_is_read_once() {
        let store = Arc::new(MemoryStore::new());
        let user = user_with_claim(&store, true).await;

        let session = Session::establish(store, user).await;
        assert!(session.is_admin());
        assert!(session.role_resolved());
    }

    #[tokio::test]
    async fn missing_user_document_is_non_admin() {
        let store = Arc::new(MemoryStore::new());
        let user = AuthUser {
            user_id: "ghost".to_string(),
            email_verified: false,
        };

        let session = Session::establish(store, user).await;
        assert!(!session.is_admin());
        assert!(session.role_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_store_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        let user = user_with_claim(&store, true).await;

        // Exhaust the whole retry budget
        for _ in 0..3 {
            store.fail_next(StoreError::Transient("client is offline".to_string()));
        }

        let session = Session::establish(store, user).await;
        assert!(!session.is_admin());
        assert!(!session.role_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn network_restored_recovers_the_claim() {
        let store = Arc::new(MemoryStore::new());
        let user = user_with_claim(&store, true).await;

        for _ in 0..3 {
            store.fail_next(StoreError::Transient("unavailable".to_string()));
        }
        let mut session = Session::establish(store, user).await;
        assert!(!session.is_admin());

        session.network_restored().await;
        assert!(session.is_admin());
        assert!(session.role_resolved());

        // A second signal with nothing to do is a no-op
        session.network_restored().await;
        assert!(session.is_admin());
    }
}
