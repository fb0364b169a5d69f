//! Local identity provider
//!
//! Stores accounts in the document store's `users` collection with
//! Argon2id-hashed passwords. Used by tests and the demo binary; a hosted
//! identity provider slots in behind the same [`IdentityProvider`] trait.

use super::{AuthUser, IdentityProvider, Profile, UserId};
use crate::config::{MIN_PASSWORD_LENGTH, USERS_COLLECTION};
use crate::error::{Error, Result, StoreError};
use crate::store::{server_timestamp, DocumentStore, Fields, Filter};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;

/// Identity provider backed by the document store.
pub struct LocalProvider {
    store: Arc<dyn DocumentStore>,
    session_tx: watch::Sender<Option<AuthUser>>,
}

impl LocalProvider {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (session_tx, _) = watch::channel(None);
        Self { store, session_tx }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<crate::store::Document>> {
        let matches = self
            .store
            .query(USERS_COLLECTION, &[Filter::eq("email", email)])
            .await?;
        Ok(matches.into_iter().next())
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Store(StoreError::Terminal(format!("password hashing failed: {}", e))))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| Error::Store(StoreError::Terminal(format!("corrupt password hash: {}", e))))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[async_trait]
impl IdentityProvider for LocalProvider {
    async fn register(&self, email: &str, password: &str, profile: Profile) -> Result<UserId> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(Error::Validation("invalid email address".to_string()));
        }
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if self.find_by_email(&email).await?.is_some() {
            return Err(Error::Validation("email already registered".to_string()));
        }

        let fields = object_fields(json!({
            "email": email,
            "password_hash": hash_password(password)?,
            "first_name": profile.first_name,
            "last_name": profile.last_name,
            "email_verified": false,
            "is_admin": false,
            "created_at": server_timestamp(),
        }));

        let user_id = self.store.create(USERS_COLLECTION, fields).await?;
        tracing::info!(user_id = %user_id, "Registered new user");
        Ok(user_id)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = email.trim().to_lowercase();
        // Unknown email and wrong password are indistinguishable on purpose.
        let doc = self
            .find_by_email(&email)
            .await?
            .ok_or(Error::Unauthenticated)?;

        let stored_hash = doc
            .fields
            .get("password_hash")
            .and_then(Value::as_str)
            .ok_or(Error::Unauthenticated)?;
        if !verify_password(password, stored_hash)? {
            return Err(Error::Unauthenticated);
        }

        let user = AuthUser {
            user_id: doc.id,
            email_verified: doc
                .fields
                .get("email_verified")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        self.session_tx.send_replace(Some(user.clone()));
        tracing::info!(user_id = %user.user_id, "User authenticated");
        Ok(user)
    }

    async fn send_verification(&self, user_id: &str) -> Result<()> {
        // No mail transport locally; verification completes immediately.
        let mut fields = Fields::new();
        fields.insert("email_verified".to_string(), Value::Bool(true));
        self.store.update(USERS_COLLECTION, user_id, fields).await?;

        tracing::info!(user_id, "Verification recorded");
        Ok(())
    }

    async fn sign_out(&self) {
        self.session_tx.send_replace(None);
        tracing::info!("User signed out");
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.session_tx.subscribe()
    }
}

fn object_fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("json! object literal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    fn provider() -> LocalProvider {
        LocalProvider::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn register_and_authenticate() {
        let provider = provider();

        let user_id = provider
            .register(
                "Amira@example.com",
                "hunter22",
                Profile {
                    first_name: "Amira".to_string(),
                    last_name: "Hassan".to_string(),
                },
            )
            .await
            .unwrap();

        // Email matching is case-insensitive
        let user = provider
            .authenticate("amira@EXAMPLE.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(user.user_id, user_id);
        assert!(!user.email_verified);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_identical() {
        let provider = provider();
        provider
            .register("a@example.com", "correct-horse", Profile::default())
            .await
            .unwrap();

        let wrong_pw = provider
            .authenticate("a@example.com", "battery-staple")
            .await
            .unwrap_err();
        let unknown = provider
            .authenticate("b@example.com", "battery-staple")
            .await
            .unwrap_err();

        assert_eq!(wrong_pw.kind(), ErrorKind::Unauthenticated);
        assert_eq!(unknown.kind(), ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let provider = provider();
        provider
            .register("a@example.com", "password1", Profile::default())
            .await
            .unwrap();

        let err = provider
            .register("a@example.com", "password2", Profile::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn invalid_registrations_are_rejected() {
        let provider = provider();

        let err = provider
            .register("not-an-email", "password1", Profile::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = provider
            .register("a@example.com", "short", Profile::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn verification_flips_the_claim() {
        let provider = provider();
        let user_id = provider
            .register("a@example.com", "password1", Profile::default())
            .await
            .unwrap();

        provider.send_verification(&user_id).await.unwrap();

        let user = provider
            .authenticate("a@example.com", "password1")
            .await
            .unwrap();
        assert!(user.email_verified);
    }

    #[tokio::test]
    async fn session_watch_tracks_sign_in_and_out() {
        let provider = provider();
        let rx = provider.watch();
        assert!(rx.borrow().is_none());

        provider
            .register("a@example.com", "password1", Profile::default())
            .await
            .unwrap();
        let user = provider
            .authenticate("a@example.com", "password1")
            .await
            .unwrap();
        assert_eq!(rx.borrow().as_ref(), Some(&user));

        provider.sign_out().await;
        assert!(rx.borrow().is_none());
    }
}
