// notekeep - demo walking a note through its whole lifecycle
// against the local SQLite adapter and identity provider.

use notekeep::auth::{IdentityProvider, LocalProvider, Profile, Session};
use notekeep::notes::{Color, NoteLifecycle, NotePatch, NoteState};
use notekeep::store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> notekeep::error::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notekeep=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting notekeep demo");

    let store: Arc<SqliteStore> = Arc::new(SqliteStore::in_memory().await?);
    let provider = LocalProvider::new(store.clone());

    provider
        .register(
            "demo@example.com",
            "correct-horse",
            Profile {
                first_name: "Demo".to_string(),
                last_name: "User".to_string(),
            },
        )
        .await?;
    let user = provider.authenticate("demo@example.com", "correct-horse").await?;

    let session = Session::establish(store.clone(), user).await;
    let caller = session.caller();

    let lifecycle = NoteLifecycle::new(store);

    let note = lifecycle
        .create(caller, "Groceries", "Milk, eggs", Some(Color::Yellow))
        .await?;
    tracing::info!(id = %note.id, color = note.color.as_str(), "Created");

    lifecycle
        .update(
            caller,
            &note.id,
            NotePatch {
                body: Some("Milk, eggs, butter".to_string()),
                color: Some(Color::Green),
                ..NotePatch::default()
            },
        )
        .await?;

    lifecycle.soft_delete(caller, &note.id).await?;
    tracing::info!(
        trash = lifecycle.list(caller, NoteState::Trash).await?.len(),
        "Note moved to trash"
    );

    let recovered = lifecycle.recover(caller, &note.id).await?;
    tracing::info!(id = %recovered.id, "Recovered");

    lifecycle.soft_delete(caller, &note.id).await?;
    lifecycle.purge(caller, &note.id).await?;
    tracing::info!(
        active = lifecycle.list(caller, NoteState::Active).await?.len(),
        trash = lifecycle.list(caller, NoteState::Trash).await?.len(),
        "Note purged"
    );

    provider.sign_out().await;
    Ok(())
}
