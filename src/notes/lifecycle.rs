//! Note lifecycle manager
//!
//! Owns the rules for creating, soft-deleting, recovering, and purging
//! notes on top of an abstract document store. Every call takes an explicit
//! [`Caller`]; ownership is enforced uniformly and violations are reported
//! as not-found so other users' notes cannot be probed.
//!
//! The trash transition is a single-document flag flip, performed as one
//! atomic store operation. Conflicting operations on the same note from two
//! sessions resolve last-writer-wins at the store; this is a documented
//! weak guarantee, not strengthened here.

use super::models::{Color, Note, NoteId, NotePatch, NoteState};
use crate::auth::Caller;
use crate::config::{MAX_BODY_LENGTH, MAX_TITLE_LENGTH, NOTES_COLLECTION};
use crate::error::{Error, ErrorKind, Result};
use crate::retry::RetryPolicy;
use crate::store::{server_timestamp, DocumentStore, Fields, Filter, Subscription};
use serde_json::{json, Value};
use std::sync::Arc;

/// Result of a bulk trash operation: best-effort, per-item independent.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failures: Vec<(NoteId, ErrorKind)>,
}

impl BulkOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Copy)]
enum BulkOp {
    Recover,
    Purge,
}

impl BulkOp {
    fn name(self) -> &'static str {
        match self {
            BulkOp::Recover => "recover all",
            BulkOp::Purge => "purge all",
        }
    }
}

/// Live feed of a caller's active or trash set.
///
/// Snapshots arrive whole: the current result set after every relevant
/// write. Dropping the feed cancels the registration.
pub struct NoteFeed {
    sub: Subscription,
}

impl NoteFeed {
    pub async fn next(&mut self) -> Option<Vec<Note>> {
        let docs = self.sub.next().await?;
        let mut notes: Vec<Note> = docs
            .iter()
            .filter_map(|doc| match Note::from_document(doc) {
                Ok(note) => Some(note),
                Err(err) => {
                    tracing::warn!(id = %doc.id, error = %err, "Skipping malformed note in feed");
                    None
                }
            })
            .collect();
        sort_newest_first(&mut notes);
        Some(notes)
    }
}

/// Service owning the note lifecycle rules.
#[derive(Clone)]
pub struct NoteLifecycle {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl NoteLifecycle {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Create a note owned by the caller. Initial state is always active.
    pub async fn create(
        &self,
        caller: &Caller,
        title: &str,
        body: &str,
        color: Option<Color>,
    ) -> Result<Note> {
        caller.require_identity()?;
        let title = title.trim();
        let body = body.trim();
        validate_content(title, body)?;
        let color = color.unwrap_or_default();

        let fields = object_fields(json!({
            "owner": caller.user_id,
            "title": title,
            "body": body,
            "color": color,
            "deleted": false,
            "created_at": server_timestamp(),
        }));

        tracing::info!(owner = %caller.user_id, "Creating new note");

        let id = self
            .retry
            .run("create note", || {
                let store = self.store.clone();
                let fields = fields.clone();
                async move { store.create(NOTES_COLLECTION, fields).await }
            })
            .await?;

        tracing::info!(id = %id, "Note created successfully");
        self.fetch_owned(caller, &id).await
    }

    /// Get a single note visible to the caller.
    pub async fn get(&self, caller: &Caller, id: &str) -> Result<Note> {
        caller.require_identity()?;
        self.fetch_owned(caller, id).await
    }

    /// Update content and color of an active note.
    pub async fn update(&self, caller: &Caller, id: &str, patch: NotePatch) -> Result<Note> {
        caller.require_identity()?;
        let note = self.fetch_owned(caller, id).await?;
        if note.deleted {
            return Err(Error::InvalidState(format!(
                "note {} is in the trash and cannot be edited",
                id
            )));
        }

        let title = patch
            .title
            .as_deref()
            .map(str::trim)
            .unwrap_or(note.title.as_str());
        let body = patch
            .body
            .as_deref()
            .map(str::trim)
            .unwrap_or(note.body.as_str());
        validate_content(title, body)?;

        let mut fields = object_fields(json!({
            "title": title,
            "body": body,
            "updated_at": server_timestamp(),
        }));
        if let Some(color) = patch.color {
            fields.insert("color".to_string(), json!(color));
        }

        self.apply_update("update note", id, fields).await?;

        tracing::debug!(id, "Note updated successfully");
        self.fetch_owned(caller, id).await
    }

    /// Move an active note to the trash. Idempotent: a note already in the
    /// trash is left untouched, tolerating duplicate clicks and retries.
    pub async fn soft_delete(&self, caller: &Caller, id: &str) -> Result<()> {
        caller.require_identity()?;
        let note = self.fetch_owned(caller, id).await?;
        if note.deleted {
            tracing::debug!(id, "Note already in trash, nothing to do");
            return Ok(());
        }

        let fields = object_fields(json!({
            "deleted": true,
            "deleted_at": server_timestamp(),
        }));
        self.apply_update("soft delete note", id, fields).await?;

        tracing::info!(id, "Note moved to trash");
        Ok(())
    }

    /// Move a trashed note back to the active set. Idempotent; a purged
    /// note cannot be resurrected and reports not-found.
    pub async fn recover(&self, caller: &Caller, id: &str) -> Result<Note> {
        caller.require_identity()?;
        let note = self.fetch_owned(caller, id).await?;
        if !note.deleted {
            tracing::debug!(id, "Note already active, nothing to do");
            return Ok(note);
        }

        let fields = object_fields(json!({
            "deleted": false,
            "restored_at": server_timestamp(),
        }));
        self.apply_update("recover note", id, fields).await?;

        tracing::info!(id, "Note recovered from trash");
        self.fetch_owned(caller, id).await
    }

    /// Permanently remove a trashed note. Deletion is deliberately
    /// two-step: an active note must pass through the trash first.
    pub async fn purge(&self, caller: &Caller, id: &str) -> Result<()> {
        caller.require_identity()?;
        let note = self.fetch_owned(caller, id).await?;
        if !note.deleted {
            return Err(Error::InvalidState(format!(
                "note {} must be moved to the trash before it can be purged",
                id
            )));
        }

        self.retry
            .run("purge note", || {
                let store = self.store.clone();
                let id = id.to_string();
                async move { store.delete(NOTES_COLLECTION, &id).await }
            })
            .await?;

        tracing::info!(id, "Note purged permanently");
        Ok(())
    }

    /// Recover every note in the caller's trash. Best-effort: one item's
    /// failure never blocks or rolls back the others.
    pub async fn recover_all(&self, caller: &Caller) -> Result<BulkOutcome> {
        self.bulk(caller, BulkOp::Recover).await
    }

    /// Purge every note in the caller's trash. Best-effort, per-item
    /// independent, same as [`NoteLifecycle::recover_all`].
    pub async fn purge_all(&self, caller: &Caller) -> Result<BulkOutcome> {
        self.bulk(caller, BulkOp::Purge).await
    }

    /// Notes in the given lifecycle state, newest first. Admin callers see
    /// every owner's notes; everyone else sees only their own.
    pub async fn list(&self, caller: &Caller, state: NoteState) -> Result<Vec<Note>> {
        caller.require_identity()?;
        let filters = self.scope_filters(caller, state);

        let docs = self
            .retry
            .run("list notes", || {
                let store = self.store.clone();
                let filters = filters.clone();
                async move { store.query(NOTES_COLLECTION, &filters).await }
            })
            .await?;

        let mut notes = Vec::with_capacity(docs.len());
        for doc in &docs {
            match Note::from_document(doc) {
                Ok(note) => notes.push(note),
                Err(err) => {
                    tracing::warn!(id = %doc.id, error = %err, "Skipping malformed note document");
                }
            }
        }
        sort_newest_first(&mut notes);
        Ok(notes)
    }

    /// Live snapshots of the caller's active or trash set.
    pub async fn subscribe(&self, caller: &Caller, state: NoteState) -> Result<NoteFeed> {
        caller.require_identity()?;
        let filters = self.scope_filters(caller, state);
        let sub = self.store.subscribe(NOTES_COLLECTION, &filters).await?;
        Ok(NoteFeed { sub })
    }

    fn scope_filters(&self, caller: &Caller, state: NoteState) -> Vec<Filter> {
        let mut filters = vec![Filter::eq("deleted", state.deleted_flag())];
        if !caller.is_admin {
            filters.push(Filter::eq("owner", caller.user_id.clone()));
        }
        filters
    }

    /// Fetch with the uniform access rule: a note owned by someone else is
    /// indistinguishable from one that does not exist.
    async fn fetch_owned(&self, caller: &Caller, id: &str) -> Result<Note> {
        let doc = self
            .retry
            .run("get note", || {
                let store = self.store.clone();
                let id = id.to_string();
                async move { store.get(NOTES_COLLECTION, &id).await }
            })
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let note = Note::from_document(&doc)?;
        if note.owner != caller.user_id && !caller.is_admin {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(note)
    }

    async fn apply_update(&self, operation: &str, id: &str, fields: Fields) -> Result<()> {
        self.retry
            .run(operation, || {
                let store = self.store.clone();
                let id = id.to_string();
                let fields = fields.clone();
                async move { store.update(NOTES_COLLECTION, &id, fields).await }
            })
            .await?;
        Ok(())
    }

    async fn bulk(&self, caller: &Caller, op: BulkOp) -> Result<BulkOutcome> {
        caller.require_identity()?;
        let trash = self.list(caller, NoteState::Trash).await?;
        tracing::info!(
            owner = %caller.user_id,
            count = trash.len(),
            operation = op.name(),
            "Starting bulk trash operation"
        );

        // Independent concurrent operations; nothing is awaited atomically.
        let mut handles = Vec::with_capacity(trash.len());
        for note in trash {
            let this = self.clone();
            let caller = caller.clone();
            let id = note.id.clone();
            handles.push((
                note.id,
                tokio::spawn(async move {
                    match op {
                        BulkOp::Recover => this.recover(&caller, &id).await.map(|_| ()),
                        BulkOp::Purge => this.purge(&caller, &id).await,
                    }
                }),
            ));
        }

        let mut outcome = BulkOutcome::default();
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => outcome.succeeded += 1,
                Ok(Err(err)) => {
                    tracing::warn!(id = %id, error = %err, "Bulk item failed");
                    outcome.failures.push((id, err.kind()));
                }
                Err(join_err) => {
                    tracing::warn!(id = %id, error = %join_err, "Bulk item panicked");
                    outcome.failures.push((id, ErrorKind::TerminalStore));
                }
            }
        }

        tracing::info!(
            succeeded = outcome.succeeded,
            failed = outcome.failures.len(),
            operation = op.name(),
            "Bulk trash operation finished"
        );
        Ok(outcome)
    }
}

fn validate_content(title: &str, body: &str) -> Result<()> {
    if title.is_empty() && body.is_empty() {
        return Err(Error::Validation(
            "a note needs a title or a body".to_string(),
        ));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(Error::Validation(format!(
            "title exceeds {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    if body.chars().count() > MAX_BODY_LENGTH {
        return Err(Error::Validation(format!(
            "body exceeds {} characters",
            MAX_BODY_LENGTH
        )));
    }
    Ok(())
}

/// Newest creation time first; notes whose server timestamp has not
/// resolved yet sort as oldest.
fn sort_newest_first(notes: &mut [Note]) {
    notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn object_fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("json! object literal"),
    }
}
