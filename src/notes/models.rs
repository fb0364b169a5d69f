//! Note models
//!
//! The note entity and its lifecycle vocabulary. Notes serialize straight
//! to and from document-store field maps.

use crate::error::{Error, StoreError};
use crate::store::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store-assigned note identifier, stable across trash/recover transitions.
pub type NoteId = String;

/// Presentation color label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    #[default]
    Yellow,
    Blue,
    Pink,
    Green,
    Purple,
    Orange,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Yellow => "yellow",
            Color::Blue => "blue",
            Color::Pink => "pink",
            Color::Green => "green",
            Color::Purple => "purple",
            Color::Orange => "orange",
        }
    }
}

/// Lifecycle state. A note is in exactly one of these at any instant;
/// purged notes no longer exist at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteState {
    Active,
    Trash,
}

impl NoteState {
    /// Value of the `deleted` flag for notes in this state.
    pub(crate) fn deleted_flag(self) -> bool {
        matches!(self, NoteState::Trash)
    }
}

/// A note as read back from the store.
///
/// Timestamps are store-assigned; a document read back before the server
/// resolved a timestamp yields `None` for that field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub id: NoteId,
    pub owner: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub color: Color,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restored_at: Option<DateTime<Utc>>,
}

impl Note {
    pub fn state(&self) -> NoteState {
        if self.deleted {
            NoteState::Trash
        } else {
            NoteState::Active
        }
    }

    pub(crate) fn from_document(doc: &Document) -> crate::error::Result<Self> {
        let mut note: Note = serde_json::from_value(Value::Object(doc.fields.clone()))
            .map_err(|e| {
                Error::Store(StoreError::Terminal(format!(
                    "malformed note document {}: {}",
                    doc.id, e
                )))
            })?;
        note.id = doc.id.clone();
        Ok(note)
    }
}

/// Partial update applied to an active note.
#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub color: Option<Color>,
}
