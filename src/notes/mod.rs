//! Note lifecycle module
//!
//! Models, lifecycle state machine, and live feeds for notes.

pub mod lifecycle;
pub mod models;

pub use lifecycle::{BulkOutcome, NoteFeed, NoteLifecycle};
pub use models::{Color, Note, NoteId, NotePatch, NoteState};
