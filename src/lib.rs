//! notekeep
//!
//! Note lifecycle core for a Keep-style notes application: create, edit,
//! color-tag, soft-delete to trash, recover, and permanently purge notes.
//! Authentication and durable persistence are delegated to trait-abstracted
//! collaborators (an identity provider and a document store); this crate
//! defines those contracts, implements the lifecycle rules on top of them,
//! and ships local in-memory and SQLite adapters.

pub mod auth;
pub mod config;
pub mod error;
pub mod notes;
pub mod retry;
pub mod store;
