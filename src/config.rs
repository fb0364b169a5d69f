//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and validation boundaries used throughout the crate.

// ===== Collections =====

/// Document store collection holding all notes (active and trashed)
pub const NOTES_COLLECTION: &str = "notes";

/// Document store collection holding user profiles and role claims
pub const USERS_COLLECTION: &str = "users";

// ===== Retry Policy =====

/// Total attempts for a network-sensitive store operation (1 initial + 2 retries).
/// Transient failures beyond this budget surface as a single aggregated error.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base backoff delay in milliseconds; doubles after each failed attempt.
pub const RETRY_BASE_DELAY_MS: u64 = 500;

// ===== Validation Boundaries =====

/// Maximum length for a note title in characters.
/// Prevents excessively long values from being stored.
pub const MAX_TITLE_LENGTH: usize = 256;

/// Maximum length for a note body in characters.
pub const MAX_BODY_LENGTH: usize = 10_000;

/// Minimum password length accepted by the local identity provider.
pub const MIN_PASSWORD_LENGTH: usize = 6;
