//! Identifier generation.

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a fresh string id for stages, forks, inputs and sessions.
#[must_use]
pub fn generate_id() -> String {
    generate_uuid().to_string()
}
