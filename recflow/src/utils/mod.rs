//! Id generation and timestamps.

mod timestamps;
mod uuid_utils;

pub use timestamps::now_millis;
pub use uuid_utils::{generate_id, generate_uuid};
