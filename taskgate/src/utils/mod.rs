//! Clocks, identifiers and timestamp helpers.

mod clock;
pub mod timestamps;

pub use clock::{Clock, ManualClock, SystemClock};
pub use timestamps::iso_timestamp;

use uuid::Uuid;

/// Generates a new random task identifier.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}
