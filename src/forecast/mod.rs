pub mod demand;
pub mod engine;
pub mod prices;
pub mod production;

pub use demand::*;
pub use engine::*;
pub use prices::*;
pub use production::*;

use chrono::{DateTime, FixedOffset, Timelike};

/// Hour of day of horizon step `k` for hourly steps starting at `start`
pub(crate) fn hour_of_step(start: DateTime<FixedOffset>, k: usize) -> u32 {
    ((start.hour() as usize + k) % 24) as u32
}
