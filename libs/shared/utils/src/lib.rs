pub mod extractor;
pub mod jwt;
pub mod test_utils;
pub mod wall_clock;

pub use wall_clock::{WallClock, WallClockError};
