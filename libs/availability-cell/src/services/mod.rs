pub mod availability;
pub mod blocks;
pub mod profile;
pub mod slots;
pub mod upstream;
pub mod week;

pub use availability::{AvailabilityService, DayContext};
pub use blocks::{BlockStore, InMemoryBlockStore, SupabaseBlockStore};
pub use profile::{InMemoryProfileStore, ProfileStore, SupabaseProfileStore};
pub use slots::{BookedInterval, SlotRejection, SlotResolver};
pub use upstream::{NoUpstreamCalendar, UpstreamCalendar, UpstreamError};
