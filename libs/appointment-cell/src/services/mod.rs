pub mod booking;
pub mod lifecycle;
pub mod store;

pub use booking::BookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
