pub mod connections;
pub mod credentials;
pub mod google;
pub mod lock;
pub mod mapping;
pub mod provider;
pub mod reconciler;
pub mod runs;
pub mod upstream;

pub use connections::{ConnectionStore, InMemoryConnectionStore, SupabaseConnectionStore};
pub use credentials::{Credential, CredentialManager};
pub use google::GoogleCalendarProvider;
pub use lock::{LocalProfessionalLock, LockToken, ProfessionalLock, RedisProfessionalLock};
pub use provider::CalendarProvider;
pub use reconciler::CalendarReconciler;
pub use runs::{InMemoryRunLog, RunLog, SupabaseRunLog};
pub use upstream::ConnectedCalendar;
