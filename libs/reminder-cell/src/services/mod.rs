pub mod directory;
pub mod sender;
pub mod sweeper;

pub use directory::{InMemoryRecipientDirectory, RecipientDirectory, SupabaseRecipientDirectory};
pub use sender::{NotificationSender, RecordingNotificationSender, WebhookNotificationSender};
pub use sweeper::ReminderSweeper;
