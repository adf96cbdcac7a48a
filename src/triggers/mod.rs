/// Trigger layer
///
/// Webhook and cron registrations, the schedule math behind them, and the
/// manager that turns inbound calls and timer fires into workflow runs.

// Registrations, auth modes and trigger errors
pub mod types;

// Cron parsing and the injectable clock
pub mod schedule;

// Lifecycle owner for all triggers
pub mod manager;

pub use manager::{TriggerManager, WebhookOutcome, WebhookRejection, WebhookRequest};
pub use schedule::{Clock, CronSchedule, ManualClock, SystemClock};
pub use types::{ScheduleTrigger, TriggerError, WebhookAuth, WebhookTrigger};
