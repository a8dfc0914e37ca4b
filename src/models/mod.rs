//! Domain models shared across services and the HTTP surface.

mod job;
mod lock;
mod ticket;

pub use job::{IngestionJob, IngestionLog, JobStatus, LogStatus};
pub use lock::LockInfo;
pub use ticket::{FieldChange, HistoryAction, Sentiment, Ticket, TicketHistory, Urgency};
