pub mod http;
pub mod schedule;
pub mod scheduler;
pub mod sink;

pub use http::HttpSink;
pub use schedule::next_flush_after;
pub use scheduler::{FlushOutcome, ReconciliationScheduler};
pub use sink::{AttendanceHistory, DailyRecordSubmission, HistoryEntry, RemoteSink};
