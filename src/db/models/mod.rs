pub mod checkpoint;
pub mod pending_flush;

pub use checkpoint::LedgerCheckpoint;
pub use pending_flush::PendingFlush;
