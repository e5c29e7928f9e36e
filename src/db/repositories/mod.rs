pub mod checkpoints;
pub mod outbox;
