mod controller;
mod engine;
mod recovery;

pub use controller::TrackerController;
pub use engine::TrackerSnapshot;
pub use recovery::{recover_from_checkpoint, RecoveredLedger};
