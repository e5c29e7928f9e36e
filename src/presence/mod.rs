pub mod machine;
pub mod signals;
pub mod state;

pub use machine::{PresencePolicy, PresenceStateMachine, SignalValues};
pub use signals::{ProximityReading, SignalKind, SignalUpdate};
pub use state::{AbsenceReason, PresenceState, Transition};
