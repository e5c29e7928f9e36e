pub mod accrual;
pub mod display;
pub mod record;

pub use accrual::TimeAccrualLedger;
pub use display::format_hms;
pub use record::{DailySnapshot, Interval, SessionRecord};
