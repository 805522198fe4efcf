//! The kudos engine.
//!
//! - `session`: shared context and the scan pass entry point
//! - `scanner`, `executor`, `retry`: find, act on and re-drive entries
//! - `delay`, `guard`: pacing and the rate-limit pause
//! - `scheduler`: turns triggers into scan passes

pub mod delay;
pub mod executor;
pub mod guard;
pub mod retry;
pub mod scanner;
pub mod scheduler;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use delay::{Adjustment, DelayBounds, DelayPolicy};
pub use executor::ActionExecutor;
pub use guard::{GuardDecision, GuardState, RateLimitGuard};
pub use retry::{DrainReport, RetryQueue};
pub use scanner::EntryScanner;
pub use scheduler::{Command, Scheduler, Trigger, TriggerHandle};
pub use session::{Session, SessionBuilder};
