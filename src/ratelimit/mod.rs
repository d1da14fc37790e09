//! Rate limiting logic and state management.

mod backend;
mod clock;
mod limiter;
mod record;
mod worker;

pub use backend::AdmissionControl;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::WindowLimiter;
pub use record::Record;
pub use worker::{LimiterHandle, LimiterWorker};
