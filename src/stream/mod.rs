//! Stream combinators for frame updates

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
