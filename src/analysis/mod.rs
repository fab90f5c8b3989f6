//! Analysis module - behavior events, emission estimates and eco scoring
//!
//! All three engines are pure: they read the frames handed to them and keep
//! no state between calls.

mod behavior;
mod emission;
mod eco_score;

pub use behavior::*;
pub use emission::*;
pub use eco_score::*;
