pub mod error;
pub mod reducer;

pub use error::FsmError;
pub use reducer::{FsmReducer, LeaseToken, ProposeOutcome, TransitionResult};
