pub mod error;
pub mod feedback;
pub mod handlers;
pub mod pairing;

pub use error::ReviewError;
pub use feedback::FeedbackScorer;
pub use pairing::{PairingConfig, PairingEngine};
