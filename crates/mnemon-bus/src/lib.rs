pub mod bus;
pub mod error;
pub mod fleet;
pub mod local;
pub mod nats;
pub mod producer;

pub use bus::{BusSubscription, Delivery, MessageBus};
pub use error::BusError;
pub use fleet::{ConsumerFleet, FleetConfig, FleetStatus};
pub use local::LocalBus;
pub use nats::NatsBus;
pub use producer::Producer;
