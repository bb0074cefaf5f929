pub mod budget;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod quarantine;
pub mod registry;

pub use budget::{BudgetConfig, FailureBudget};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig};
pub use error::DispatchError;
pub use handler::{Handler, HandlerContext, Outcome};
pub use quarantine::{QuarantineSink, QuarantinedMessage};
pub use registry::HandlerRegistry;
