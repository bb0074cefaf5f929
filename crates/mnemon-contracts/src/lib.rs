pub mod error;
pub mod loader;
pub mod raw;
pub mod topic;
pub mod validate;

pub use error::ContractError;
pub use loader::load_contracts;
pub use topic::Topic;
pub use validate::{resolve, Contract, MessageBinding, ResolvedContracts};
