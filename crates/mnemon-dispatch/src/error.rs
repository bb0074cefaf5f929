use mnemon_domain::EventKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("handler already registered for ({kind}, v{version})")]
    DuplicateRegistration { kind: EventKind, version: u32 },

    #[error("no handler registered for ({kind}, v{version})")]
    UnknownRoute { kind: EventKind, version: u32 },
}
