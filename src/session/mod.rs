//! Trainer session: transport capability and the orchestrator driving it.

pub mod orchestrator;
pub mod transport;
pub mod types;

pub use orchestrator::SessionOrchestrator;
pub use transport::{Characteristic, ConnectionHandle, NotificationStream, Transport};
pub use types::{SessionCommand, SessionError, SessionEvent};
