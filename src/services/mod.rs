pub mod notifications;
pub mod processor;

pub use notifications::{NotificationDispatcher, NotificationObserver};
pub use processor::{ProcessorState, ProcessorStatus, TerminalStatus, TransactionProcessor};
