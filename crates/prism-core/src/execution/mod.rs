//! Execution tracking: the per-request event log and the cross-thread
//! listener broadcast that feeds the streaming response.

mod context;
mod event;
mod listeners;
mod log;

pub use context::ExecutionContext;
pub use event::ExecutionEvent;
pub use listeners::{ContextId, EventReceiver, EventSender, ListenerId, ListenerRegistry};
pub use log::{ExecutionLog, LogSnapshot};
