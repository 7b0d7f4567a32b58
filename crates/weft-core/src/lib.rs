pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{Result, ValidationError, WeftError, WorkflowError};
pub use event::{EventBus, WorkflowEvent};
pub use traits::{AgentExecutor, ToolCaller};
pub use types::*;
