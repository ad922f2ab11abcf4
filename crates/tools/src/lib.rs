//! Tool registry and the truncation/timeout middleware every call goes
//! through. Concrete tool bodies (filesystem, shell, web) are not part of
//! this crate; it owns the seam they plug into.

pub mod context;
pub mod error_code;
pub mod event;
pub mod executor;
pub mod registry;
pub mod truncation;

pub use context::ToolContext;
pub use error_code::ToolErrorCode;
pub use event::{NullEventSink, ToolCallEvent, ToolEventSink};
pub use executor::{ToolExecResult, ToolExecutor, TruncationPreference};
pub use registry::ToolRegistry;
