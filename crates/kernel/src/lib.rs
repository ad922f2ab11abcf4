//! Wires the agent runtime (§4.4 think→act→observe→reflect loop) to the
//! orchestrator kernel (§4.5 dispatch, child watching, run queries) and the
//! fixed set of privileged tools every registered agent gets installed with.

mod cancel;
mod loop_exec;
mod privileged_tools;

pub mod kernel;
pub mod runtime;

pub use cancel::CancelMap;
pub use kernel::{DispatchCommand, DispatchHandle, OrchestratorKernel, RunQueryFilter};
pub use runtime::{AgentRuntime, ExecuteCommand};
