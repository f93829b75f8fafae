//! Session orchestration: state machine, event loop and teardown.

pub mod orchestrator;
pub mod state;
pub mod teardown;

pub use orchestrator::{Orchestrator, SessionSummary};
pub use state::{Action, SessionMachine, SessionState};
pub use teardown::TeardownStep;
