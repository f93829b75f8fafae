//! Ordered record of the shutdown sequence.

use std::fmt::{Display, Formatter};

use crate::events::ElementId;

/// One completed teardown step. Pipelines are named as in their thread
/// names (`source1`, `output`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStep {
    Stop(String),
    WaitForStop(String),
    Terminate(String),
    Unregister(ElementId),
    RemoveListener(String),
    StopPeripherals,
    RemovePeripheralListener,
    /// Bus destroyed; carries the number of events never consumed.
    DestroyBus(usize),
}

impl Display for TeardownStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop(pipeline) => write!(f, "stop {}", pipeline),
            Self::WaitForStop(pipeline) => write!(f, "wait for {}", pipeline),
            Self::Terminate(pipeline) => write!(f, "terminate {}", pipeline),
            Self::Unregister(element) => write!(f, "unregister {}", element),
            Self::RemoveListener(pipeline) => write!(f, "remove {} listener", pipeline),
            Self::StopPeripherals => write!(f, "stop peripherals"),
            Self::RemovePeripheralListener => write!(f, "remove peripheral listener"),
            Self::DestroyBus(unread) => write!(f, "destroy event bus ({} unread)", unread),
        }
    }
}
