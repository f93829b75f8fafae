//! Pipeline lifecycle: element registration, worker threads, stop/teardown.
//!
//! A pipeline owns the worker threads of one chain plus the listener slot its
//! elements publish through. Teardown is deliberately strict: elements can
//! only be unregistered, and the listener removed, once every worker thread
//! has been joined.

use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::PlaybackError;
use crate::events::{listener_slot, ElementId, Emitter, EventPublisher, ListenerSlot};

/// Lifecycle state of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Initialized,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

/// Body of a worker thread; receives the pipeline's abort flag.
pub type TaskBody = Box<dyn FnOnce(Arc<AtomicBool>) + Send + 'static>;

/// A named worker to spawn when the pipeline runs.
pub struct PipelineTask {
    pub name: String,
    pub body: TaskBody,
}

impl PipelineTask {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }
}

/// Ordered set of elements executed by one or more worker threads.
pub struct Pipeline {
    name: String,
    elements: Vec<ElementId>,
    state: PipelineState,
    abort: Arc<AtomicBool>,
    listener: ListenerSlot,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: Vec::new(),
            state: PipelineState::Initialized,
            abort: Arc::new(AtomicBool::new(false)),
            listener: listener_slot(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Registered elements in link order.
    pub fn elements(&self) -> &[ElementId] {
        &self.elements
    }

    /// Add an element before the pipeline runs.
    pub fn register(&mut self, element: ElementId) -> Result<(), PlaybackError> {
        if self.state != PipelineState::Initialized {
            return Err(PlaybackError::PipelineState(format!(
                "{}: cannot register {} while {:?}",
                self.name, element, self.state
            )));
        }
        if self.elements.contains(&element) {
            return Err(PlaybackError::InvalidInput(format!(
                "{}: {} registered twice",
                self.name, element
            )));
        }
        self.elements.push(element);
        Ok(())
    }

    /// Remove an element; only allowed once the pipeline has stopped.
    pub fn unregister(&mut self, element: ElementId) -> Result<(), PlaybackError> {
        if !self.is_stopped() {
            return Err(PlaybackError::PipelineState(format!(
                "{}: cannot unregister {} while {:?}",
                self.name, element, self.state
            )));
        }
        let Some(position) = self.elements.iter().position(|e| *e == element) else {
            return Err(PlaybackError::InvalidInput(format!(
                "{}: {} is not registered",
                self.name, element
            )));
        };
        self.elements.remove(position);
        Ok(())
    }

    /// Event handle for a registered element.
    pub fn emitter(&self, element: ElementId) -> Result<Emitter, PlaybackError> {
        if !self.elements.contains(&element) {
            return Err(PlaybackError::InvalidInput(format!(
                "{}: {} is not registered",
                self.name, element
            )));
        }
        Ok(Emitter::new(element, self.listener.clone()))
    }

    pub fn set_listener(&mut self, publisher: EventPublisher) {
        *self.listener.lock().unwrap() = Some(publisher);
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    /// Detach from the bus; refused while worker threads may still emit.
    pub fn remove_listener(&mut self) -> Result<(), PlaybackError> {
        if !self.is_stopped() {
            return Err(PlaybackError::PipelineState(format!(
                "{}: cannot remove listener while {:?}",
                self.name, self.state
            )));
        }
        self.listener.lock().unwrap().take();
        Ok(())
    }

    /// Spawn every task and enter `Running`.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline already ran or a thread cannot be spawned; in the
    /// latter case the tasks started so far are aborted and joined.
    pub fn run(&mut self, tasks: Vec<PipelineTask>) -> Result<(), PlaybackError> {
        if self.state != PipelineState::Initialized {
            return Err(PlaybackError::PipelineState(format!(
                "{}: cannot run while {:?}",
                self.name, self.state
            )));
        }

        for task in tasks {
            let abort = self.abort.clone();
            let body = task.body;
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, task.name))
                .spawn(move || body(abort));
            match spawned {
                Ok(handle) => self.tasks.push(handle),
                Err(err) => {
                    self.abort.store(true, Ordering::SeqCst);
                    self.join_tasks();
                    self.state = PipelineState::Stopped;
                    return Err(PlaybackError::Io(err));
                }
            }
        }

        self.state = PipelineState::Running;
        debug!("{}: running {} task(s)", self.name, self.tasks.len());
        Ok(())
    }

    /// Ask every worker to halt. Idempotent.
    pub fn stop(&mut self) {
        self.abort.store(true, Ordering::SeqCst);
        match self.state {
            PipelineState::Running => self.state = PipelineState::Stopping,
            PipelineState::Initialized => self.state = PipelineState::Stopped,
            _ => {}
        }
    }

    /// Block until every worker thread has exited.
    pub fn wait_for_stop(&mut self) {
        self.join_tasks();
        if matches!(
            self.state,
            PipelineState::Running | PipelineState::Stopping | PipelineState::Initialized
        ) {
            self.state = PipelineState::Stopped;
        }
    }

    /// Release the pipeline after it stopped.
    pub fn terminate(&mut self) -> Result<(), PlaybackError> {
        if !self.is_stopped() {
            return Err(PlaybackError::PipelineState(format!(
                "{}: cannot terminate while {:?}",
                self.name, self.state
            )));
        }
        self.state = PipelineState::Terminated;
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        matches!(
            self.state,
            PipelineState::Stopped | PipelineState::Terminated
        )
    }

    fn join_tasks(&mut self) {
        for handle in self.tasks.drain(..) {
            if handle.join().is_err() {
                warn!("{}: worker thread panicked during join", self.name);
            }
        }
    }
}

/// Lifecycle surface shared by the source and output chains.
///
/// Chains expose their pipeline; the rest is provided so every chain is
/// stopped and released the same way.
/// Lifecycle surface shared by every chain that owns a [`Pipeline`].
pub trait ChainControl {
    fn pipeline(&self) -> &Pipeline;

    fn pipeline_mut(&mut self) -> &mut Pipeline;

    fn name(&self) -> &str {
        self.pipeline().name()
    }

    fn state(&self) -> PipelineState {
        self.pipeline().state()
    }

    fn elements(&self) -> &[ElementId] {
        self.pipeline().elements()
    }

    fn set_listener(&mut self, publisher: EventPublisher) {
        self.pipeline_mut().set_listener(publisher);
    }

    fn has_listener(&self) -> bool {
        self.pipeline().has_listener()
    }

    fn stop(&mut self) {
        self.pipeline_mut().stop();
    }

    fn wait_for_stop(&mut self) {
        self.pipeline_mut().wait_for_stop();
    }

    fn terminate(&mut self) -> Result<(), PlaybackError> {
        self.pipeline_mut().terminate()
    }

    /// Unregister every element in link order; the pipeline must be stopped.
    ///
    /// # Returns
    ///
    /// The elements that were removed.
    fn unregister_elements(&mut self) -> Result<Vec<ElementId>, PlaybackError> {
        let elements = self.elements().to_vec();
        for element in &elements {
            self.pipeline_mut().unregister(*element)?;
        }
        Ok(elements)
    }

    fn remove_listener(&mut self) -> Result<(), PlaybackError> {
        self.pipeline_mut().remove_listener()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.abort.store(true, Ordering::SeqCst);
            self.join_tasks();
        }
    }
}
