//! Event bus carrying lifecycle and format notifications from chain elements
//! to the session orchestrator.
//!
//! Every element is identified by an [`ElementId`] assigned when its chain is
//! created, so the orchestrator filters events by value rather than by handle.

use log::debug;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::error::PlaybackError;

/// Stable index of a configured source; doubles as its mixer input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u16);

impl SourceId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "source{}", self.0 + 1)
    }
}

/// Identity of an event emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementId {
    Reader(SourceId),
    Decoder(SourceId),
    Writer(SourceId),
    Mixer,
    Sink,
    Storage,
}

impl ElementId {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Storage => ElementKind::Peripheral,
            _ => ElementKind::Element,
        }
    }
}

impl Display for ElementId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reader(id) => write!(f, "reader{}", id.0 + 1),
            Self::Decoder(id) => write!(f, "decoder{}", id.0 + 1),
            Self::Writer(id) => write!(f, "writer{}", id.0 + 1),
            Self::Mixer => write!(f, "mixer"),
            Self::Sink => write!(f, "sink"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

/// Broad category of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// A stage inside a pipeline.
    Element,
    /// A peripheral outside any pipeline (storage).
    Peripheral,
}

/// Lifecycle status reported by elements and peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStatus {
    Running,
    Stopped,
    Finished,
    Error,
}

impl ElementStatus {
    /// `Stopped` and `Finished` end an element's life.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Finished)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stream headers were parsed; carries the stream format.
    FormatReported(AudioFormat),
    StatusChanged(ElementStatus),
}

/// One notification on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub source: ElementId,
    pub kind: ElementKind,
    pub command: Command,
}

impl Event {
    pub fn new(source: ElementId, command: Command) -> Self {
        Self {
            source,
            kind: source.kind(),
            command,
        }
    }
}

/// Failure of a bus receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    Timeout,
    Disconnected,
}

impl Display for BusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for event"),
            Self::Disconnected => write!(f, "event bus disconnected"),
        }
    }
}

/// Sending side of the bus held by a pipeline or peripheral set.
///
/// Each publisher carries a listener token; the bus counts live tokens to
/// refuse destruction while anything is still attached.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: Sender<Event>,
    _token: Arc<()>,
}

impl EventPublisher {
    /// Send an event; returns `false` if the bus is gone.
    pub fn publish(&self, event: Event) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Slot through which a pipeline's elements reach the bus.
///
/// Empty until the owner attaches a listener; emptied again on removal.
pub type ListenerSlot = Arc<Mutex<Option<EventPublisher>>>;

/// Create an empty listener slot.
pub fn listener_slot() -> ListenerSlot {
    Arc::new(Mutex::new(None))
}

/// Per-element handle used to publish tagged events.
#[derive(Debug, Clone)]
pub struct Emitter {
    id: ElementId,
    listener: ListenerSlot,
}

impl Emitter {
    pub fn new(id: ElementId, listener: ListenerSlot) -> Self {
        Self { id, listener }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn emit(&self, command: Command) {
        let listener = self.listener.lock().unwrap();
        match listener.as_ref() {
            Some(publisher) => {
                if !publisher.publish(Event::new(self.id, command)) {
                    debug!("{}: bus closed, dropped {:?}", self.id, command);
                }
            }
            None => debug!("{}: no listener, dropped {:?}", self.id, command),
        }
    }

    pub fn report_format(&self, format: AudioFormat) {
        self.emit(Command::FormatReported(format));
    }

    pub fn report_status(&self, status: ElementStatus) {
        self.emit(Command::StatusChanged(status));
    }
}

/// Single-consumer event queue, FIFO per publisher.
#[derive(Debug)]
pub struct EventBus {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    listeners: Arc<()>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = channel();
        Self {
            sender,
            receiver,
            listeners: Arc::new(()),
        }
    }

    /// Create a publisher to attach to a pipeline or peripheral set.
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            sender: self.sender.clone(),
            _token: self.listeners.clone(),
        }
    }

    /// Number of publishers still attached.
    pub fn listener_count(&self) -> usize {
        Arc::strong_count(&self.listeners) - 1
    }

    /// Wait for the next event; `None` blocks indefinitely.
    pub fn listen(&self, timeout: Option<Duration>) -> Result<Event, BusError> {
        match timeout {
            Some(timeout) => self.receiver.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => BusError::Timeout,
                RecvTimeoutError::Disconnected => BusError::Disconnected,
            }),
            None => self.receiver.recv().map_err(|_| BusError::Disconnected),
        }
    }

    /// Tear the bus down.
    ///
    /// # Returns
    ///
    /// Number of queued events that were never consumed.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::ListenersAttached`] while any publisher is still
    /// attached; the bus is dropped either way.
    pub fn destroy(self) -> Result<usize, PlaybackError> {
        let attached = self.listener_count();
        if attached > 0 {
            return Err(PlaybackError::ListenersAttached(attached));
        }
        Ok(self.receiver.try_iter().count())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
