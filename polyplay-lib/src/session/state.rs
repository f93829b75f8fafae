//! Session state machine, kept free of I/O so every transition is testable.

use log::{debug, warn};

use crate::audio::format::AudioFormat;
use crate::events::{Command, ElementId, ElementStatus, Event, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Pipelines running, mixer forwarding the primary only.
    Priming,
    /// Clock configured and every input mixed.
    Mixing,
    /// The sink reported its end; teardown pending.
    Stopping,
    Stopped,
}

/// What the orchestrator must do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Configure the sink clock from this format and activate the mixer.
    ConfigureAndActivate(AudioFormat),
    BeginShutdown,
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    source_count: usize,
    clock: Option<AudioFormat>,
    clock_source: Option<SourceId>,
    sink_end: Option<ElementStatus>,
}

impl SessionMachine {
    pub fn new(source_count: usize) -> Self {
        Self {
            state: SessionState::Priming,
            source_count,
            clock: None,
            clock_source: None,
            sink_end: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Format adopted on the priming to mixing transition.
    pub fn clock(&self) -> Option<AudioFormat> {
        self.clock
    }

    /// Source whose format report set the clock.
    pub fn clock_source(&self) -> Option<SourceId> {
        self.clock_source
    }

    /// Terminal status the sink ended the session with.
    pub fn sink_end(&self) -> Option<ElementStatus> {
        self.sink_end
    }

    fn is_known_decoder(&self, element: ElementId) -> bool {
        matches!(element, ElementId::Decoder(id) if id.index() < self.source_count)
    }

    /// Advance on one bus event.
    ///
    /// Only two events matter: the first format report from a known decoder
    /// (priming only) and a terminal status from the sink (any live state).
    pub fn on_event(&mut self, event: &Event) -> Action {
        match (self.state, event.command) {
            (SessionState::Stopping | SessionState::Stopped, _) => Action::None,
            (_, Command::StatusChanged(status))
                if event.source == ElementId::Sink && status.is_terminal() =>
            {
                self.state = SessionState::Stopping;
                self.sink_end = Some(status);
                Action::BeginShutdown
            }
            (SessionState::Priming, Command::FormatReported(format))
                if self.is_known_decoder(event.source) =>
            {
                self.state = SessionState::Mixing;
                self.clock = Some(format);
                if let ElementId::Decoder(id) = event.source {
                    self.clock_source = Some(id);
                }
                Action::ConfigureAndActivate(format)
            }
            (SessionState::Mixing, Command::FormatReported(format))
                if self.is_known_decoder(event.source) =>
            {
                if let Some(clock) = self.clock.filter(|clock| *clock != format) {
                    warn!(
                        "{} reports {} but the output runs at {}; not resampling",
                        event.source, format, clock
                    );
                }
                Action::None
            }
            _ => {
                debug!("ignoring {:?} from {}", event.command, event.source);
                Action::None
            }
        }
    }

    /// Mark teardown complete.
    pub fn finish(&mut self) {
        self.state = SessionState::Stopped;
    }
}
