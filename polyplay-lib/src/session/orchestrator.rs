//! Playback orchestrator: wiring, event loop and ordered teardown.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::config::SessionConfig;
use crate::error::PlaybackError;
use crate::events::{ElementStatus, EventBus, SourceId};
use crate::mix::{MixerState, WorkMode};
use crate::output::{OutputChain, SinkOpener};
use crate::pipeline::ChainControl;
use crate::source::{DecoderFactory, SourceChain};
use crate::storage::PeripheralSet;

use super::state::{Action, SessionMachine, SessionState};
use super::teardown::TeardownStep;

/// Outcome of a finished session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Device clock adopted from the first format report, if any.
    pub clock: Option<AudioFormat>,
    /// Source whose decoder reported first and set the clock.
    pub clock_source: Option<SourceId>,
    /// Terminal status the sink ended the session with.
    pub end_status: Option<ElementStatus>,
    /// Mixer state at shutdown.
    pub mixer: MixerState,
    pub final_state: SessionState,
    /// Completed teardown steps, in execution order.
    pub teardown: Vec<TeardownStep>,
}

impl SessionSummary {
    pub fn activated(&self) -> bool {
        self.mixer.mode == WorkMode::Active
    }
}

/// Owns every chain of one session and drives it from the event bus.
pub struct Orchestrator {
    config: SessionConfig,
    bus: EventBus,
    peripherals: PeripheralSet,
    sources: Box<[SourceChain]>,
    output: OutputChain,
    machine: SessionMachine,
}

impl Orchestrator {
    /// Validate the configuration, mount storage and wire every chain.
    ///
    /// Each source buffer is bound to the mixer input with the same index,
    /// and every pipeline plus the peripherals get a bus listener.
    ///
    /// # Errors
    ///
    /// Invalid configuration, unmounted storage or a wiring failure.
    pub fn wire(
        config: SessionConfig,
        factory: Arc<dyn DecoderFactory>,
        opener: SinkOpener,
    ) -> Result<Self, PlaybackError> {
        config.validate()?;

        let bus = EventBus::new();
        let mut peripherals = PeripheralSet::new(&config.storage_root);
        peripherals.set_listener(bus.publisher());
        let storage = peripherals.storage();
        storage.mount(
            config.mount_retries,
            Duration::from_millis(config.mount_retry_ms),
        )?;

        let mut sources = Vec::with_capacity(config.sources.len());
        for index in 0..config.sources.len() {
            let mut chain = SourceChain::new(
                SourceId(index as u16),
                storage.clone(),
                factory.clone(),
                config.buffer_samples,
            )?;
            chain.set_listener(bus.publisher());
            sources.push(chain);
        }

        let mixer_state = MixerState::new(
            config.slot_gains(),
            0,
            config.output_channels,
            config.transit_ms,
        );
        let mut output = OutputChain::new(
            mixer_state,
            config.mix_frames,
            config.mixed_buffer_samples,
            opener,
        )?;
        for chain in &sources {
            output.bind_input(chain.id().index(), chain.buffer())?;
        }
        output.set_listener(bus.publisher());

        info!("wired {} source chain(s)", sources.len());
        Ok(Self {
            machine: SessionMachine::new(sources.len()),
            config,
            bus,
            peripherals,
            sources: sources.into_boxed_slice(),
            output,
        })
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn output(&self) -> &OutputChain {
        &self.output
    }

    /// Bind media, run every pipeline and prime the mixer on the primary.
    pub fn start(&mut self) -> Result<(), PlaybackError> {
        for (chain, source) in self.sources.iter_mut().zip(&self.config.sources) {
            chain.start(&source.path)?;
        }
        for chain in self.sources.iter_mut() {
            chain.run()?;
        }
        // Set before the mix thread starts so its first primary read sees it.
        let mixer = self.output.mixer();
        mixer.set_input_timeout(0, self.config.priming_timeout_ms)?;
        mixer.set_mode(WorkMode::Priming)?;
        self.output.run()?;

        info!("session started, priming on {}", SourceId(0));
        Ok(())
    }

    /// Consume bus events until the sink ends.
    pub fn run_event_loop(&mut self) {
        while self.machine.state() != SessionState::Stopping {
            match self.bus.listen(None) {
                Ok(event) => {
                    debug!("event {:?} from {}", event.command, event.source);
                    match self.machine.on_event(&event) {
                        Action::ConfigureAndActivate(format) => self.activate(format),
                        Action::BeginShutdown => info!("{} ended, shutting down", event.source),
                        Action::None => {}
                    }
                }
                Err(err) => error!("event bus receive failed: {}", err),
            }
        }
    }

    fn activate(&mut self, format: AudioFormat) {
        info!("first stream format {}; configuring output and mixing", format);
        if let Err(err) = self.output.configure_clock(format) {
            warn!("{}", err);
        }
        if let Err(err) = self
            .output
            .mixer()
            .activate(self.config.active_timeout_ms, format)
        {
            warn!("{}", err);
        }
    }

    /// Stop everything in order and destroy the bus.
    ///
    /// Source chains go first, then the output chain, then the peripherals;
    /// the bus is destroyed last, once nothing can publish to it.
    pub fn shutdown(mut self) -> SessionSummary {
        let mut steps = Vec::new();

        for chain in self.sources.iter_mut() {
            teardown_chain(chain, &mut steps);
        }
        teardown_chain(&mut self.output, &mut steps);

        self.peripherals.stop_all();
        steps.push(TeardownStep::StopPeripherals);
        match self.peripherals.remove_listener() {
            Ok(()) => steps.push(TeardownStep::RemovePeripheralListener),
            Err(err) => warn!("peripherals: {}", err),
        }

        let clock = self.output.clock();
        let mixer = self.output.mixer().state();
        match self.bus.destroy() {
            Ok(unread) => {
                debug!("event bus destroyed with {} unread event(s)", unread);
                steps.push(TeardownStep::DestroyBus(unread));
            }
            Err(err) => warn!("{}", err),
        }
        self.machine.finish();
        info!("session stopped");

        SessionSummary {
            clock,
            clock_source: self.machine.clock_source(),
            end_status: self.machine.sink_end(),
            mixer,
            final_state: self.machine.state(),
            teardown: steps,
        }
    }

    /// Run one whole session: wire, start, loop and shut down.
    ///
    /// A failed start still tears down whatever was already running, and a
    /// sink failure is returned as the session error after teardown.
    pub fn play(
        config: SessionConfig,
        factory: Arc<dyn DecoderFactory>,
        opener: SinkOpener,
    ) -> Result<SessionSummary, PlaybackError> {
        let mut orchestrator = Self::wire(config, factory, opener)?;
        if let Err(err) = orchestrator.start() {
            error!("session start failed: {}", err);
            orchestrator.shutdown();
            return Err(err);
        }
        orchestrator.run_event_loop();
        let failure = orchestrator.output.take_sink_error();
        let summary = orchestrator.shutdown();
        match failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}

fn teardown_chain<C: ChainControl>(chain: &mut C, steps: &mut Vec<TeardownStep>) {
    let name = chain.name().to_string();

    chain.stop();
    steps.push(TeardownStep::Stop(name.clone()));
    chain.wait_for_stop();
    steps.push(TeardownStep::WaitForStop(name.clone()));
    if let Err(err) = chain.terminate() {
        warn!("{}", err);
        return;
    }
    steps.push(TeardownStep::Terminate(name.clone()));

    match chain.unregister_elements() {
        Ok(elements) => steps.extend(elements.into_iter().map(TeardownStep::Unregister)),
        Err(err) => warn!("{}", err),
    }
    match chain.remove_listener() {
        Ok(()) => steps.push(TeardownStep::RemoveListener(name)),
        Err(err) => warn!("{}", err),
    }
}
