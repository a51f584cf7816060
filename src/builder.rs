//! Builder for configuring and constructing a `JamRouter`.

use std::sync::Arc;

use jamrouter_core::{Clock, MonotonicClock, QueueConfig, SyncContext, TimingConfig};
use jamrouter_io::{
    AudioDriver, GraphCycle, LoopbackDevice, LoopbackTransport, MidiTransport, RouterOptions,
    ThreadChoreographer, TimerAudioDriver, GRAPH_EVENT_CAPACITY,
};

use crate::config::{AudioDriverKind, MidiDriverKind, RouterConfig};
use crate::{Error, JamRouter, Result};

/// Devices come from the configuration unless given explicitly with
/// [`transport`](Self::transport) / [`audio`](Self::audio).
///
/// # Example
///
/// ```no_run
/// use jamrouter::JamRouter;
///
/// let mut router = JamRouter::builder()
///     .period_size(128)
///     .build()?;
/// let (_input, _output) = router.take_graph_ports().expect("first call");
/// router.start()?;
/// # Ok::<(), jamrouter::Error>(())
/// ```
pub struct JamRouterBuilder {
    config: RouterConfig,
    transport: Option<Box<dyn MidiTransport>>,
    audio: Option<Box<dyn AudioDriver>>,
    clock: Option<Arc<dyn Clock>>,
    graph_capacity: usize,
}

impl Default for JamRouterBuilder {
    fn default() -> Self {
        Self {
            config: RouterConfig::default(),
            transport: None,
            audio: None,
            clock: None,
            graph_capacity: GRAPH_EVENT_CAPACITY,
        }
    }
}

impl JamRouterBuilder {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.config.queue = queue;
        self
    }

    pub fn options(mut self, options: RouterOptions) -> Self {
        self.config.options = options;
        self
    }

    /// Default: 256
    pub fn period_size(mut self, frames: u32) -> Self {
        self.config.audio.period_size = frames;
        self
    }

    pub fn transport(mut self, transport: Box<dyn MidiTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn audio(mut self, audio: Box<dyn AudioDriver>) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Default: the system monotonic clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Events per direction buffered between the host and the cycle.
    /// Default: 1024
    pub fn graph_capacity(mut self, events: usize) -> Self {
        self.graph_capacity = events;
        self
    }

    pub fn build(self) -> Result<JamRouter> {
        let config = self.config;
        config.validate()?;
        if self.graph_capacity == 0 {
            return Err(Error::Config("graph capacity must be positive".into()));
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let ctx = SyncContext::new(config.timing, config.queue, Arc::clone(&clock))?;
        let (graph, input, output) =
            GraphCycle::new(Arc::clone(&ctx), &config.options, self.graph_capacity)?;

        let mut loopback = None;
        let transport = match self.transport {
            Some(transport) => transport,
            None => midi_transport(&config, &mut loopback)?,
        };
        let audio = match self.audio {
            Some(audio) => audio,
            None => audio_driver(&config, clock)?,
        };

        let choreographer = ThreadChoreographer::new(
            ctx,
            config.options.clone(),
            transport,
            audio,
            graph,
            config.watchdog.choreography(),
        );
        Ok(JamRouter::from_parts(choreographer, input, output, loopback, config))
    }
}

fn midi_transport(
    config: &RouterConfig,
    loopback: &mut Option<LoopbackDevice>,
) -> Result<Box<dyn MidiTransport>> {
    match config.midi.driver {
        MidiDriverKind::Loopback => {
            let (transport, device) = LoopbackTransport::new(config.midi.client_name.clone());
            *loopback = Some(device);
            Ok(Box::new(transport))
        }
        #[cfg(feature = "midi-io")]
        MidiDriverKind::Midir => Ok(Box::new(jamrouter_io::MidirTransport::new(
            jamrouter_io::MidirTransportConfig {
                client_name: config.midi.client_name.clone(),
                input_port: config.midi.input_port.clone(),
                output_port: config.midi.output_port.clone(),
            },
        ))),
        #[cfg(not(feature = "midi-io"))]
        MidiDriverKind::Midir => Err(Error::Config(
            "the midir driver needs the `midi-io` feature".into(),
        )),
    }
}

fn audio_driver(config: &RouterConfig, clock: Arc<dyn Clock>) -> Result<Box<dyn AudioDriver>> {
    match config.audio.driver {
        AudioDriverKind::Timer => Ok(Box::new(TimerAudioDriver::new(
            clock,
            config.timing.sample_rate,
            config.audio.period_size,
            config.options.priorities.audio,
        ))),
        #[cfg(feature = "audio-io")]
        AudioDriverKind::Cpal => Ok(Box::new(jamrouter_io::CpalAudioDriver::new(
            jamrouter_io::CpalAudioConfig {
                device: config.audio.device.clone(),
                period_size: config.audio.period_size,
            },
        ))),
        #[cfg(not(feature = "audio-io"))]
        AudioDriverKind::Cpal => Err(Error::Config(
            "the cpal driver needs the `audio-io` feature".into(),
        )),
    }
}
