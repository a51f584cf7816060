//! JamRouter, the top-level handle that owns every router thread.

use std::sync::Arc;

use jamrouter_core::SyncContext;
use jamrouter_io::{
    GraphInput, GraphOutput, LoopbackDevice, ShutdownHandle, Subsystem, SubsystemState,
    ThreadChoreographer, WatchdogReport,
};

use crate::config::RouterConfig;
use crate::{JamRouterBuilder, Result};

/// Phase-locked bridge between a MIDI port and an audio-cycle graph.
///
/// Build one with [`JamRouter::builder`] or [`JamRouter::from_config`],
/// take the graph ports, then [`start`](Self::start) it. Dropping the
/// router stops every thread.
///
/// ```no_run
/// use jamrouter::{JamRouter, RouterConfig};
///
/// let config = RouterConfig::load("jamrouter.toml")?;
/// let mut router = JamRouter::from_config(config)?;
/// router.run()?;
/// # Ok::<(), jamrouter::Error>(())
/// ```
pub struct JamRouter {
    choreographer: ThreadChoreographer,
    ports: Option<(GraphInput, GraphOutput)>,
    loopback: Option<LoopbackDevice>,
    config: RouterConfig,
}

impl JamRouter {
    pub fn builder() -> JamRouterBuilder {
        JamRouterBuilder::default()
    }

    pub fn from_config(config: RouterConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub(crate) fn from_parts(
        choreographer: ThreadChoreographer,
        input: GraphInput,
        output: GraphOutput,
        loopback: Option<LoopbackDevice>,
        config: RouterConfig,
    ) -> Self {
        Self {
            choreographer,
            ports: Some((input, output)),
            loopback,
            config,
        }
    }

    /// Host side of the graph: events sent to the hardware and events
    /// received from it. Only the first call returns them.
    pub fn take_graph_ports(&mut self) -> Option<(GraphInput, GraphOutput)> {
        self.ports.take()
    }

    /// The far end of the loopback transport, when the router was built
    /// with one from its configuration.
    pub fn loopback_device(&self) -> Option<&LoopbackDevice> {
        self.loopback.as_ref()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        self.choreographer.context()
    }

    pub fn state(&self, subsystem: Subsystem) -> SubsystemState {
        self.choreographer.state(subsystem)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.choreographer.shutdown_handle()
    }

    /// Starts audio, then the Rx and Tx threads.
    pub fn start(&mut self) -> Result<()> {
        self.choreographer.start()?;
        Ok(())
    }

    /// One watchdog pass, for hosts that drive their own loop.
    pub fn watchdog_cycle(&mut self) -> WatchdogReport {
        self.choreographer.watchdog_cycle()
    }

    /// Starts the router and supervises it until a shutdown is requested
    /// through a [`ShutdownHandle`].
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        self.choreographer.run_watchdog();
        self.shutdown();
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.choreographer.shutdown();
    }
}

impl std::fmt::Debug for JamRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JamRouter")
            .field("choreographer", &self.choreographer)
            .field("ports_taken", &self.ports.is_none())
            .finish()
    }
}
