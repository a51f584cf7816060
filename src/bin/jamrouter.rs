//! Router binary. Takes an optional TOML config path as its only argument.

use std::env;

use jamrouter::{logging, JamRouter, Result, RouterConfig};

fn main() -> Result<()> {
    let config = match env::args().nth(1) {
        Some(path) => RouterConfig::load(path)?,
        None => RouterConfig::default(),
    };

    let _log = logging::init(&config.logging)?;
    tracing::info!(
        target: "jamrouter::init",
        midi = ?config.midi.driver,
        audio = ?config.audio.driver,
        sample_rate = config.timing.sample_rate,
        period_size = config.audio.period_size,
        "starting"
    );

    let mut router = JamRouter::from_config(config)?;
    router.run()
}
