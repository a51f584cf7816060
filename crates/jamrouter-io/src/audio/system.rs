//! System audio device through CPAL. Outputs silence.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AudioDriver, AudioFormat, CycleFn};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpalAudioConfig {
    /// Output device name, substring match (default: system default)
    pub device: Option<String>,
    /// Frames per callback (default: 256)
    pub period_size: u32,
}

impl Default for CpalAudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            period_size: jamrouter_core::DEFAULT_BUFFER_PERIOD_SIZE,
        }
    }
}

/// Holds a `cpal::Stream` in a `Send` context.
///
/// `cpal::Stream` is `!Send` on some platforms.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

// SAFETY: the stream is created, kept and dropped by the driver, which is
// owned by the choreographer thread and never shared. It is only moved
// together with the driver, never accessed concurrently.
unsafe impl Send for StreamHandle {}

pub struct CpalAudioDriver {
    config: CpalAudioConfig,
    alive: Arc<AtomicBool>,
    stream: Option<StreamHandle>,
}

impl fmt::Debug for CpalAudioDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalAudioDriver")
            .field("config", &self.config)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl CpalAudioDriver {
    pub fn new(config: CpalAudioConfig) -> Self {
        Self {
            config,
            alive: Arc::new(AtomicBool::new(false)),
            stream: None,
        }
    }

    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        host.output_devices()?
            .map(|device| Ok(device.name()?))
            .collect()
    }

    fn device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.config.device {
            Some(name) => {
                for device in host.output_devices()? {
                    if device.name()?.contains(name.as_str()) {
                        return Ok(device);
                    }
                }
                Err(Error::AudioDevice(format!("output device {name:?} not found")))
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioDevice("No output device available".to_string())),
        }
    }

    fn build_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut cycle: CycleFn,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = (config.channels as usize).max(1);
        let alive = Arc::clone(&self.alive);
        let err_alive = Arc::clone(&self.alive);

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = T::from_sample(0.0);
                }
                let frames = (data.len() / channels) as u32;
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    cycle(frames);
                }));
                if result.is_err() {
                    alive.store(false, Ordering::Release);
                }
            },
            move |_err| {
                // Stream errors end the device; the watchdog restarts it.
                err_alive.store(false, Ordering::Release);
            },
            None,
        )?;
        Ok(stream)
    }
}

impl AudioDriver for CpalAudioDriver {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&mut self) -> Result<AudioFormat> {
        let device = self.device()?;
        let config = device.default_output_config()?;
        Ok(AudioFormat {
            sample_rate: config.sample_rate().0,
            period_size: self.config.period_size,
        })
    }

    fn start(&mut self, cycle: CycleFn) -> Result<()> {
        if self.stream.is_some() && self.is_alive() {
            return Ok(());
        }
        self.stream = None;

        let device = self.device()?;
        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.into();
        config.buffer_size = cpal::BufferSize::Fixed(self.config.period_size);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(&device, &config, cycle)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(&device, &config, cycle)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(&device, &config, cycle)?,
            format => {
                return Err(Error::InvalidConfig(format!(
                    "Unsupported sample format: {format:?}"
                )));
            }
        };

        self.alive.store(true, Ordering::Release);
        stream.play()?;
        self.stream = Some(StreamHandle(stream));
        info!(
            target: "jamrouter::driver",
            device = %device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            period_size = self.config.period_size,
            "audio stream started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.stream = None;
        self.alive.store(false, Ordering::Release);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for CpalAudioDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
