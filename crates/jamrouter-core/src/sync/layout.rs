//! Ring geometry for a given sample rate and period size.

use crate::config::TimingConfig;
use crate::{Error, Result, MAX_BUFFER_PERIODS, MAX_BUFFER_SIZE};

/// Everything about a period that depends only on sample rate, period size
/// and latency settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodLayout {
    pub sample_rate: u32,
    /// Frames per period.
    pub size: u32,
    /// Number of periods in the ring.
    pub periods: u32,
    pub rx_latency_periods: u32,
    pub tx_latency_periods: u32,
    /// Nominal period length from the sample rate.
    pub nsec_per_period: f64,
    pub nsec_per_frame: f64,
    /// Frames spanned by one byte at MIDI wire speed (31250 baud).
    pub frames_per_byte: u32,
    /// Time constant of the period-length moving average, in periods.
    pub decay_generations: f64,
}

/// Queue base indices of one ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotIndices {
    pub input: u32,
    pub output: u32,
    pub rx: u32,
    pub tx: u32,
}

impl PeriodLayout {
    pub fn new(timing: &TimingConfig, sample_rate: u32, size: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        if !size.is_power_of_two() || !(16..=2048).contains(&size) || size as usize * 4 > MAX_BUFFER_SIZE {
            return Err(Error::UnsupportedPeriodSize(size));
        }

        let mut rx = match timing.rx_latency_periods {
            0 => sample_rate / (size * 666),
            n => n,
        }
        .max(1);
        let mut tx = match timing.tx_latency_periods {
            0 => sample_rate / (size * 2160),
            n => n,
        }
        .max(1);

        let periods = if size >= 128 {
            if size >= 256 {
                rx = 1;
                tx = 1;
            }
            // Keep the audio wakeup away from either period boundary.
            let lock_frames = size as f64 * timing.phase_setting();
            let margin = (sample_rate / 1500) as f64;
            if lock_frames < margin && rx < 2 {
                rx = 2;
            } else if lock_frames > size as f64 - margin && tx < 2 {
                tx = 2;
            }
            4
        } else {
            let mut periods = 512 / size;
            if periods > rx.max(tx) * 2 {
                periods >>= 1;
            }
            periods.min(MAX_BUFFER_PERIODS as u32)
        };

        if rx >= periods || tx >= periods {
            return Err(Error::InvalidLatency { rx, tx, periods });
        }

        let nsec_per_period = size as f64 * 1e9 / sample_rate as f64;
        Ok(Self {
            sample_rate,
            size,
            periods,
            rx_latency_periods: rx,
            tx_latency_periods: tx,
            nsec_per_period,
            nsec_per_frame: nsec_per_period / size as f64,
            frames_per_byte: frames_per_byte(sample_rate),
            decay_generations: 360.0 * sample_rate as f64 / size as f64,
        })
    }

    #[inline]
    pub fn buffer_size(&self) -> u32 {
        self.size * self.periods
    }

    #[inline]
    pub fn buffer_size_mask(&self) -> u32 {
        self.buffer_size() - 1
    }

    #[inline]
    pub fn period_mask(&self) -> u32 {
        self.periods - 1
    }

    #[inline]
    pub fn rx_latency_size(&self) -> u32 {
        self.rx_latency_periods * self.size
    }

    #[inline]
    pub fn tx_latency_size(&self) -> u32 {
        self.tx_latency_periods * self.size
    }

    /// Queue indices for ring slot `slot`.
    ///
    /// Rx writes one latency ahead of where the graph reads; the graph
    /// writes one latency ahead of where Tx reads.
    pub fn indices(&self, slot: u32) -> SlotIndices {
        let base = slot * self.size;
        let mask = self.buffer_size_mask();
        SlotIndices {
            input: base,
            output: base,
            rx: (base + self.rx_latency_size()) & mask,
            tx: (base + self.buffer_size() - self.tx_latency_size()) & mask,
        }
    }

    /// `(prev, next)` ring links of `slot`. Slots outside the ring link
    /// forward to slot 0.
    pub fn links(&self, slot: u32) -> (u32, u32) {
        if slot < self.periods {
            let mask = self.period_mask();
            ((slot + mask) & mask, (slot + 1) & mask)
        } else {
            (slot - 1, 0)
        }
    }

    /// Target wakeup window, in frames from the period start.
    pub fn phase_window(&self, timing: &TimingConfig) -> PhaseWindow {
        let size = self.size as f64;
        if self.size == 16 {
            return PhaseWindow {
                lock: 5.0,
                min: 1.5,
                max: 8.5,
            };
        }

        let mut lock = timing.phase_setting() * size;
        if self.sample_rate / self.size == 750
            && self.rx_latency_periods == 1
            && timing.is_default_phase()
        {
            lock = 0.75 * size;
        }
        if lock < 8.0 {
            lock = 8.0;
        }
        if lock > size - 9.0 {
            lock = size - 9.0;
        }
        PhaseWindow {
            lock,
            min: lock - 4.0,
            max: lock + 4.0,
        }
    }
}

/// Phase-lock target and its jitter allowance, in frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseWindow {
    pub lock: f64,
    pub min: f64,
    pub max: f64,
}

fn frames_per_byte(sample_rate: u32) -> u32 {
    match sample_rate {
        22_050 => 8,
        32_000 => 10,
        44_100 => 15,
        48_000 => 16,
        64_000 => 20,
        88_200 | 96_000 => 30,
        176_400 | 192_000 => 60,
        384_000 => 120,
        sr => sr * 10 / 31_250,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn layout(sr: u32, size: u32) -> PeriodLayout {
        PeriodLayout::new(&TimingConfig::default(), sr, size).unwrap()
    }

    #[test]
    fn test_large_periods_use_single_latency() {
        let l = layout(48_000, 256);
        assert_eq!(l.periods, 4);
        assert_eq!((l.rx_latency_periods, l.tx_latency_periods), (1, 1));
        assert_eq!(l.buffer_size(), 1024);
        assert_relative_eq!(l.nsec_per_period, 5_333_333.333, epsilon = 0.01);
        assert_eq!(l.frames_per_byte, 16);
        assert_relative_eq!(l.decay_generations, 67_500.0);
    }

    #[test]
    fn test_small_periods_grow_ring() {
        let l = layout(48_000, 16);
        // rx = 48000 / (16 * 666) = 4, tx = 1; 32 periods halved once.
        assert_eq!(l.rx_latency_periods, 4);
        assert_eq!(l.tx_latency_periods, 1);
        assert_eq!(l.periods, 16);

        let l = layout(48_000, 64);
        assert_eq!(l.rx_latency_periods, 1);
        assert_eq!(l.periods, 4);
    }

    #[test]
    fn test_phase_near_boundary_raises_latency() {
        let early = TimingConfig {
            phase_lock: 0.0625,
            ..Default::default()
        };
        let l = PeriodLayout::new(&early, 48_000, 128).unwrap();
        assert_eq!(l.rx_latency_periods, 2);

        let late = TimingConfig {
            phase_lock: 0.9375,
            ..Default::default()
        };
        let l = PeriodLayout::new(&late, 48_000, 128).unwrap();
        assert_eq!(l.rx_latency_periods, 1);
        assert_eq!(l.tx_latency_periods, 2);
    }

    #[test]
    fn test_rejects_unsupported_sizes() {
        let t = TimingConfig::default();
        assert!(PeriodLayout::new(&t, 48_000, 100).is_err());
        assert!(PeriodLayout::new(&t, 48_000, 8).is_err());
        assert!(PeriodLayout::new(&t, 48_000, 2048).is_ok());
        assert!(PeriodLayout::new(&t, 48_000, 4096).is_err());
    }

    #[test]
    fn test_indices_wrap() {
        let l = layout(48_000, 256);
        assert_eq!(
            l.indices(0),
            SlotIndices {
                input: 0,
                output: 0,
                rx: 256,
                tx: 768
            }
        );
        assert_eq!(l.indices(3).rx, 0);
        assert_eq!(l.indices(3).tx, 512);
    }

    #[test]
    fn test_links() {
        let l = layout(48_000, 256);
        assert_eq!(l.links(0), (3, 1));
        assert_eq!(l.links(3), (2, 0));
        assert_eq!(l.links(9), (8, 0));
    }

    #[test]
    fn test_phase_window() {
        let t = TimingConfig::default();
        let w = layout(48_000, 256).phase_window(&t);
        assert_eq!((w.lock, w.min, w.max), (128.0, 124.0, 132.0));

        // 48000 / 64 == 750 with one Rx period
        let w = layout(48_000, 64).phase_window(&t);
        assert_eq!(w.lock, 48.0);

        let w = layout(48_000, 16).phase_window(&t);
        assert_eq!((w.lock, w.min, w.max), (5.0, 1.5, 8.5));

        let w = layout(48_000, 32).phase_window(&t);
        assert_eq!(w.lock, 16.0);
    }

    #[test]
    fn test_frames_per_byte_fallback() {
        assert_eq!(frames_per_byte(50_000), 16);
        assert_eq!(frames_per_byte(44_100), 15);
    }
}
