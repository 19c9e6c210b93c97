//! Windowed-energy crosstalk gate.
//!
//! The robust, fast variant of crosstalk suppression: instead of searching
//! for time-shifted copies, the gate compares per-channel activity
//! envelopes and attenuates channels that are quiet relative to the
//! momentarily loudest channel. Each channel's activity is its recent
//! windowed energy measured against its own silence floor, so channels with
//! open microphones and channels with directed microphones are compared on
//! equal footing.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::{Channel, ChannelSet};
use crate::error::{MasterError, MasterResult};
use crate::scan::WindowedSum;

/// Floor applied to activity maxima and silence floors to avoid division by
/// zero on all-silent material.
pub const ACTIVITY_FLOOR: f64 = 1e-10;

/// Configuration for [`gate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Energy-downsampling factor for the analysis signal.
    pub downsample_factor: usize,
    /// Activity window in seconds (at the downsampled rate).
    pub window_sec: f64,
    /// Mixing average window in seconds, applied at the full rate to soften
    /// gain changes.
    pub mix_sec: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            downsample_factor: 100,
            window_sec: 1.0,
            mix_sec: 0.1,
        }
    }
}

impl GateConfig {
    /// Checks for configuration that cannot be clamped into shape.
    pub fn validate(&self) -> MasterResult<()> {
        if self.downsample_factor == 0 {
            return Err(MasterError::InvalidParameter(
                "gate downsample factor must be > 0".into(),
            ));
        }
        if self.window_sec <= 0.0 || self.mix_sec <= 0.0 {
            return Err(MasterError::InvalidParameter(
                "gate windows must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Gates a channel set so that at every instant the most active channel
/// passes unchanged while passive channels are attenuated in proportion to
/// their relative activity.
///
/// Consumes the set and returns the gated result. An empty set passes
/// through unchanged.
pub fn gate(mut channels: ChannelSet, config: &GateConfig) -> MasterResult<ChannelSet> {
    config.validate()?;
    if channels.is_empty() {
        return Ok(channels);
    }

    let rate = channels[0].sample_rate();
    let work_window =
        ((config.window_sec * f64::from(rate) / config.downsample_factor as f64) as usize).max(1);
    let mix_window = ((config.mix_sec * f64::from(rate)) as usize).max(1);

    info!(work_window, mix_window, "crosstalk gate analysis");

    let count = channels.len();
    let mut activity: Vec<Channel> = Vec::with_capacity(count);

    for (i, channel) in channels.iter().enumerate() {
        let ds = channel.downsample_energy(config.downsample_factor);
        let l2 = ds.l2_norm();
        let upper = ds.l2_norm_above(l2 as f32);
        let silence_floor = ds.l2_norm_below(l2 as f32).max(ACTIVITY_FLOOR);
        debug!(channel = i, l2, upper, silence_floor, "channel norms");

        // Forward-windowed running energy, expressed as a ratio of recent
        // energy to the channel's typical silence energy.
        let mut act = Channel::zeros(ds.sample_rate(), ds.len());
        let mut sum = WindowedSum::new();
        let w = work_window as isize;
        for j in 0..ds.len() as isize {
            let s = sum.advance(f64::from(ds.at(j + w)), f64::from(ds.at(j - w)));
            act.set(j, ((s / work_window as f64 / 2.0) / silence_floor * 1000.0) as f32);
        }
        activity.push(act);
    }

    info!("crosstalk gate analysis done");

    // Walk the full-rate timeline, interpolating each channel's activity
    // between its bracketing downsampled slots and smoothing the per-sample
    // gain fractions through a trailing circular mix window.
    let mut factor = vec![0.0f64; count];
    let mut memory = vec![vec![0.0f32; mix_window]; count];
    let mut filled = 0usize;
    let mut pos = 0usize;
    let len = channels[0].len();

    for i in 0..len {
        let slot = i / config.downsample_factor;
        let frac = (i - slot * config.downsample_factor) as f64 / config.downsample_factor as f64;
        let slot = slot as isize;

        let mut max_activity = ACTIVITY_FLOOR;
        for act in &activity {
            let a = f64::from(act.at(slot)) * (1.0 - frac) + f64::from(act.at(slot + 1)) * frac;
            if a > max_activity {
                max_activity = a;
            }
        }

        filled = (filled + 1).min(mix_window);
        for c in 0..count {
            let a = f64::from(activity[c].at(slot)) * (1.0 - frac)
                + f64::from(activity[c].at(slot + 1)) * frac;
            let share = (a / max_activity) as f32;

            memory[c][pos] = share;
            factor[c] += f64::from(share);
            factor[c] -= f64::from(memory[c][(pos + 1) % mix_window]);

            channels[c].scale(i as isize, (factor[c] / filled as f64) as f32);
        }
        pos = (pos + 1) % mix_window;
    }

    info!("crosstalk gate done");
    Ok(channels)
}
