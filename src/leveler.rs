//! Selective loudness leveler working on windowed L2 energy.
//!
//! Normalizes the perceived loudness of active speech to a target level
//! while muting true silence and smoothly damping transition zones. The
//! windowed energy envelope classifies every moment as silence, transition
//! or signal and derives a per-sample gain target; a second, causal
//! smoothing pass with a tolerance band applies the gain without audible
//! pumping.
//!
//! The stereo variant levels synchronized channel pairs on their combined
//! energy and applies one gain curve to both members, preserving their
//! relative balance.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::channel::{CLAMP_CEILING, Channel, ChannelSet};
use crate::error::{MasterError, MasterResult};
use crate::scan::{GatedEnergy, WindowedEnergy};

/// Default leveling target, expressed as a windowed L2 amplitude.
pub const DEFAULT_TARGET_L2: f32 = 3000.0;

/// Tolerance band around the windowed gain target; the smoothed gain only
/// chases the target when it falls outside this band.
pub const LEVEL_TOLERANCE: f64 = 1.10;

/// Window of the exponential gain smoother, in samples.
pub const SMOOTHER_WINDOW: f64 = 65536.0;

/// Configuration for [`level`] and [`level_stereo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelerConfig {
    /// Target windowed L2 amplitude for active speech.
    pub target_l2: f32,
    /// Energy analysis window in seconds (capped at a quarter of the
    /// channel duration).
    pub window_sec: f64,
    /// Fraction of the maximum windowed energy above which full leveling
    /// applies.
    pub min_fraction: f32,
    /// Fraction of the maximum windowed energy below which a moment counts
    /// as silence and is muted.
    pub silent_fraction: f32,
    /// Look-ahead of the gain application window, in seconds.
    pub forward_window_sec: f64,
    /// Look-behind of the gain application window, in seconds.
    pub back_window_sec: f64,
}

impl Default for LevelerConfig {
    fn default() -> Self {
        Self {
            target_l2: DEFAULT_TARGET_L2,
            window_sec: 1.0,
            min_fraction: 0.05,
            silent_fraction: 0.025,
            forward_window_sec: 0.2,
            back_window_sec: 0.4,
        }
    }
}

impl LevelerConfig {
    /// Defaults tuned for leveling synchronized stereo pairs.
    pub fn stereo() -> Self {
        Self {
            target_l2: DEFAULT_TARGET_L2,
            window_sec: 1.0,
            min_fraction: 0.1,
            silent_fraction: 0.05,
            forward_window_sec: 0.1,
            back_window_sec: 0.5,
        }
    }

    /// Checks for configuration that cannot be clamped into shape.
    pub fn validate(&self) -> MasterResult<()> {
        if self.target_l2 <= 0.0 || self.window_sec <= 0.0 {
            return Err(MasterError::InvalidParameter(
                "leveler target and window must be positive".into(),
            ));
        }
        if self.silent_fraction < 0.0 || self.min_fraction <= self.silent_fraction {
            return Err(MasterError::InvalidParameter(
                "leveler needs 0 <= silent fraction < min fraction".into(),
            ));
        }
        if self.forward_window_sec < 0.0 || self.back_window_sec < 0.0 {
            return Err(MasterError::InvalidParameter(
                "leveler smoothing windows must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Levels every channel of the set independently.
pub fn level(mut channels: ChannelSet, config: &LevelerConfig) -> MasterResult<ChannelSet> {
    config.validate()?;
    for (i, channel) in channels.iter_mut().enumerate() {
        info!(channel = i, "leveling channel");
        level_channel(channel, config);
    }
    Ok(channels)
}

/// Levels the set as synchronized stereo pairs; a trailing unpaired channel
/// is leveled on its own.
pub fn level_stereo(mut channels: ChannelSet, config: &LevelerConfig) -> MasterResult<ChannelSet> {
    config.validate()?;
    let slice = channels.as_mut_slice();
    let mut i = 0;
    while i < slice.len() {
        if i + 1 < slice.len() {
            info!(left = i, right = i + 1, "leveling stereo pair");
            let (head, tail) = slice.split_at_mut(i + 1);
            level_pair(&mut head[i], &mut tail[0], config);
        } else {
            info!(channel = i, "leveling channel");
            level_channel(&mut slice[i], config);
        }
        i += 2;
    }
    Ok(channels)
}

/// Sizes the analysis windows for a channel of `len` samples, capping the
/// energy window at a quarter of the duration.
fn window_sizes(len: usize, rate: f64, config: &LevelerConfig) -> (usize, usize, usize) {
    let window_sec = config.window_sec.min(len as f64 / rate / 4.0);
    (
        (window_sec * rate) as usize,
        (config.forward_window_sec * rate) as usize,
        (config.back_window_sec * rate) as usize,
    )
}

fn level_channel(c: &mut Channel, config: &LevelerConfig) {
    let size = c.len();
    let rate = f64::from(c.sample_rate());
    let (window, forward_window, back_window) = window_sizes(size, rate, config);
    if window < 2 {
        return;
    }
    let half = window / 2;
    let mut max_l2 = 0.0f32;

    // Centered windowed L2 envelope, edges held flat.
    let mut factors = vec![0.0f32; size];
    let mut energy = WindowedEnergy::new();
    for j in 0..window {
        energy.admit(f64::from(c.at(j as isize)));
    }
    for i in half..size - half - 1 {
        let f = (energy.value() / window as f64).sqrt() as f32;
        factors[i] = f;
        if f > max_l2 {
            max_l2 = f;
        }
        energy.advance(
            f64::from(c.at((i + half) as isize)),
            f64::from(c.at((i - half) as isize)),
        );
    }
    for i in 0..half {
        factors[i] = factors[half];
    }
    for i in size - half - 1..size {
        factors[i] = factors[size - half - 2];
    }

    // Threshold-gated envelope: only samples at or above the local envelope
    // enter, so windows diluted by interleaved silence read lower.
    let mut factors2 = vec![0.0f32; size];
    let mut gated = GatedEnergy::new();
    for i in 0..window {
        let x = c.at(i as isize);
        gated.admit(f64::from(x), x >= factors[i]);
    }
    for i in half..size - half - 1 {
        let out = c.at((i - half) as isize);
        gated.retire(f64::from(out), out >= factors[i - half]);
        let inc = c.at((i + half) as isize);
        gated.admit(f64::from(inc), inc >= factors[i + half]);

        let f = gated.rms() as f32;
        factors2[i] = f;
        if f > max_l2 {
            max_l2 = f;
        }
    }

    if max_l2 <= 0.0 {
        return;
    }
    let min_level = max_l2 * config.min_fraction;
    let silent_level = max_l2 * config.silent_fraction;
    info!(max_l2, min_level, silent_level, "windowed energy levels");

    let mut silent = 0usize;
    let mut transition = 0usize;
    let mut full = 0usize;
    let mut over = 0usize;
    for i in half..size - half - 1 {
        let f = factors2[i];
        if f < silent_level {
            factors2[i] = 0.0;
            silent += 1;
        } else if f < min_level {
            factors2[i] = (config.target_l2 / f) * (f - silent_level) / (min_level - silent_level);
            transition += 1;
        } else {
            factors2[i] = config.target_l2 / f;
            full += 1;
        }
        let sample = c.at(i as isize);
        if (factors2[i] * sample).abs() > CLAMP_CEILING {
            factors2[i] = CLAMP_CEILING / sample.abs();
            over += 1;
        }
    }
    for i in 0..half {
        factors2[i] = factors2[half] * i as f32 / half as f32;
    }
    for i in size - half - 1..size {
        factors2[i] = factors2[size - half - 2] * (size - i) as f32 / half as f32;
    }
    info!(
        silent_sec = silent as f64 / rate,
        transition_sec = transition as f64 / rate,
        full_sec = full as f64 / rate,
        over_sec = over as f64 / rate,
        "level classification"
    );

    // Causal application pass: a forward/back moving average of the factor
    // combined with an exponential smoother and a tolerance band produces
    // audibly gradual gain changes instead of per-window jumps.
    let mut window_count = forward_window as i64;
    let mut factor_sum = 0.0f64;
    for i in 0..forward_window.min(size) {
        factor_sum += f64::from(factors2[i]);
    }
    let mut moving = 0.0f64;

    for i in 0..size {
        let mut f = factor_sum / window_count.max(1) as f64;
        let target = f64::from(factors2[i]);
        if f > target {
            f = target;
        }

        moving = ((SMOOTHER_WINDOW - 1.0) * moving + f) / SMOOTHER_WINDOW;
        if moving < f / LEVEL_TOLERANCE {
            moving = moving / 0.995 + 0.0001;
        }
        if moving > f * LEVEL_TOLERANCE {
            moving *= 0.999;
        }

        let sample = f64::from(c.at(i as isize));
        if (moving * sample).abs() > f64::from(CLAMP_CEILING) {
            moving = (f64::from(CLAMP_CEILING) / sample).abs();
        }
        c.set(i as isize, (sample * moving) as f32);

        if i >= back_window {
            factor_sum -= f64::from(factors2[i - back_window]);
            window_count -= 1;
            if factor_sum < 0.0 {
                factor_sum = 0.0;
            }
            if window_count < 1 {
                window_count = 1;
            }
        }
        if i + forward_window < size {
            factor_sum += f64::from(factors2[i + forward_window]);
            window_count += 1;
        }
    }
}

fn level_pair(a: &mut Channel, b: &mut Channel, config: &LevelerConfig) {
    if a.sample_rate() > b.sample_rate() {
        *b = b.resampled(a.sample_rate());
    } else if a.sample_rate() < b.sample_rate() {
        *a = a.resampled(b.sample_rate());
    }
    let size = a.len().max(b.len());
    if size == 0 {
        return;
    }
    let rate = f64::from(a.sample_rate());
    let (window, forward_window, back_window) = window_sizes(size, rate, config);
    if window < 2 {
        return;
    }
    let half = window / 2;
    let mut max_l2 = 0.0f32;

    // Combined windowed L2 envelope of the pair.
    let mut factors = vec![0.0f32; size];
    let mut energy = WindowedEnergy::new();
    for j in 0..window as isize {
        energy.admit(f64::from(a.at(j)));
        energy.admit(f64::from(b.at(j)));
    }
    for i in half..size - half - 1 {
        let f = (energy.value() / window as f64 / 2.0).sqrt() as f32;
        factors[i] = f;
        if f > max_l2 {
            max_l2 = f;
        }
        energy.advance(
            f64::from(a.at((i + half) as isize)),
            f64::from(a.at((i - half) as isize)),
        );
        energy.advance(
            f64::from(b.at((i + half) as isize)),
            f64::from(b.at((i - half) as isize)),
        );
    }

    if max_l2 <= 0.0 {
        return;
    }
    let min_level = max_l2 * config.min_fraction;
    let silent_level = max_l2 * config.silent_fraction;
    info!(max_l2, min_level, silent_level, "windowed energy levels");

    let mut silent = 0usize;
    let mut transition = 0usize;
    let mut full = 0usize;
    let mut over = 0usize;
    for i in half..size - half - 1 {
        let f = factors[i];
        if f < silent_level {
            factors[i] = 0.0;
            silent += 1;
        } else if f < min_level {
            factors[i] = (config.target_l2 / f) * (f - silent_level) / (min_level - silent_level);
            transition += 1;
        } else {
            factors[i] = config.target_l2 / f;
            full += 1;
        }
        let left = a.at(i as isize);
        let right = b.at(i as isize);
        if (factors[i] * left).abs() > CLAMP_CEILING || (factors[i] * right).abs() > CLAMP_CEILING
        {
            factors[i] = (CLAMP_CEILING / left.abs()).min(CLAMP_CEILING / right.abs());
            over += 1;
        }
    }
    for i in 0..half {
        factors[i] = factors[half] * i as f32 / half as f32;
    }
    for i in size - half - 1..size {
        factors[i] = factors[size - half - 2] * (size - i) as f32 / half as f32;
    }
    info!(
        silent_sec = silent as f64 / rate,
        transition_sec = transition as f64 / rate,
        full_sec = full as f64 / rate,
        over_sec = over as f64 / rate,
        "level classification"
    );

    // The pair shares one gain curve, applied through the plain windowed
    // average; both channels scale identically so their balance survives.
    let mut window_count = forward_window as i64;
    let mut factor_sum = 0.0f64;
    for i in 0..forward_window.min(size) {
        factor_sum += f64::from(factors[i]);
    }

    for i in 0..size {
        let mut f = factor_sum / window_count.max(1) as f64;
        let target = f64::from(factors[i]);
        if f > target {
            f = target;
        }
        a.scale(i as isize, f as f32);
        b.scale(i as isize, f as f32);

        if i >= back_window {
            factor_sum -= f64::from(factors[i - back_window]);
            window_count -= 1;
            if factor_sum < 0.0 {
                factor_sum = 0.0;
            }
        }
        if i + forward_window < size {
            factor_sum += f64::from(factors[i + forward_window]);
            window_count += 1;
        }
    }
}
