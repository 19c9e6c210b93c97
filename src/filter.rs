//! Cross-correlation crosstalk filter.
//!
//! The precise, experimental counterpart to the [`gate`](crate::gate): for
//! every ordered channel pair it searches for the time shift at which one
//! channel's signal explains another channel's signal, then attenuates each
//! channel in proportion to how much of its current energy is explained
//! away as crosstalk from other channels.
//!
//! Two analysis formulations coexist. [`AnalysisStrategy::Correlation`]
//! measures a windowed residual energy per channel after subtracting the
//! best-aligned incoming correlation and adding back the best-aligned
//! outgoing one; crosstalk *received* reduces confidence that energy is
//! original, while demonstrably causing crosstalk *elsewhere* increases it.
//! [`AnalysisStrategy::Ratio`] is a simpler symmetric formulation based on
//! the ratio of best-fit difference energy to own energy. Neither has been
//! declared authoritative, so both stay selectable behind one interface.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelSet};
use crate::error::{MasterError, MasterResult};
use crate::gate::ACTIVITY_FLOOR;
use crate::physics;
use crate::scan::{CorrelationLane, WindowedEnergy, WindowedSum};

/// Local refinement searched either side of a discovered best shift.
const SHIFT_REFINEMENT: isize = 20;

/// Fallback sample rate assumed for an empty channel set.
const DEFAULT_RATE: u32 = 44100;

/// Selectable crosstalk analysis formulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalysisStrategy {
    /// Residual-energy formulation driven by sliding cross-correlation
    /// profiles around the per-pair best alignment shift.
    #[default]
    Correlation,
    /// Symmetric difference-energy ratio formulation.
    Ratio,
}

/// Configuration for [`CrosstalkFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Block-average downsampling factor for the analysis signal.
    pub downsample_factor: usize,
    /// Comparison window in seconds (at the downsampled rate).
    pub window_sec: f64,
    /// Minimum assumed microphone separation in meters.
    pub min_distance_m: f64,
    /// Maximum assumed microphone separation in meters.
    pub max_distance_m: f64,
    /// Residual ratio at which attenuation starts.
    pub mute_start_ratio: f64,
    /// Residual ratio at which attenuation reaches full mute.
    pub mute_full_ratio: f64,
    /// Analysis formulation to run.
    pub strategy: AnalysisStrategy,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            downsample_factor: 3,
            window_sec: 0.66,
            min_distance_m: 0.5,
            max_distance_m: 3.0,
            mute_start_ratio: 1.2,
            mute_full_ratio: 1.5,
            strategy: AnalysisStrategy::Correlation,
        }
    }
}

impl FilterConfig {
    /// Checks for configuration that cannot be clamped into shape.
    pub fn validate(&self) -> MasterResult<()> {
        if self.downsample_factor == 0 {
            return Err(MasterError::InvalidParameter(
                "filter downsample factor must be > 0".into(),
            ));
        }
        if self.window_sec <= 0.0 {
            return Err(MasterError::InvalidParameter(
                "filter window must be positive".into(),
            ));
        }
        if self.mute_full_ratio <= self.mute_start_ratio {
            return Err(MasterError::InvalidParameter(
                "mute ramp needs full ratio > start ratio".into(),
            ));
        }
        Ok(())
    }
}

/// Crosstalk filter over a channel set.
///
/// Owns the channels for the duration of the analysis; [`Self::mute`]
/// applies the computed per-block gains and hands the channels back.
#[derive(Debug)]
pub struct CrosstalkFilter {
    channels: ChannelSet,
    downsample_factor: usize,
    work_window: usize,
    min_shift: usize,
    max_shift: usize,
    mute_start_ratio: f64,
    mute_full_ratio: f64,
    strategy: AnalysisStrategy,
    downsampled: Vec<Channel>,
    activity: Vec<Channel>,
    mute_factor: Vec<Channel>,
    shifts: Option<Vec<Vec<usize>>>,
}

impl CrosstalkFilter {
    /// Creates a filter from physical settings, converting the assumed
    /// microphone distances into a time-shift search range via the speed of
    /// sound.
    pub fn new(channels: ChannelSet, config: &FilterConfig) -> MasterResult<Self> {
        config.validate()?;

        let rate = if channels.is_empty() {
            DEFAULT_RATE
        } else {
            channels[0].sample_rate()
        };
        let analysis_rate = f64::from(rate) / config.downsample_factor as f64;

        let work_window = ((config.window_sec * analysis_rate + 0.5) as usize).max(2);
        let min_shift =
            ((physics::meter_to_sec(config.min_distance_m) * analysis_rate + 0.5) as usize).max(1);
        let max_shift =
            (physics::meter_to_sec(config.max_distance_m) * analysis_rate + 0.5) as usize;

        Self::with_sample_range(channels, config, work_window, min_shift, max_shift)
    }

    /// Creates a filter from explicit sample settings; the shift range is
    /// expressed in downsampled samples.
    pub fn with_sample_range(
        channels: ChannelSet,
        config: &FilterConfig,
        work_window: usize,
        min_shift: usize,
        mut max_shift: usize,
    ) -> MasterResult<Self> {
        config.validate()?;

        if max_shift <= min_shift {
            warn!(min_shift, max_shift, "clamping inverted shift range");
            max_shift = min_shift + 1;
        }
        info!(work_window, min_shift, max_shift, "crosstalk filter setup");

        let mut filter = Self {
            channels,
            downsample_factor: config.downsample_factor,
            work_window,
            min_shift,
            max_shift,
            mute_start_ratio: config.mute_start_ratio,
            mute_full_ratio: config.mute_full_ratio,
            strategy: config.strategy,
            downsampled: Vec::new(),
            activity: Vec::new(),
            mute_factor: Vec::new(),
            shifts: None,
        };
        filter.prepare();
        Ok(filter)
    }

    /// Downsamples every channel and derives its norms and activity
    /// envelope.
    fn prepare(&mut self) {
        let count = self.channels.len();
        self.downsampled = Vec::with_capacity(count);
        self.activity = Vec::with_capacity(count);
        self.mute_factor = Vec::with_capacity(count);

        // The activity window is stretched tenfold compared to the
        // comparison window; it only has to discriminate who is talking.
        let w = self.work_window as isize * 10;

        for (i, channel) in self.channels.iter().enumerate() {
            let ds = channel.downsample(self.downsample_factor);
            let l2 = ds.l2_norm();
            let silence_floor = ds.l2_norm_below(l2 as f32).max(ACTIVITY_FLOOR);
            debug!(channel = i, l2, silence_floor, "channel norms");

            let mut act = Channel::zeros(ds.sample_rate(), ds.len());
            let mut sum = WindowedSum::new();
            for j in 0..ds.len() as isize {
                let s = sum.advance(f64::from(ds.at(j + w)), f64::from(ds.at(j - w)));
                act.set(
                    j,
                    ((s / self.work_window as f64 / 2.0 / 10.0) / silence_floor * 1000.0) as f32,
                );
            }

            self.mute_factor.push(Channel::zeros(ds.sample_rate(), ds.len()));
            self.activity.push(act);
            self.downsampled.push(ds);
        }
    }

    /// Runs the configured analysis strategy, filling the per-channel mute
    /// factors. Does not alter any channel.
    pub fn analyze(&mut self) -> MasterResult<()> {
        debug!(channels = self.channels.len(), strategy = ?self.strategy, "analyzing");
        match self.strategy {
            AnalysisStrategy::Correlation => self.analyze_correlation(),
            AnalysisStrategy::Ratio => {
                self.analyze_ratio();
                Ok(())
            }
        }
    }

    /// Best alignment shift discovered for the ordered pair `(i, j)`, the
    /// shift at which channel `j` appears as crosstalk in channel `i`.
    ///
    /// Available after a [`AnalysisStrategy::Correlation`] analysis.
    pub fn best_shift(&self, i: usize, j: usize) -> Option<usize> {
        self.shifts.as_ref().and_then(|s| s.get(i)).and_then(|row| row.get(j)).copied()
    }

    /// Per-channel mute accumulators at the analysis rate.
    pub fn mute_factors(&self) -> &[Channel] {
        &self.mute_factor
    }

    #[cfg(test)]
    pub(crate) fn mute_factors_mut(&mut self) -> &mut Vec<Channel> {
        &mut self.mute_factor
    }

    /// Searches every ordered channel pair for its best alignment shift.
    fn pair_shifts(&self) -> Vec<Vec<usize>> {
        let count = self.channels.len();
        let mut shifts = vec![vec![0usize; count]; count];

        for i in 0..count {
            for j in 0..count {
                if i == j {
                    continue;
                }
                let ds_i = &self.downsampled[i];
                let ds_j = &self.downsampled[j];
                let mut best = 0usize;
                let mut best_sum = 0.0f64;
                for k in self.min_shift..self.max_shift {
                    let mut sum = 0.0f64;
                    for l in 0..ds_i.len() as isize {
                        sum += f64::from(ds_i.at(l)) * f64::from(ds_j.at(l - k as isize));
                    }
                    sum = (sum / self.channels[i].len().max(1) as f64).abs();
                    if sum > best_sum {
                        best_sum = sum;
                        best = k;
                    }
                }
                let distance = physics::sec_to_meter(
                    best as f64 / f64::from(ds_i.sample_rate().max(1)),
                );
                debug!(i, j, best, distance, best_sum, "pair alignment");
                shifts[i][j] = best;
            }
        }
        shifts
    }

    /// Residual-energy analysis around the per-pair best shifts.
    fn analyze_correlation(&mut self) -> MasterResult<()> {
        let count = self.channels.len();
        let shifts = self.pair_shifts();
        let lanes = (SHIFT_REFINEMENT * 2 + 1) as usize;
        let w = self.work_window as isize;

        for i in 0..count {
            self.mute_factor[i] =
                Channel::zeros(self.downsampled[i].sample_rate(), self.downsampled[i].len());

            for j in 0..count {
                if i == j {
                    continue;
                }
                let ds_i = &self.downsampled[i];
                let ds_j = &self.downsampled[j];
                let shift_in = shifts[i][j] as isize;
                let shift_out = shifts[j][i] as isize;

                let mut lanes_in = vec![CorrelationLane::new(); lanes];
                let mut lanes_out = vec![CorrelationLane::new(); lanes];
                let mut own = WindowedEnergy::new();

                // Warm the profiles up on the first half window.
                for l in -w..0 {
                    let own_in = f64::from(ds_i.at(l + w));
                    for v in -SHIFT_REFINEMENT..=SHIFT_REFINEMENT {
                        let lane = (v + SHIFT_REFINEMENT) as usize;
                        lanes_in[lane].admit(own_in, f64::from(ds_j.at(l + w - shift_in + v)));
                        lanes_out[lane].admit(own_in, f64::from(ds_j.at(l + w + shift_out + v)));
                    }
                    own.admit(own_in);
                }

                for l in 0..ds_i.len() as isize {
                    let own_in = f64::from(ds_i.at(l + w));
                    let own_out = f64::from(ds_i.at(l - w));

                    let mut best_in = 0usize;
                    let mut skp_in = 0.0f64;
                    let mut best_out = 0usize;
                    let mut skp_out = 0.0f64;

                    for v in -SHIFT_REFINEMENT..=SHIFT_REFINEMENT {
                        let lane = (v + SHIFT_REFINEMENT) as usize;
                        lanes_in[lane].advance(
                            own_in,
                            f64::from(ds_j.at(l + w - shift_in + v)),
                            own_out,
                            f64::from(ds_j.at(l - w - shift_in + v)),
                        );
                        if lanes_in[lane].dot().abs() > skp_in {
                            skp_in = lanes_in[lane].dot().abs();
                            best_in = lane;
                        }
                        lanes_out[lane].advance(
                            own_in,
                            f64::from(ds_j.at(l + w + shift_out + v)),
                            own_out,
                            f64::from(ds_j.at(l - w + shift_out + v)),
                        );
                        if lanes_out[lane].dot().abs() > skp_out {
                            skp_out = lanes_out[lane].dot().abs();
                            best_out = lane;
                        }
                    }

                    let ni2 = own.advance(own_in, own_out);

                    // Residual: own energy, minus what the best incoming
                    // alignment explains, plus what this channel itself
                    // explains elsewhere. An alignment alone cannot tell a
                    // source from its copy on periodic material, so each
                    // term counts only when the energies support its claim:
                    // crosstalk comes from a louder channel and leaks into a
                    // quieter one.
                    let mut nr = ni2;
                    if lanes_in[best_in].energy() > ni2 {
                        nr -= skp_in * skp_in / lanes_in[best_in].energy();
                    }
                    if lanes_out[best_out].energy() > 0.0 && lanes_out[best_out].energy() < ni2 {
                        nr += skp_out * skp_out / lanes_out[best_out].energy();
                    }

                    let current = self.mute_factor[i].at(l);
                    if !current.is_finite() {
                        error!(channel = i, sample = l, ni2, nr, skp_in, "non-finite mute factor");
                        return Err(MasterError::NonFinite {
                            channel: i,
                            sample: l as usize,
                        });
                    }
                    if ni2 > 0.0 && nr > 0.0 {
                        self.mute_factor[i]
                            .set(l, current + ((ni2.sqrt() - nr.sqrt()) / ni2.sqrt()) as f32);
                    }
                    if !self.mute_factor[i].at(l).is_finite() {
                        error!(channel = i, sample = l, ni2, nr, skp_in, "non-finite mute factor");
                        return Err(MasterError::NonFinite {
                            channel: i,
                            sample: l as usize,
                        });
                    }
                }
            }
        }

        self.shifts = Some(shifts);
        Ok(())
    }

    /// Symmetric difference-energy ratio analysis.
    fn analyze_ratio(&mut self) {
        let count = self.channels.len();
        let w = self.work_window as isize;
        let ramp = self.mute_full_ratio - self.mute_start_ratio;

        for i in 0..count {
            let len = self.downsampled[i].len();
            debug!(channel = i, windows = len, "ratio analysis");
            let mut full_mutes = 0usize;
            let mut shift_total = 0usize;

            for j in 0..len as isize {
                let mut mute = 1.0f64;

                let mut k = self.min_shift;
                while k < self.max_shift && mute > 0.0 {
                    let shift = k as isize;
                    for c in 0..count {
                        if c == i || mute <= 0.0 {
                            continue;
                        }
                        let ds_i = &self.downsampled[i];
                        let ds_c = &self.downsampled[c];

                        let mut other = 0.0f64;
                        let mut own = 0.0f64;
                        for l in -w..w {
                            other += f64::from(ds_c.at(j + l - shift)).abs();
                            own += f64::from(ds_i.at(j + l)).abs();
                        }
                        if own <= 0.0 {
                            continue;
                        }

                        // Best-fit scale, then the remaining difference
                        // energy relative to the (scaled) own energy.
                        let factor = own / other;
                        let own_scaled = own * factor;
                        let mut diff = 0.0f64;
                        for l in -w..w {
                            diff += (f64::from(ds_i.at(j + l))
                                - factor * f64::from(ds_c.at(j + l - shift)))
                            .abs();
                        }

                        let mut r = diff / own_scaled;
                        if self.activity[i].at(j) > self.activity[c].at(j - shift) {
                            r -= 0.25;
                        } else {
                            r += 0.25;
                        }

                        let mut new_mute = 1.0f64;
                        if r > self.mute_start_ratio && r < self.mute_full_ratio {
                            new_mute = 1.0 - (r - self.mute_start_ratio) / ramp;
                        } else if r > self.mute_full_ratio {
                            new_mute = 0.0;
                            full_mutes += 1;
                            shift_total += k;
                        }
                        if new_mute < mute {
                            mute = new_mute;
                        }
                    }
                    k += 1;
                }
                self.mute_factor[i].set(j, mute as f32);
            }
            if full_mutes > 0 {
                debug!(
                    channel = i,
                    full_mutes,
                    avg_shift = shift_total as f64 / full_mutes as f64,
                    "full mutes found"
                );
            }
        }
    }

    /// Rescales the accumulated mute values across channels and applies the
    /// resulting per-block gains to every full-rate sample, handing back
    /// the channel set.
    pub fn mute(mut self) -> MasterResult<ChannelSet> {
        if self.mute_factor.is_empty() || self.mute_factor[0].is_empty() {
            return Ok(self.channels);
        }
        let count = self.channels.len();
        let slots = self.mute_factor[0].len();

        // The correlation analysis accumulates relative muteness and needs a
        // cross-channel rescale into gains; the ratio analysis emits gains
        // directly.
        if self.strategy == AnalysisStrategy::Correlation {
            for j in 0..slots as isize {
                let mut max = -1.0f32;
                let mut min = 1.0f32;
                for factors in &self.mute_factor {
                    let v = factors.at(j);
                    if v > max {
                        max = v;
                    }
                    if v < min {
                        min = v;
                    }
                }
                // A minimum spread keeps agreeing channels from being torn
                // apart by numeric noise.
                if max - min < 0.1 {
                    max = min + 0.1;
                }
                for c in 0..count {
                    let gain = 1.0 - (self.mute_factor[c].at(j) - min) / (max - min);
                    if !gain.is_finite() {
                        error!(channel = c, sample = j, "non-finite mute factor");
                        return Err(MasterError::NonFinite {
                            channel: c,
                            sample: j as usize,
                        });
                    }
                    self.mute_factor[c].set(j, gain.max(0.0));
                }
            }
        }

        for c in 0..count {
            let size = self.channels[c].len();
            let reduced = self.mute_factor[c].len();
            if reduced == 0 {
                continue;
            }
            let block = size / reduced;
            for i in 0..size {
                let slot = (i / block.max(1)) as isize;
                self.channels[c].scale(i as isize, self.mute_factor[c].at(slot));
                if !self.channels[c].at(i as isize).is_finite() {
                    error!(channel = c, sample = i, "non-finite sample after mute");
                    return Err(MasterError::NonFinite {
                        channel: c,
                        sample: i,
                    });
                }
            }
        }

        Ok(self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic xorshift noise in [-1, 1), scaled.
    fn noise(len: usize, amplitude: f32, mut seed: u64) -> Vec<f32> {
        (0..len)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let unit = (seed >> 11) as f64 / (1u64 << 53) as f64;
                amplitude * (2.0 * unit - 1.0) as f32
            })
            .collect()
    }

    fn delayed_copy(source: &[f32], delay: usize, scale: f32) -> Vec<f32> {
        let mut out = vec![0.0f32; source.len()];
        for i in delay..source.len() {
            out[i] = scale * source[i - delay];
        }
        out
    }

    fn small_config() -> FilterConfig {
        FilterConfig {
            downsample_factor: 1,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn test_invalid_ramp_is_rejected() {
        let config = FilterConfig {
            mute_start_ratio: 1.5,
            mute_full_ratio: 1.2,
            ..FilterConfig::default()
        };
        assert!(CrosstalkFilter::new(ChannelSet::new(), &config).is_err());
    }

    #[test]
    fn test_inverted_shift_range_is_clamped() {
        let filter = CrosstalkFilter::with_sample_range(
            ChannelSet::new(),
            &small_config(),
            16,
            40,
            30,
        )
        .unwrap();
        assert_eq!(filter.max_shift, 41);
    }

    #[test]
    fn test_physical_construction_derives_shift_range() {
        let set = ChannelSet::from_channels(vec![Channel::zeros(44100, 44100)]);
        let filter = CrosstalkFilter::new(set, &FilterConfig::default()).unwrap();
        // 0.5m / 343.2 m/s at 14700 Hz analysis rate is about 21 samples,
        // 3.0m about 128 samples.
        assert_eq!(filter.min_shift, 21);
        assert_eq!(filter.max_shift, 128);
        // 0.66s at 14700 Hz.
        assert_eq!(filter.work_window, 9702);
    }

    #[test]
    fn test_discovers_known_delay() {
        let rate = 8000;
        let len = 8000;
        let mut a = vec![0.0f32; len];
        let burst = noise(4000, 10000.0, 0x1234_5678);
        a[800..4800].copy_from_slice(&burst);
        let b = delayed_copy(&a, 50, 0.3);

        let set = ChannelSet::from_channels(vec![
            Channel::from_vec(rate, a),
            Channel::from_vec(rate, b),
        ]);
        let mut filter =
            CrosstalkFilter::with_sample_range(set, &small_config(), 800, 10, 100).unwrap();
        filter.analyze().unwrap();

        // Channel 0's signal appears in channel 1 delayed by 50 samples.
        assert_eq!(filter.best_shift(1, 0), Some(50));
    }

    #[test]
    fn test_ratio_strategy_mutes_delayed_copy() {
        let rate = 1000;
        let a = noise(1000, 1000.0, 0xdead_beef);
        let b = delayed_copy(&a, 5, 0.5);
        let set = ChannelSet::from_channels(vec![
            Channel::from_vec(rate, a.clone()),
            Channel::from_vec(rate, b.clone()),
        ]);

        let config = FilterConfig {
            strategy: AnalysisStrategy::Ratio,
            ..small_config()
        };
        let mut filter = CrosstalkFilter::with_sample_range(set, &config, 50, 1, 10).unwrap();
        filter.analyze().unwrap();

        // The gain is the minimum over all shifts. For the copy channel a
        // misaligned shift leaves most of its (scaled) energy unexplained,
        // pushing the ratio past the full-mute threshold; the louder source
        // never crosses the ramp at any shift.
        for j in 100..900 {
            assert!(
                filter.mute_factors()[0].at(j) > 0.99,
                "unexpected mute of the source at {j}: {}",
                filter.mute_factors()[0].at(j)
            );
            assert!(
                filter.mute_factors()[1].at(j) < 0.01,
                "copy not muted at {j}: {}",
                filter.mute_factors()[1].at(j)
            );
        }

        // Ratio factors are applied as gains directly, without the relative
        // rescale the correlation analysis needs.
        let out = filter.mute().unwrap();
        for i in 100..900 {
            assert!((out[0].at(i) - a[i as usize]).abs() < 1e-3);
            assert_eq!(out[1].at(i), 0.0);
        }
    }

    #[test]
    fn test_non_finite_mute_factor_is_fatal() {
        let set = ChannelSet::from_channels(vec![
            Channel::from_vec(1000, vec![1.0; 100]),
            Channel::from_vec(1000, vec![1.0; 100]),
        ]);
        let mut filter =
            CrosstalkFilter::with_sample_range(set, &small_config(), 10, 1, 5).unwrap();
        filter.mute_factors_mut()[1].set(7, f32::NAN);

        let err = filter.mute().unwrap_err();
        assert_eq!(
            err,
            MasterError::NonFinite {
                channel: 1,
                sample: 7
            }
        );
    }

    #[test]
    fn test_empty_set_muting_is_a_no_op() {
        let filter = CrosstalkFilter::new(ChannelSet::new(), &FilterConfig::default()).unwrap();
        assert!(filter.mute().unwrap().is_empty());
    }
}
