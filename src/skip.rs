//! Time compression of silence and signal runs.
//!
//! [`silence`] shortens pauses longer than a threshold without disturbing
//! natural speech cadence, splicing the remaining audio over the gap with a
//! linear cross-fade. [`noise`] is its dual: it deletes *signal* regions and
//! keeps the pauses, which isolates the background noise of a recording for
//! inspection. [`trim`] removes leading and trailing silence outright.
//!
//! All three work on the summed absolute-value envelope across the whole
//! channel set, so a pause only counts as silence when every speaker is
//! quiet at once.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelSet};
use crate::error::{MasterError, MasterResult};

/// Configuration for [`silence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipConfig {
    /// Silence threshold as a fraction of the envelope peak.
    pub level: f32,
    /// Minimum pause length in seconds that is left untouched.
    pub min_sec: f64,
    /// Minimum cross-fade length in seconds.
    pub min_transition_sec: f64,
    /// Exponent in `(run + 1)^order - 1` controlling how aggressively long
    /// pauses shrink; must be in `(0, 1]`.
    pub reduction_order: f64,
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self {
            level: 0.01,
            min_sec: 0.5,
            min_transition_sec: 0.05,
            reduction_order: 0.75,
        }
    }
}

impl SkipConfig {
    /// Checks that thresholds and window lengths are usable.
    pub fn validate(&self) -> MasterResult<()> {
        if self.level <= 0.0 {
            return Err(MasterError::InvalidParameter(
                "skip level must be positive".into(),
            ));
        }
        if self.min_sec <= 0.0 || self.min_transition_sec < 0.0 {
            return Err(MasterError::InvalidParameter(
                "skip run and transition lengths must be positive".into(),
            ));
        }
        if self.reduction_order <= 0.0 {
            return Err(MasterError::InvalidParameter(
                "skip reduction order must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for [`noise`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Signal threshold as a fraction of the envelope peak.
    pub level: f32,
    /// Minimum pause length in seconds that separates signal regions.
    pub min_sec: f64,
    /// Cross-fade length in seconds, clamped to half the minimum pause.
    pub transition_sec: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            level: 0.01,
            min_sec: 0.1,
            transition_sec: 0.05,
        }
    }
}

impl NoiseConfig {
    /// Checks that thresholds and window lengths are usable.
    pub fn validate(&self) -> MasterResult<()> {
        if self.level <= 0.0 {
            return Err(MasterError::InvalidParameter(
                "noise level must be positive".into(),
            ));
        }
        if self.min_sec <= 0.0 || self.transition_sec < 0.0 {
            return Err(MasterError::InvalidParameter(
                "noise run and transition lengths must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Mean absolute sample value across all channels at `index`.
fn envelope(channels: &ChannelSet, index: isize) -> f32 {
    let mut sum = 0.0f32;
    for c in channels.iter() {
        sum += c.at(index).abs();
    }
    sum / channels.len() as f32
}

/// Absolute silence threshold: `level` times the envelope peak.
fn envelope_threshold(channels: &ChannelSet, len: usize, level: f32) -> f32 {
    let mut max = 0.0f32;
    for i in 0..len {
        let e = envelope(channels, i as isize);
        if e > max {
            max = e;
        }
    }
    level * max
}

/// Shortens silence runs longer than `min_sec + min_transition_sec` to
/// `(run + 1)^order - 1` seconds and splices the remaining audio over the
/// gap. Returns the compressed set and the number of seconds removed.
pub fn silence(mut channels: ChannelSet, config: &SkipConfig) -> MasterResult<(ChannelSet, f64)> {
    config.validate()?;
    if channels.is_empty() {
        return Ok((channels, 0.0));
    }
    let mut order = config.reduction_order;
    if order > 1.0 {
        warn!(order, "clamping reduction order to 1");
        order = 1.0;
    }

    let samplerate = channels.unify_rate();
    let len = channels.unify_len();
    if samplerate == 0 || len == 0 {
        return Ok((channels, 0.0));
    }
    let rate = f64::from(samplerate);

    let mincount = (config.min_sec * rate) as usize;
    let mintransition = (config.min_transition_sec * rate) as usize;
    let threshold = envelope_threshold(&channels, len, config.level);
    debug!(threshold, mincount, mintransition, "silence scan");

    let mut skip = 0usize;
    let mut i = 0usize;
    while i + skip < len {
        // length of the below-threshold run starting at the current read
        // position; reads past the end count as silence
        let mut d = 0usize;
        while envelope(&channels, (i + d + skip) as isize) < threshold && i + d + skip < len {
            d += 1;
        }

        if d > mincount + mintransition {
            // pauses at the very start of the recording shrink by their
            // full length, later ones keep min_sec of breathing room
            let delta = if i as f64 / rate > 0.1 {
                (d - mincount) as f64 / rate
            } else {
                d as f64 / rate
            };
            let reduced = ((delta + 1.0).powf(order) - 1.0).min(delta);
            debug!(
                at_sec = i as f64 / rate,
                run_sec = d as f64 / rate,
                cut_sec = reduced,
                "compressing silence"
            );

            let cut = (reduced * rate) as usize;
            let nskip = skip + cut;
            let transition = d - cut;
            let padding = (d - cut - transition) / 2;

            for _ in 0..padding {
                for c in channels.iter_mut() {
                    let v = c.at((i + skip) as isize);
                    c.set(i as isize, v);
                }
                i += 1;
            }
            for j in 0..transition {
                let fade = j as f32 / transition as f32;
                for c in channels.iter_mut() {
                    let v = c.at((i + skip) as isize) * (1.0 - fade)
                        + c.at((i + nskip) as isize) * fade;
                    c.set(i as isize, v);
                }
                i += 1;
            }
            for _ in 0..padding {
                for c in channels.iter_mut() {
                    let v = c.at((i + nskip) as isize);
                    c.set(i as isize, v);
                }
                i += 1;
            }
            skip = nskip;
        } else {
            // short run: copy through at the current offset
            for _ in 0..=d {
                for c in channels.iter_mut() {
                    let v = c.at((i + skip) as isize);
                    c.set(i as isize, v);
                }
                i += 1;
            }
        }
    }

    for c in channels.iter_mut() {
        *c = c.resized(len - skip);
    }
    let skipped = skip as f64 / rate;
    info!(
        before_sec = len as f64 / rate,
        skipped_sec = skipped,
        "silence compression done"
    );
    Ok((channels, skipped))
}

/// Deletes signal regions and keeps the pauses between them, cross-fading
/// at the cuts. Signal regions separated by pauses shorter than `min_sec`
/// are merged and removed together. Returns the remaining noise floor and
/// the number of seconds removed.
pub fn noise(mut channels: ChannelSet, config: &NoiseConfig) -> MasterResult<(ChannelSet, f64)> {
    config.validate()?;
    if channels.is_empty() {
        return Ok((channels, 0.0));
    }

    let samplerate = channels.unify_rate();
    let len = channels.unify_len();
    if samplerate == 0 || len == 0 {
        return Ok((channels, 0.0));
    }
    let rate = f64::from(samplerate);

    let minsec = (config.min_sec * rate) as usize;
    let transition = ((config.transition_sec.min(config.min_sec / 2.0)) * rate) as usize;
    let threshold = envelope_threshold(&channels, len, config.level);
    debug!(threshold, minsec, transition, "noise scan");

    let mut skip = 0usize;
    let mut i = 0usize;
    while i < len {
        // dual scan: the end of the current signal region (d) and the end
        // of the pause after it (s); repeats until the pause is long
        // enough to count as a real break
        let mut d: isize = -1;
        let mut s: isize;
        loop {
            loop {
                d += 1;
                let e = envelope(&channels, i as isize + d + skip as isize);
                if !(e > threshold && (d + (i + skip) as isize) < len as isize) {
                    break;
                }
            }
            s = d;
            loop {
                s += 1;
                let e = envelope(&channels, i as isize + s + skip as isize);
                if !(e <= threshold && (s + (i + skip) as isize) < len as isize) {
                    break;
                }
            }
            if !(s - d < minsec as isize && (s + (i + skip) as isize) < len as isize) {
                break;
            }
        }
        debug!(
            at_sec = i as f64 / rate,
            signal_until_sec = (i as isize + d) as f64 / rate,
            pause_until_sec = (i as isize + s) as f64 / rate,
            "noise scan step"
        );

        if s - d >= minsec as isize {
            skip += d as usize;
            let mut lastend = i + s as usize;

            if i > transition {
                for j in 0..transition {
                    let fade = j as f64 / transition as f64;
                    for c in channels.iter_mut() {
                        let idx = (i - transition + j) as isize;
                        let v = f64::from(c.at(idx)) * (1.0 - fade)
                            + f64::from(c.at((i + skip + j) as isize)) * fade;
                        c.set(idx, v as f32);
                    }
                }
            }
            skip += transition;
            lastend -= transition;

            while i < lastend - d as usize {
                for c in channels.iter_mut() {
                    let v = c.at((i + skip) as isize);
                    c.set(i as isize, v);
                }
                i += 1;
            }
            debug!(skip_sec = skip as f64 / rate, at_sec = i as f64 / rate, "cut signal");
        } else {
            // trailing signal reaches the end of the recording
            skip += s as usize;
            break;
        }
    }

    for c in channels.iter_mut() {
        *c = c.resized(len - skip);
    }
    let skipped = skip as f64 / rate;
    info!(
        before_sec = len as f64 / rate,
        skipped_sec = skipped,
        "noise isolation done"
    );
    Ok((channels, skipped))
}

/// Removes leading and trailing samples whose envelope stays at or below
/// `level` times the envelope peak. Returns the trimmed set and the
/// seconds removed at the front and at the back.
pub fn trim(mut channels: ChannelSet, level: f32) -> MasterResult<(ChannelSet, f64, f64)> {
    if level <= 0.0 {
        return Err(MasterError::InvalidParameter(
            "trim level must be positive".into(),
        ));
    }
    if channels.is_empty() {
        return Ok((channels, 0.0, 0.0));
    }

    let samplerate = channels.unify_rate();
    let len = channels.unify_len();
    if samplerate == 0 || len == 0 {
        return Ok((channels, 0.0, 0.0));
    }
    let rate = f64::from(samplerate);
    let threshold = envelope_threshold(&channels, len, level);

    let mut start = 0usize;
    while start < len && envelope(&channels, start as isize) <= threshold {
        start += 1;
    }
    if start == len {
        for c in channels.iter_mut() {
            *c = c.resized(0);
        }
        info!(leading_sec = len as f64 / rate, "recording is entirely silent");
        return Ok((channels, len as f64 / rate, 0.0));
    }
    let mut end = len;
    while end > start && envelope(&channels, end as isize - 1) <= threshold {
        end -= 1;
    }

    for c in channels.iter_mut() {
        let samples: Vec<f32> = (start..end).map(|i| c.at(i as isize)).collect();
        *c = Channel::from_vec(c.sample_rate(), samples);
    }
    let leading = start as f64 / rate;
    let trailing = (len - end) as f64 / rate;
    info!(leading_sec = leading, trailing_sec = trailing, "trimmed silence");
    Ok((channels, leading, trailing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst_channel(rate: u32, len: usize, signal: std::ops::Range<usize>, amp: f32) -> Channel {
        let mut samples = vec![0.0f32; len];
        for v in &mut samples[signal] {
            *v = amp;
        }
        Channel::from_vec(rate, samples)
    }

    #[test]
    fn test_invalid_reduction_order_is_rejected() {
        let config = SkipConfig {
            reduction_order: 0.0,
            ..SkipConfig::default()
        };
        assert!(silence(ChannelSet::new(), &config).is_err());
    }

    #[test]
    fn test_empty_set_skips_nothing() {
        let (out, skipped) = silence(ChannelSet::new(), &SkipConfig::default()).unwrap();
        assert!(out.is_empty());
        assert_eq!(skipped, 0.0);
    }

    #[test]
    fn test_silence_run_is_compressed_by_reduction_order() {
        let rate = 8000;
        // 1 s speech, 2 s pause, 1 s speech
        let mut samples = vec![3000.0f32; 8000];
        samples.extend(std::iter::repeat_n(0.0f32, 16000));
        samples.extend(std::iter::repeat_n(3000.0f32, 8000));
        let set = ChannelSet::from_channels(vec![Channel::from_vec(rate, samples)]);

        let (out, skipped) = silence(set, &SkipConfig::default()).unwrap();

        // run of 2 s with min_sec 0.5 shrinks by (2 - 0.5 + 1)^0.75 - 1
        // seconds, 7905 samples at 8 kHz
        assert_eq!(out[0].len(), 32000 - 7905);
        assert!((skipped - 7905.0 / 8000.0).abs() < 1e-9);
        // the leading speech is bit-preserved
        assert_eq!(out[0].at(4000), 3000.0);
        // the trailing speech moved forward by the cut, past the cross-fade
        assert_eq!(out[0].at(20000), 3000.0);
    }

    #[test]
    fn test_silence_leaves_short_pauses_alone() {
        let rate = 8000;
        // 0.25 s pause, below min_sec + min_transition_sec
        let mut samples = vec![3000.0f32; 8000];
        samples.extend(std::iter::repeat_n(0.0f32, 2000));
        samples.extend(std::iter::repeat_n(3000.0f32, 8000));
        let set = ChannelSet::from_channels(vec![Channel::from_vec(rate, samples.clone())]);

        let (out, skipped) = silence(set, &SkipConfig::default()).unwrap();

        assert_eq!(skipped, 0.0);
        assert_eq!(out[0].as_slice(), samples.as_slice());
    }

    #[test]
    fn test_noise_removes_signal_and_keeps_the_floor() {
        let rate = 8000;
        let set = ChannelSet::from_channels(vec![burst_channel(rate, 16000, 8000..8800, 3000.0)]);

        let (out, skipped) = noise(set, &NoiseConfig::default()).unwrap();

        // the 0.1 s burst and its cross-fades are gone
        assert!(out[0].peak() < 30.0, "signal survived: {}", out[0].peak());
        assert!(skipped > 0.1);
        assert!((14300..=14500).contains(&out[0].len()), "len {}", out[0].len());
    }

    #[test]
    fn test_trim_drops_leading_and_trailing_silence() {
        let rate = 8000;
        let set = ChannelSet::from_channels(vec![burst_channel(rate, 8000, 1600..6400, 3000.0)]);

        let (out, leading, trailing) = trim(set, 0.01).unwrap();

        assert_eq!(out[0].len(), 4800);
        assert_eq!(out[0].at(0), 3000.0);
        assert_eq!(out[0].at(4799), 3000.0);
        assert!((leading - 0.2).abs() < 1e-9);
        assert!((trailing - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_trim_of_all_silence_empties_the_set() {
        let set = ChannelSet::from_channels(vec![Channel::zeros(8000, 8000)]);
        let (out, leading, trailing) = trim(set, 0.01).unwrap();
        assert!(out[0].is_empty());
        assert_eq!(leading, 1.0);
        assert_eq!(trailing, 0.0);
    }

    #[test]
    fn test_silence_unifies_mismatched_rates() {
        let set = ChannelSet::from_channels(vec![
            burst_channel(8000, 16000, 0..16000, 3000.0),
            burst_channel(4000, 8000, 0..8000, 3000.0),
        ]);
        let (out, skipped) = silence(set, &SkipConfig::default()).unwrap();
        assert_eq!(skipped, 0.0);
        assert_eq!(out[0].sample_rate(), 8000);
        assert_eq!(out[1].sample_rate(), 8000);
        assert_eq!(out[0].len(), out[1].len());
    }
}
