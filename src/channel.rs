//! Core channel representation and channel-set helpers.
//!
//! A [`Channel`] is a fixed-length buffer of `f32` samples tagged with a
//! sample rate; a [`ChannelSet`] is an ordered collection of channels where
//! the index identifies the physical microphone or track. All analysis
//! stages in this crate read and write audio exclusively through these two
//! types.
//!
//! # Indexing contract
//!
//! Sample access is bounds-checked with a deliberate safety valve: reads
//! outside `[0, len)` yield `0.0` and writes outside that range are silently
//! dropped. The sliding-window recurrences in the analysis stages rely on
//! this to treat the signal as zero-padded in both directions, so access
//! takes *signed* indices throughout.
//!
//! # Numeric contract
//!
//! All "mean" norms divide by a count floored at a tiny positive epsilon, so
//! the norm of an empty or all-silent buffer is exactly `0.0` rather than
//! NaN.

use ndarray::Array1;

/// Conventional full-scale amplitude of loader-supplied samples.
pub const FULL_SCALE: f32 = 32767.0;

/// Amplitude ceiling used by gain clamps to keep headroom below full scale.
pub const CLAMP_CEILING: f32 = 32000.0;

/// Divisor floor used by the mean norms to avoid 0/0.
pub const NORM_EPSILON: f64 = 1e-99;

/// A single audio channel: a sample buffer plus its sample rate in Hz.
///
/// Length and rate are fixed after construction; [`Channel::resized`] and
/// [`Channel::resampled`] produce new values instead of mutating in place.
/// Only sample content is mutable, through [`Channel::set`] and
/// [`Channel::scale`].
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    rate: u32,
    data: Array1<f32>,
}

impl Channel {
    /// Creates an empty channel with the given sample rate.
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            data: Array1::zeros(0),
        }
    }

    /// Creates an all-zero channel of `len` samples.
    pub fn zeros(rate: u32, len: usize) -> Self {
        Self {
            rate,
            data: Array1::zeros(len),
        }
    }

    /// Creates a channel from loader-supplied samples.
    pub fn from_vec(rate: u32, samples: Vec<f32>) -> Self {
        Self {
            rate,
            data: Array1::from_vec(samples),
        }
    }

    /// Number of samples in the channel.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the channel holds no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample rate in Hz.
    pub const fn sample_rate(&self) -> u32 {
        self.rate
    }

    /// Duration of the channel in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.rate == 0 {
            return 0.0;
        }
        self.data.len() as f64 / self.rate as f64
    }

    /// Bounds-checked sample read; out-of-range indices read as `0.0`.
    pub fn at(&self, index: isize) -> f32 {
        if index < 0 || index as usize >= self.data.len() {
            return 0.0;
        }
        self.data[index as usize]
    }

    /// Bounds-checked sample write; out-of-range writes are dropped.
    pub fn set(&mut self, index: isize, value: f32) {
        if index >= 0 && (index as usize) < self.data.len() {
            self.data[index as usize] = value;
        }
    }

    /// Multiplies the sample at `index` by `factor`, if it is in range.
    pub fn scale(&mut self, index: isize, factor: f32) {
        if index >= 0 && (index as usize) < self.data.len() {
            self.data[index as usize] *= factor;
        }
    }

    /// Raw sample view for the external loader/saver.
    pub fn as_slice(&self) -> &[f32] {
        self.data.as_slice().unwrap_or(&[])
    }

    /// Per-sample L2 norm: `sqrt(mean(x^2))` over the whole buffer.
    pub fn l2_norm(&self) -> f64 {
        let sum = self.data.fold(0.0f64, |acc, &x| acc + f64::from(x) * f64::from(x));
        (sum / (self.data.len() as f64).max(NORM_EPSILON)).sqrt()
    }

    /// L2 norm restricted to samples whose square exceeds `limit^2`.
    ///
    /// Models the loudness of the *active* passages of the channel when
    /// `limit` is the overall L2 norm.
    pub fn l2_norm_above(&self, limit: f32) -> f64 {
        let limit = f64::from(limit) * f64::from(limit);
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for &x in &self.data {
            let v = f64::from(x) * f64::from(x);
            if v > limit {
                sum += v;
                count += 1;
            }
        }
        (sum / (count as f64).max(NORM_EPSILON)).sqrt()
    }

    /// L2 norm restricted to samples whose square stays below `limit^2`.
    ///
    /// Models the loudness of the *silent* passages; the crosstalk stages
    /// use this as a per-channel silence floor.
    pub fn l2_norm_below(&self, limit: f32) -> f64 {
        let limit = f64::from(limit) * f64::from(limit);
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for &x in &self.data {
            let v = f64::from(x) * f64::from(x);
            if v < limit {
                sum += v;
                count += 1;
            }
        }
        (sum / (count as f64).max(NORM_EPSILON)).sqrt()
    }

    /// Peak absolute amplitude (L-infinity norm).
    pub fn peak(&self) -> f32 {
        self.data.fold(0.0f32, |max, &x| max.max(x.abs()))
    }

    /// Block-average downsampling by `factor`; a factor of zero yields a copy.
    pub fn downsample(&self, factor: usize) -> Self {
        if factor == 0 {
            return self.clone();
        }
        let new_len = self.data.len() / factor;
        let mut target = Array1::zeros(new_len);
        let mut i = 0usize;
        for j in 0..new_len {
            let mut acc = 0.0f32;
            for _ in 0..factor {
                if i < self.data.len() {
                    acc += self.data[i];
                    i += 1;
                }
            }
            target[j] = acc / factor as f32;
        }
        Self {
            rate: self.rate / factor as u32,
            data: target,
        }
    }

    /// Block-RMS ("energy") downsampling by `factor`.
    ///
    /// Preserves the energy of each block rather than its mean, which keeps
    /// oscillating signals visible at the reduced rate.
    pub fn downsample_energy(&self, factor: usize) -> Self {
        if factor == 0 {
            return self.clone();
        }
        let new_len = self.data.len() / factor;
        let mut target = Array1::zeros(new_len);
        let mut i = 0usize;
        for j in 0..new_len {
            let mut acc = 0.0f32;
            for _ in 0..factor {
                if i < self.data.len() {
                    acc += self.data[i] * self.data[i];
                    i += 1;
                }
            }
            target[j] = (acc / factor as f32).sqrt();
        }
        Self {
            rate: self.rate / factor as u32,
            data: target,
        }
    }

    /// Returns a copy resized to `len` samples, zero-padded or truncated.
    pub fn resized(&self, len: usize) -> Self {
        let mut target = Array1::zeros(len);
        let copy = len.min(self.data.len());
        for i in 0..copy {
            target[i] = self.data[i];
        }
        Self {
            rate: self.rate,
            data: target,
        }
    }

    /// Returns a copy resampled to `new_rate` by nearest-neighbor lookup.
    pub fn resampled(&self, new_rate: u32) -> Self {
        if self.rate == 0 {
            return self.clone();
        }
        let old_len = self.data.len();
        let new_len = (old_len as u64 * u64::from(new_rate) / u64::from(self.rate)) as usize;
        tracing::debug!(
            old_rate = self.rate,
            new_rate,
            old_len,
            new_len,
            "nearest-neighbor resample"
        );
        let mut target = Array1::zeros(new_len);
        for i in 0..new_len {
            let j = (i as u64 * old_len as u64) / new_len as u64;
            target[i] = self.data[j as usize];
        }
        Self {
            rate: new_rate,
            data: target,
        }
    }
}

/// An ordered, index-significant collection of channels.
///
/// No invariant forces uniform sample rate or length across members;
/// stages that require uniformity call [`ChannelSet::unify`] first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSet {
    channels: Vec<Channel>,
}

impl ChannelSet {
    /// Creates an empty channel set.
    pub const fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Wraps loader-supplied channels.
    pub fn from_channels(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` if the set holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Appends a channel to the set.
    pub fn push(&mut self, channel: Channel) {
        self.channels.push(channel);
    }

    /// Immutable channel iterator.
    pub fn iter(&self) -> std::slice::Iter<'_, Channel> {
        self.channels.iter()
    }

    /// Mutable view of the channels for pairwise processing.
    pub fn as_mut_slice(&mut self) -> &mut [Channel] {
        self.channels.as_mut_slice()
    }

    /// Mutable iterator over the channels.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Channel> {
        self.channels.iter_mut()
    }

    /// Hands the channels to the external saver/encoder.
    pub fn into_vec(self) -> Vec<Channel> {
        self.channels
    }

    /// Maximum sample rate across members, 0 for an empty set.
    pub fn max_sample_rate(&self) -> u32 {
        self.channels.iter().map(Channel::sample_rate).max().unwrap_or(0)
    }

    /// Maximum length across members, 0 for an empty set.
    pub fn max_len(&self) -> usize {
        self.channels.iter().map(Channel::len).max().unwrap_or(0)
    }

    /// Resamples every member up to the maximum observed rate.
    ///
    /// Idempotent; returns the unified rate.
    pub fn unify_rate(&mut self) -> u32 {
        let rate = self.max_sample_rate();
        for channel in &mut self.channels {
            if channel.sample_rate() < rate {
                *channel = channel.resampled(rate);
            }
        }
        rate
    }

    /// Zero-pads every member to the maximum observed length.
    ///
    /// Idempotent; returns the unified length.
    pub fn unify_len(&mut self) -> usize {
        let len = self.max_len();
        for channel in &mut self.channels {
            if channel.len() < len {
                *channel = channel.resized(len);
            }
        }
        len
    }

    /// Unifies sample rate, then length, across all members.
    ///
    /// Rate comes first so the zero-padding works on the final lengths;
    /// a second call leaves the set unchanged.
    pub fn unify(&mut self) {
        self.unify_rate();
        self.unify_len();
    }
}

impl std::ops::Index<usize> for ChannelSet {
    type Output = Channel;

    fn index(&self, index: usize) -> &Channel {
        &self.channels[index]
    }
}

impl std::ops::IndexMut<usize> for ChannelSet {
    fn index_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.channels[index]
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        Self {
            channels: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ChannelSet {
    type Item = &'a Channel;
    type IntoIter = std::slice::Iter<'a, Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.iter()
    }
}

impl IntoIterator for ChannelSet {
    type Item = Channel;
    type IntoIter = std::vec::IntoIter<Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx_eq::assert_approx_eq;

    #[test]
    fn test_out_of_range_reads_as_zero() {
        let c = Channel::from_vec(44100, vec![1.0, 2.0, 3.0]);
        assert_eq!(c.at(-1), 0.0);
        assert_eq!(c.at(3), 0.0);
        assert_eq!(c.at(1), 2.0);
    }

    #[test]
    fn test_out_of_range_writes_are_dropped() {
        let mut c = Channel::from_vec(44100, vec![1.0, 2.0, 3.0]);
        c.set(-1, 9.0);
        c.set(3, 9.0);
        c.set(usize::MAX as isize, 9.0);
        assert_eq!(c.len(), 3);
        assert_eq!(c.as_slice(), &[1.0, 2.0, 3.0]);
        c.set(0, 9.0);
        assert_eq!(c.at(0), 9.0);
    }

    #[test]
    fn test_l2_norm_of_empty_and_silent_buffers() {
        assert_eq!(Channel::new(44100).l2_norm(), 0.0);
        assert_eq!(Channel::zeros(44100, 128).l2_norm(), 0.0);
        assert_eq!(Channel::zeros(44100, 128).l2_norm_above(0.5), 0.0);
    }

    #[test]
    fn test_l2_norm_values() {
        let c = Channel::from_vec(44100, vec![1.0, -1.0, 1.0, -1.0]);
        assert_approx_eq!(c.l2_norm(), 1.0, 1e-9);

        let c = Channel::from_vec(44100, vec![3.0, 0.0, 0.0, 0.0]);
        assert_approx_eq!(c.l2_norm(), 1.5, 1e-9);
        // Restricted norms split the buffer at the overall norm.
        assert_approx_eq!(c.l2_norm_above(1.5), 3.0, 1e-9);
        assert_approx_eq!(c.l2_norm_below(1.5), 0.0, 1e-9);
    }

    #[test]
    fn test_peak() {
        let c = Channel::from_vec(44100, vec![1.0, -5.0, 3.0]);
        assert_eq!(c.peak(), 5.0);
        assert_eq!(Channel::new(44100).peak(), 0.0);
    }

    #[test]
    fn test_downsample_block_average() {
        let c = Channel::from_vec(1000, vec![1.0, 3.0, 5.0, 7.0, 9.0]);
        let d = c.downsample(2);
        assert_eq!(d.sample_rate(), 500);
        assert_eq!(d.as_slice(), &[2.0, 6.0]);
    }

    #[test]
    fn test_downsample_energy_block_rms() {
        let c = Channel::from_vec(1000, vec![3.0, -4.0, 0.0, 0.0]);
        let d = c.downsample_energy(2);
        assert_eq!(d.len(), 2);
        assert_approx_eq!(f64::from(d.at(0)), (12.5f64).sqrt(), 1e-6);
        assert_eq!(d.at(1), 0.0);
    }

    #[test]
    fn test_downsample_factor_zero_is_identity() {
        let c = Channel::from_vec(1000, vec![1.0, 2.0]);
        assert_eq!(c.downsample(0), c);
        assert_eq!(c.downsample_energy(0), c);
    }

    #[test]
    fn test_resized_pads_and_truncates() {
        let c = Channel::from_vec(1000, vec![1.0, 2.0]);
        assert_eq!(c.resized(4).as_slice(), &[1.0, 2.0, 0.0, 0.0]);
        assert_eq!(c.resized(1).as_slice(), &[1.0]);
        // The source keeps its length.
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_resampled_nearest_neighbor() {
        let c = Channel::from_vec(2, vec![1.0, 2.0]);
        let r = c.resampled(4);
        assert_eq!(r.sample_rate(), 4);
        assert_eq!(r.as_slice(), &[1.0, 1.0, 2.0, 2.0]);
        // Resampling to the same rate is an identity copy.
        assert_eq!(c.resampled(2).as_slice(), c.as_slice());
    }

    #[test]
    fn test_unify_makes_members_uniform_and_is_idempotent() {
        let mut set = ChannelSet::from_channels(vec![
            Channel::from_vec(100, vec![1.0; 100]),
            Channel::from_vec(200, vec![2.0; 150]),
        ]);
        set.unify();
        assert_eq!(set[0].sample_rate(), 200);
        assert_eq!(set[1].sample_rate(), 200);
        assert_eq!(set[0].len(), set[1].len());

        let once = set.clone();
        set.unify();
        assert_eq!(set, once);
    }

    #[test]
    fn test_unify_on_empty_set() {
        let mut set = ChannelSet::new();
        set.unify();
        assert!(set.is_empty());
        assert_eq!(set.max_sample_rate(), 0);
        assert_eq!(set.max_len(), 0);
    }
}
