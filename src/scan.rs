//! Incremental sliding-window scanners.
//!
//! The analysis stages all rest on the same O(1)-amortized recurrence: as a
//! window slides one position, add the contribution entering the window and
//! subtract the one leaving it. Done inline these loops are bug-prone
//! (floating-point drift can push a sum of squares slightly negative), so
//! the recurrences live here as small stateful scanners with one explicit
//! invariant each: a windowed sum or energy is never negative.
//!
//! Accumulation is `f64` regardless of the `f32` sample storage, matching
//! the precision split of the rest of the crate.

/// Clamped running sum over a sliding window.
///
/// Invariant: `value() >= 0` after every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedSum {
    sum: f64,
}

impl WindowedSum {
    /// Creates an empty scanner.
    pub const fn new() -> Self {
        Self { sum: 0.0 }
    }

    /// Slides the window by one position and returns the clamped sum.
    pub fn advance(&mut self, incoming: f64, outgoing: f64) -> f64 {
        self.sum += incoming - outgoing;
        if self.sum < 0.0 {
            self.sum = 0.0;
        }
        self.sum
    }

    /// Current windowed sum.
    pub const fn value(&self) -> f64 {
        self.sum
    }
}

/// Clamped running sum of squares over a sliding window.
///
/// Invariant: `value() >= 0` after every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedEnergy {
    sum: f64,
}

impl WindowedEnergy {
    /// Creates an empty scanner.
    pub const fn new() -> Self {
        Self { sum: 0.0 }
    }

    /// Adds a sample's energy without retiring one (window warm-up).
    pub fn admit(&mut self, x: f64) {
        self.sum += x * x;
    }

    /// Slides the window by one sample and returns the clamped energy.
    pub fn advance(&mut self, incoming: f64, outgoing: f64) -> f64 {
        self.sum += incoming * incoming - outgoing * outgoing;
        if self.sum < 0.0 {
            self.sum = 0.0;
        }
        self.sum
    }

    /// Current windowed energy.
    pub const fn value(&self) -> f64 {
        self.sum
    }
}

/// Threshold-gated running energy: only samples flagged by the caller enter
/// the sum and the count.
///
/// Used to discriminate signal-dominated windows from windows whose average
/// is pulled down by interleaved silence. The floors (`count >= 1`,
/// `sum >= 0`) are applied persistently when the mean is read, mirroring
/// the recurrence this scanner isolates.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatedEnergy {
    sum: f64,
    count: i64,
}

impl GatedEnergy {
    /// Creates an empty scanner.
    pub const fn new() -> Self {
        Self { sum: 0.0, count: 0 }
    }

    /// Admits a sample if `include` is set.
    pub fn admit(&mut self, x: f64, include: bool) {
        if include {
            self.sum += x * x;
            self.count += 1;
        }
    }

    /// Retires a sample if `include` was set when it was admitted.
    pub fn retire(&mut self, x: f64, include: bool) {
        if include {
            self.sum -= x * x;
            self.count -= 1;
        }
    }

    /// Root of the floored mean energy of the gated window.
    pub fn rms(&mut self) -> f64 {
        if self.count < 1 {
            self.count = 1;
        }
        if self.sum < 0.0 {
            self.sum = 0.0;
        }
        (self.sum / self.count as f64).sqrt()
    }
}

/// One alignment lane of a sliding cross-correlation profile.
///
/// Tracks the windowed dot product between a channel and another channel
/// shifted by a fixed offset, together with the shifted channel's windowed
/// energy. The dot product may be negative; the energy is clamped
/// non-negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationLane {
    dot: f64,
    energy: f64,
}

impl CorrelationLane {
    /// Creates an empty lane.
    pub const fn new() -> Self {
        Self {
            dot: 0.0,
            energy: 0.0,
        }
    }

    /// Admits a sample pair without retiring one (window warm-up).
    pub fn admit(&mut self, own: f64, other: f64) {
        self.dot += own * other;
        self.energy += other * other;
    }

    /// Slides the window by one sample pair.
    pub fn advance(&mut self, own_in: f64, other_in: f64, own_out: f64, other_out: f64) {
        self.dot += own_in * other_in - own_out * other_out;
        self.energy += other_in * other_in - other_out * other_out;
        if self.energy < 0.0 {
            self.energy = 0.0;
        }
    }

    /// Current windowed dot product.
    pub const fn dot(&self) -> f64 {
        self.dot
    }

    /// Current windowed energy of the shifted channel.
    pub const fn energy(&self) -> f64 {
        self.energy
    }
}
