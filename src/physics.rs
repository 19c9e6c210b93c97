//! Conversion of physical quantities.
//!
//! The crosstalk filter expresses its time-shift search range as assumed
//! microphone distances; these helpers convert between meters and sound
//! travel time.

/// Speed of sound in air at room temperature, in m/s.
pub const SPEED_OF_SOUND: f64 = 343.2;

/// Converts a microphone distance in meters to sound travel time in seconds.
pub const fn meter_to_sec(meters: f64) -> f64 {
    meters / SPEED_OF_SOUND
}

/// Converts sound travel time in seconds to the corresponding distance in meters.
pub const fn sec_to_meter(seconds: f64) -> f64 {
    seconds * SPEED_OF_SOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx_eq::assert_approx_eq;

    #[test]
    fn test_meter_sec_roundtrip() {
        assert_approx_eq!(sec_to_meter(meter_to_sec(3.0)), 3.0, 1e-12);
        // One meter is roughly 2.9ms of sound travel.
        assert_approx_eq!(meter_to_sec(1.0), 1.0 / 343.2, 1e-12);
    }
}
