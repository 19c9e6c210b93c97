//! End-to-end scenarios across the mastering stages.

use podmaster::{
    AnalysisStrategy, Channel, ChannelSet, CrosstalkFilter, FilterConfig, GateConfig,
    LevelerConfig, SkipConfig,
};

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

fn rms(samples: &[f32], range: std::ops::Range<usize>) -> f64 {
    let slice = &samples[range];
    (slice.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>() / slice.len() as f64).sqrt()
}

fn sample_range_config() -> FilterConfig {
    FilterConfig {
        downsample_factor: 1,
        strategy: AnalysisStrategy::Correlation,
        ..FilterConfig::default()
    }
}

/// Two one-second 44.1 kHz channels: A carries a 1 kHz tone at amplitude
/// 10000, B the same tone 50 samples later at amplitude 3000. The filter
/// must report the acoustic delay and treat B, not A, as the crosstalk
/// side of the pair.
#[test]
fn test_sine_pair_alignment_matches_acoustic_delay() {
    let rate = 44100u32;
    let n = 44100usize;
    let omega = 2.0 * std::f64::consts::PI * 1000.0 / 44100.0;
    let a: Vec<f32> = (0..n)
        .map(|t| (10000.0 * (omega * t as f64).sin()) as f32)
        .collect();
    let mut b = vec![0.0f32; n];
    for t in 50..n {
        b[t] = (3000.0 * (omega * (t - 50) as f64).sin()) as f32;
    }

    let set = ChannelSet::from_channels(vec![
        Channel::from_vec(rate, a.clone()),
        Channel::from_vec(rate, b.clone()),
    ]);
    let mut filter =
        CrosstalkFilter::with_sample_range(set, &sample_range_config(), 4410, 10, 100).unwrap();
    filter.analyze().unwrap();

    assert_eq!(filter.best_shift(1, 0), Some(50));
    // The quieter delayed copy is fully explained by the louder original,
    // while the original only accumulates the penalty for the crosstalk it
    // causes on B.
    let factors = filter.mute_factors();
    assert!(factors[1].at(22050) > factors[0].at(22050));

    let out = filter.mute().unwrap();
    let interior = 8820..35280;
    let a_ratio = rms(out[0].as_slice(), interior.clone()) / rms(&a, interior.clone());
    let b_ratio = rms(out[1].as_slice(), interior.clone()) / rms(&b, interior);
    assert!(a_ratio > 0.995, "A was altered: ratio {a_ratio}");
    assert!(b_ratio < 0.05, "B was not muted: ratio {b_ratio}");
}

/// A noise burst on A, re-recorded 50 samples later at a third of the
/// level on B, plus a region where B carries independent sound. The
/// crosstalk passage on B must collapse toward zero while both A and B's
/// own material survive.
#[test]
fn test_delayed_noise_burst_is_suppressed() {
    let rate = 44100u32;
    let n = 44100usize;

    let mut a = vec![0.0f32; n];
    a[4410..26460].copy_from_slice(&noise(26460 - 4410, 10000.0, 0x5eed_cafe)[..]);
    let mut b = vec![0.0f32; n];
    for t in 50..n {
        b[t] = 0.3 * a[t - 50];
    }
    let own = noise(39690 - 30870, 3000.0, 0x0dd_ba11);
    b[30870..39690].copy_from_slice(&own[..]);

    let set = ChannelSet::from_channels(vec![
        Channel::from_vec(rate, a.clone()),
        Channel::from_vec(rate, b.clone()),
    ]);
    let mut filter =
        CrosstalkFilter::with_sample_range(set, &sample_range_config(), 4410, 10, 100).unwrap();
    filter.analyze().unwrap();

    assert_eq!(filter.best_shift(1, 0), Some(50));
    // B's mute value during the crosstalk passage dwarfs the one during
    // its own material.
    let factors = filter.mute_factors();
    assert!(factors[1].at(15435) > factors[1].at(35280) + 0.2);

    let out = filter.mute().unwrap();
    let burst = 11025..22050;
    let own_region = 33075..37485;
    let a_ratio = rms(out[0].as_slice(), burst.clone()) / rms(&a, burst.clone());
    let b_burst = rms(out[1].as_slice(), burst.clone()) / rms(&b, burst);
    let b_own = rms(out[1].as_slice(), own_region.clone()) / rms(&b, own_region);
    assert!(a_ratio > 0.98, "A was altered: ratio {a_ratio}");
    assert!(b_burst < 0.05, "crosstalk survived on B: ratio {b_burst}");
    assert!(b_own > 0.99, "B's own material was damaged: ratio {b_own}");
}

/// Gate, leveler and silence compression chained the way the orchestrator
/// runs them: the shared pause shrinks, everything stays finite, and the
/// channels keep a common length.
#[test]
fn test_gate_level_skip_chain() {
    let rate = 44100u32;
    let n = 2 * 44100usize;
    let burst = 22050usize;

    let mut samples0 = vec![0.0f32; n];
    samples0[..burst].copy_from_slice(&noise(burst, 8000.0, 1)[..]);
    samples0[n - burst..].copy_from_slice(&noise(burst, 8000.0, 2)[..]);
    let mut samples1 = vec![0.0f32; n];
    samples1[..burst].copy_from_slice(&noise(burst, 6000.0, 3)[..]);
    samples1[n - burst..].copy_from_slice(&noise(burst, 6000.0, 4)[..]);

    let set = ChannelSet::from_channels(vec![
        Channel::from_vec(rate, samples0),
        Channel::from_vec(rate, samples1),
    ]);

    // The gate's activity window must fit the two-second fixture; at the
    // default 1 s the opening burst falls inside the analysis warm-up and
    // would be gated away entirely.
    let gate_config = GateConfig {
        window_sec: 0.25,
        ..GateConfig::default()
    };
    let set = podmaster::gate(set, &gate_config).unwrap();
    let set = podmaster::level(set, &LevelerConfig::default()).unwrap();
    let (set, skipped) = podmaster::silence(set, &SkipConfig::default()).unwrap();

    // 1 s of shared silence shrinks by (0.5 + 1)^0.75 - 1 seconds.
    assert!((0.3..0.4).contains(&skipped), "skipped {skipped}");
    assert_eq!(set[0].len(), set[1].len());
    assert!(set[0].len() < n);
    for c in set.iter() {
        assert!(c.as_slice().iter().all(|x| x.is_finite()));
    }
}
