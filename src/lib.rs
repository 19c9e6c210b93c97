// Correctness and logic
#![warn(clippy::unit_cmp)]
#![warn(clippy::match_same_arms)]
// Performance-focused
#![warn(clippy::inefficient_to_string)]
#![warn(clippy::map_clone)]
#![warn(clippy::unnecessary_to_owned)]
#![warn(clippy::needless_collect)]
// Style and idiomatic Rust
#![warn(clippy::redundant_clone)]
#![warn(clippy::identity_op)]
#![warn(clippy::needless_return)]
#![warn(clippy::manual_map)]
#![warn(clippy::unwrap_used)]
// Maintainability
#![warn(clippy::missing_panics_doc)]
#![warn(missing_docs)]

//! # podmaster
//!
//! Adaptive analysis and suppression for multi-channel spoken-word
//! recordings. Each speaker is recorded on their own microphone, and every
//! microphone picks up every speaker; the stages here suppress that
//! crosstalk, level the loudness of active speech, and compress pauses,
//! leaving a set of clean channels ready for mixing and encoding.
//!
//! ## Stages
//!
//! - [`gate`](crate::gate()): windowed-energy crosstalk gate that ducks a
//!   channel whenever its recent energy looks like bleed rather than
//!   speech.
//! - [`CrosstalkFilter`]: cross-correlation analysis that discovers the
//!   acoustic delay between each microphone pair and mutes the passages a
//!   channel merely re-records from another speaker.
//! - [`level`] / [`level_stereo`]: selective loudness leveler with a
//!   tolerance-banded gain smoother.
//! - [`silence`] / [`noise`] / [`trim`]: time compression of pauses, or
//!   its dual, isolating the noise floor.
//!
//! Every stage consumes a [`ChannelSet`] and returns the processed set, so
//! a pipeline reads as a chain of `?`-propagated calls:
//!
//! ```no_run
//! use podmaster::{ChannelSet, FilterConfig, CrosstalkFilter, GateConfig,
//!                 LevelerConfig, SkipConfig, MasterResult};
//!
//! fn master(channels: ChannelSet) -> MasterResult<ChannelSet> {
//!     let mut filter = CrosstalkFilter::new(channels, &FilterConfig::default())?;
//!     filter.analyze()?;
//!     let channels = filter.mute()?;
//!     let channels = podmaster::gate(channels, &GateConfig::default())?;
//!     let channels = podmaster::level(channels, &LevelerConfig::default())?;
//!     let (channels, _skipped) = podmaster::silence(channels, &SkipConfig::default())?;
//!     Ok(channels)
//! }
//! ```
//!
//! Samples are `f32` at nominal full scale [`FULL_SCALE`]; all windowed
//! recurrences accumulate in `f64`.

pub mod channel;
pub mod error;
pub mod filter;
pub mod gate;
pub mod leveler;
pub mod physics;
pub mod scan;
pub mod skip;

pub use channel::{CLAMP_CEILING, Channel, ChannelSet, FULL_SCALE, NORM_EPSILON};
pub use error::{MasterError, MasterResult};
pub use filter::{AnalysisStrategy, CrosstalkFilter, FilterConfig};
pub use gate::{ACTIVITY_FLOOR, GateConfig, gate};
pub use leveler::{DEFAULT_TARGET_L2, LEVEL_TOLERANCE, LevelerConfig, level, level_stereo};
pub use physics::{SPEED_OF_SOUND, meter_to_sec, sec_to_meter};
pub use skip::{NoiseConfig, SkipConfig, noise, silence, trim};
