//! # Keyframe map
//!
//! This crate provides the shared map at the center of a keyframe-based monocular SLAM system.
//! Two long-running processes operate on the same map: a tracker, which runs at the camera frame
//! rate and estimates the camera pose against the map, and a mapper, which extends and refines the
//! map at its own pace. Neither process ever waits on the other for more than the time it takes to
//! insert or look up an entry in a registry.
//!
//! The map is a graph of [`KeyFrame`]s and [`MapPoint`]s. Both live in arenas and refer to each
//! other only by key ([`KeyFrameKey`], [`MapPointKey`]), so a stale reference is a failed lookup
//! rather than a dangling pointer. A [`Measurement`] joins the two: it is stored in a keyframe's
//! measurement table under the key of the map point it observes.
//!
//! ## Two-phase keyframes
//!
//! Every incoming image is turned into a keyframe by the tracker using the cheap phase
//! ([`KeyFrame::make_lite`]), which builds the image pyramid and detects corners. Most of these are
//! discarded once the pose has been estimated. When a frame is selected for the map, it is handed to
//! the mapper through [`Tracking::submit_keyframe`], and the mapper runs the expensive phase
//! ([`Mapping::make_keyframe_rest`]), which nominates [`Candidate`]s for new map points and computes
//! the scene depth heuristics. Data that only exists after the expensive phase can only be reached
//! through [`KeyFrame::rest`], which fails with [`MapError::NotRestBuilt`] before then.
//!
//! ## Ownership partition
//!
//! A [`Map`] is split into exactly one [`Tracking`] handle and one [`Mapping`] handle using
//! [`Map::split`]. Each handle owns a private side table of per-point data that the other process
//! can never see, and each shared field of a [`MapPoint`] has exactly one writer:
//!
//! * position and patch geometry are written by the mapper
//! * the robust estimator counters are incremented by the tracker
//! * the bad flag may be raised by either, but never lowered
//!
//! Since the writer methods only exist on the handle that owns them, this is checked at compile time.
//!
//! ```text
//!        Tracking<T>                          Mapping<M>
//!   +-------------------+               +-------------------+
//!   | SecondaryMap<T>   |   keyframes   | SecondaryMap<M>   |
//!   | counters, bad     |-------------->| position, patch,  |
//!   +---------+---------+   (channel)   | rest phase, bad   |
//!             |                         +---------+---------+
//!             |            +-------+              |
//!             +----------->|  Map  |<-------------+
//!                          +-------+
//! ```

mod camera;
mod corners;
mod error;
mod keyframe;
mod level;
mod map;
mod map_point;
mod mapping;
mod measurement;
mod pyramid;
mod settings;
mod statistics;
mod thumbnail;
mod tracking;

pub use camera::*;
pub use corners::*;
pub use error::*;
pub use keyframe::*;
pub use level::*;
pub use map::*;
pub use map_point::*;
pub use mapping::*;
pub use measurement::*;
pub use pyramid::*;
pub use settings::*;
pub use statistics::*;
pub use thumbnail::*;
pub use tracking::*;

pub use cv_core;

use slotmap::new_key_type;

/// The number of levels in every keyframe's image pyramid.
///
/// Level zero is the full resolution image and each level after it is half the resolution of the
/// level before it.
pub const LEVELS: usize = 4;

new_key_type! {
    /// Identifies a [`KeyFrame`] that has been inserted into a [`Map`].
    pub struct KeyFrameKey;
    /// Identifies a [`MapPoint`] in a [`Map`].
    pub struct MapPointKey;
}
