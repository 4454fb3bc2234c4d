use crate::{KeyFrameKey, MapPointKey};
use thiserror::Error;

/// Failures of the pyramid builder.
///
/// These are reported to the tracker so it can fall back to a degraded frame instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PyramidError {
    #[error("a {width}x{height} image cannot be downsampled into {levels} levels")]
    ImageTooSmall {
        width: u32,
        height: u32,
        levels: usize,
    },
    #[error("the color image is {color:?} but the grayscale image is {gray:?}")]
    ColorMismatch { gray: (u32, u32), color: (u32, u32) },
    #[error("level {level} produced {count} corners, more than the limit of {limit}")]
    CornerOverflow {
        level: usize,
        count: usize,
        limit: usize,
    },
}

/// The ways a point's geometry can stop making sense.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Degeneracy {
    #[error("the point has non-positive depth {0} in its source keyframe")]
    NonPositiveDepth(f64),
    #[error("the patch plane is parallel to a viewing ray")]
    IllConditioned,
}

/// Failures of operations on the map.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("keyframe {0:?} is not in the map")]
    StaleKeyFrame(KeyFrameKey),
    #[error("map point {0:?} is not in the map")]
    StaleMapPoint(MapPointKey),
    #[error("the keyframe has not been through the expensive phase yet")]
    NotRestBuilt,
    #[error("keyframe {0:?} has already been through the expensive phase")]
    AlreadyRestBuilt(KeyFrameKey),
    #[error("map point {0:?} is bad")]
    BadMapPoint(MapPointKey),
    #[error("map point {point:?} is still measured by {observers} keyframes")]
    StillReferenced { point: MapPointKey, observers: usize },
    #[error("map point {0:?} is not bad")]
    NotBad(MapPointKey),
    #[error("keyframe {0:?} anchors the map and cannot be moved or erased")]
    FixedKeyFrame(KeyFrameKey),
    #[error("pyramid level {0} does not exist")]
    InvalidLevel(usize),
    #[error("level {level} has no candidate {index}")]
    InvalidCandidate { level: usize, index: usize },
    #[error("degenerate geometry: {0}")]
    Degenerate(#[from] Degeneracy),
}
