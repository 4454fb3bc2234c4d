use crate::{level_position, level_zero_position, MapError, LEVELS};
use cv_core::nalgebra::Point2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Where a [`Measurement`] came from.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementSource {
    /// Matched directly by the tracker.
    Tracker,
    /// Re-found by the mapper searching for points a keyframe should see.
    Refind,
    /// The keyframe the point was created in.
    Root,
    /// Followed as a feature trail during map initialization.
    Trail,
    /// Found along an epipolar line while creating the point.
    Epipolar,
}

/// An observation of one map point in one keyframe.
///
/// The position is always expressed on pyramid level zero, regardless of the level the observation
/// was made at, so measurements from different levels can be compared directly.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    level: usize,
    subpixel: bool,
    root_position: Point2<f64>,
    source: MeasurementSource,
}

impl Measurement {
    /// Creates a measurement from a position on pyramid level `level`.
    ///
    /// ```
    /// use cv_map::{Measurement, MeasurementSource};
    /// use cv_map::cv_core::nalgebra::Point2;
    ///
    /// let m = Measurement::from_level(2, Point2::new(10.0, 7.5), MeasurementSource::Tracker, false);
    /// assert_eq!(m.root_position(), Point2::new(40.0, 30.0));
    /// assert_eq!(m.level_position(), Point2::new(10.0, 7.5));
    /// ```
    pub fn from_level(
        level: usize,
        level_position: Point2<f64>,
        source: MeasurementSource,
        subpixel: bool,
    ) -> Self {
        Self::from_root(
            level,
            level_zero_position(level_position, level),
            source,
            subpixel,
        )
    }

    /// Creates a measurement from a position already expressed on pyramid level zero.
    pub fn from_root(
        level: usize,
        root_position: Point2<f64>,
        source: MeasurementSource,
        subpixel: bool,
    ) -> Self {
        Self {
            level,
            subpixel,
            root_position,
            source,
        }
    }

    /// The pyramid level the observation was made at.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Fails with [`MapError::InvalidLevel`] if the level is not part of the pyramid.
    ///
    /// Keyframes only accept measurements that pass this check.
    pub fn check_level(&self) -> Result<(), MapError> {
        if self.level < LEVELS {
            Ok(())
        } else {
            Err(MapError::InvalidLevel(self.level))
        }
    }

    /// Whether the position has been refined to sub-pixel precision.
    pub fn is_subpixel(&self) -> bool {
        self.subpixel
    }

    /// The position on pyramid level zero.
    pub fn root_position(&self) -> Point2<f64> {
        self.root_position
    }

    /// The position on the pyramid level the observation was made at.
    pub fn level_position(&self) -> Point2<f64> {
        level_position(self.root_position, self.level)
    }

    pub fn source(&self) -> MeasurementSource {
        self.source
    }

    /// Replaces the position with a sub-pixel refinement (given on level zero).
    ///
    /// The level and source never change.
    pub fn refine(&mut self, root_position: Point2<f64>) {
        self.root_position = root_position;
        self.subpixel = true;
    }
}
