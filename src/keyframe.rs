use crate::{
    half_sample, minimum_image_side, Candidate, CornerDetector, MapError, MapPointKey, MapSettings,
    Measurement, PyramidError, PyramidLevel, Thumbnail, LEVELS,
};
use cv_core::nalgebra::Point3;
use cv_core::{Pose, WorldToCamera};
use image::{GrayImage, RgbImage};
use log::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::OnceLock;

/// How far a keyframe has been built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFrameState {
    /// Only the cheap phase has run: pyramid images and corners exist.
    LiteBuilt,
    /// The expensive phase has run as well: candidates and scene depth exist.
    RestBuilt,
}

/// Mean and standard deviation of the depth of the points a keyframe measures.
///
/// The mapper uses this to bound its epipolar searches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneDepth {
    pub mean: f64,
    pub sigma: f64,
    /// The number of depths the statistics were computed from.
    pub samples: usize,
}

impl SceneDepth {
    /// Computes the statistics of some depths, or `None` if there are none.
    ///
    /// ```
    /// use cv_map::SceneDepth;
    ///
    /// let depth = SceneDepth::from_depths([1.0, 3.0]).unwrap();
    /// assert_eq!((depth.mean, depth.sigma, depth.samples), (2.0, 1.0, 2));
    /// assert!(SceneDepth::from_depths(std::iter::empty()).is_none());
    /// ```
    pub fn from_depths(depths: impl IntoIterator<Item = f64>) -> Option<Self> {
        let (sum, sum_squared, samples) = depths
            .into_iter()
            .fold((0.0, 0.0, 0usize), |(sum, sum_squared, samples), depth| {
                (sum + depth, sum_squared + depth * depth, samples + 1)
            });
        if samples == 0 {
            return None;
        }
        let mean = sum / samples as f64;
        let variance = sum_squared / samples as f64 - mean * mean;
        Some(Self {
            mean,
            sigma: variance.max(0.0).sqrt(),
            samples,
        })
    }
}

/// The data only the expensive phase produces.
#[derive(Debug)]
pub struct KeyFrameRest {
    candidates: [Vec<Candidate>; LEVELS],
    scene_depth: RwLock<Option<SceneDepth>>,
    thumbnail: Option<Thumbnail>,
}

impl KeyFrameRest {
    /// The candidates nominated on a pyramid level.
    pub fn candidates(&self, level: usize) -> Result<&[Candidate], MapError> {
        self.candidates
            .get(level)
            .map(Vec::as_slice)
            .ok_or(MapError::InvalidLevel(level))
    }

    /// The total number of candidates over all levels.
    pub fn candidate_count(&self) -> usize {
        self.candidates.iter().map(Vec::len).sum()
    }

    /// The scene depth, or `None` if no usable measurement was available to compute it.
    pub fn scene_depth(&self) -> Option<SceneDepth> {
        *self.scene_depth.read()
    }

    pub fn thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnail.as_ref()
    }
}

/// A camera frame with its image pyramid, pose, and measurements of map points.
///
/// The tracker turns every frame into a `KeyFrame` with [`KeyFrame::make_lite`]. While the tracker
/// owns it, it can freely change its pose and measurements. Once submitted to the map it is shared
/// and only the mapper changes it.
#[derive(Debug)]
pub struct KeyFrame {
    /// Camera-from-world.
    pose: RwLock<WorldToCamera>,
    fixed: bool,
    levels: [PyramidLevel; LEVELS],
    measurements: RwLock<HashMap<MapPointKey, Measurement>>,
    color: RgbImage,
    rest: OnceLock<KeyFrameRest>,
}

impl KeyFrame {
    /// Runs the cheap phase: builds the image pyramid and detects the corners of every level.
    ///
    /// The color image must have the same dimensions as `image`; it is kept for display only.
    pub fn make_lite(
        image: GrayImage,
        color: RgbImage,
        pose: WorldToCamera,
        detector: &impl CornerDetector,
        settings: &MapSettings,
    ) -> Result<Self, PyramidError> {
        let (width, height) = image.dimensions();
        if width.min(height) < minimum_image_side() {
            return Err(PyramidError::ImageTooSmall {
                width,
                height,
                levels: LEVELS,
            });
        }
        if color.dimensions() != image.dimensions() {
            return Err(PyramidError::ColorMismatch {
                gray: image.dimensions(),
                color: color.dimensions(),
            });
        }

        let mut levels: [PyramidLevel; LEVELS] = Default::default();
        let mut image = Some(image);
        for level in 0..LEVELS {
            let level_image = match image.take() {
                Some(image) => image,
                None => half_sample(levels[level - 1].image()),
            };
            levels[level] = PyramidLevel::detect(level, level_image, detector, settings)?;
        }
        trace!(
            "built lite keyframe with {:?} corners",
            levels.iter().map(|l| l.corners().len()).collect::<Vec<_>>()
        );

        Ok(Self {
            pose: RwLock::new(pose),
            fixed: false,
            levels,
            measurements: RwLock::new(HashMap::new()),
            color,
            rest: OnceLock::new(),
        })
    }

    /// Camera-from-world.
    pub fn pose(&self) -> WorldToCamera {
        *self.pose.read()
    }

    /// Changes the pose of a keyframe the caller exclusively owns.
    pub fn set_pose(&mut self, pose: WorldToCamera) {
        *self.pose.get_mut() = pose;
    }

    /// The optical center in world coordinates.
    pub fn camera_center(&self) -> Point3<f64> {
        self.pose().isometry().inverse() * Point3::origin()
    }

    /// Only the first keyframe of a map is fixed; it anchors the map's gauge.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn levels(&self) -> &[PyramidLevel; LEVELS] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> Result<&PyramidLevel, MapError> {
        self.levels.get(level).ok_or(MapError::InvalidLevel(level))
    }

    /// The color image, kept for display only.
    pub fn color(&self) -> &RgbImage {
        &self.color
    }

    pub fn state(&self) -> KeyFrameState {
        if self.rest.get().is_some() {
            KeyFrameState::RestBuilt
        } else {
            KeyFrameState::LiteBuilt
        }
    }

    /// The data produced by the expensive phase.
    ///
    /// Fails with [`MapError::NotRestBuilt`] until the mapper has run the expensive phase.
    pub fn rest(&self) -> Result<&KeyFrameRest, MapError> {
        self.rest.get().ok_or(MapError::NotRestBuilt)
    }

    /// Shorthand for the candidates of a level from [`KeyFrame::rest`].
    pub fn candidates(&self, level: usize) -> Result<&[Candidate], MapError> {
        self.rest()?.candidates(level)
    }

    /// Shorthand for the scene depth from [`KeyFrame::rest`].
    pub fn scene_depth(&self) -> Result<Option<SceneDepth>, MapError> {
        Ok(self.rest()?.scene_depth())
    }

    pub fn measurement(&self, point: MapPointKey) -> Option<Measurement> {
        self.measurements.read().get(&point).copied()
    }

    pub fn measures(&self, point: MapPointKey) -> bool {
        self.measurements.read().contains_key(&point)
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.read().len()
    }

    /// A snapshot of every measurement in this keyframe.
    pub fn measurements(&self) -> Vec<(MapPointKey, Measurement)> {
        self.measurements
            .read()
            .iter()
            .map(|(&point, &measurement)| (point, measurement))
            .collect()
    }

    pub(crate) fn set_fixed(&mut self) {
        self.fixed = true;
    }

    pub(crate) fn store_pose(&self, pose: WorldToCamera) {
        *self.pose.write() = pose;
    }

    pub(crate) fn measurements_mut(&mut self) -> &mut HashMap<MapPointKey, Measurement> {
        self.measurements.get_mut()
    }

    pub(crate) fn insert_measurement(
        &self,
        point: MapPointKey,
        measurement: Measurement,
    ) -> Option<Measurement> {
        self.measurements.write().insert(point, measurement)
    }

    pub(crate) fn remove_measurement(&self, point: MapPointKey) -> Option<Measurement> {
        self.measurements.write().remove(&point)
    }

    /// The depths of the measured points that `position` can resolve.
    fn measured_depths(
        &self,
        position: impl Fn(MapPointKey) -> Option<Point3<f64>>,
    ) -> Vec<f64> {
        let isometry = self.pose().isometry();
        let measured: Vec<MapPointKey> = self.measurements.read().keys().copied().collect();
        measured
            .into_iter()
            .filter_map(position)
            .map(|world| (isometry * world).z)
            .collect()
    }

    /// Runs the expensive phase.
    ///
    /// `position` resolves the positions of measured points, returning `None` for points that
    /// should not contribute (bad or missing). Returns `false` if the phase had already run.
    pub(crate) fn make_rest(
        &self,
        position: impl Fn(MapPointKey) -> Option<Point3<f64>>,
        settings: &MapSettings,
    ) -> bool {
        if self.rest.get().is_some() {
            return false;
        }
        let mut candidates: [Vec<Candidate>; LEVELS] = Default::default();
        for (level, candidates) in self.levels.iter().zip(candidates.iter_mut()) {
            *candidates = level.find_candidates(&self.color, settings);
        }
        let scene_depth = SceneDepth::from_depths(self.measured_depths(position));
        let thumbnail = settings.make_thumbnail.then(|| {
            Thumbnail::from_coarsest_level(self.levels[LEVELS - 1].image(), settings.thumbnail_blur)
        });
        let rest = KeyFrameRest {
            candidates,
            scene_depth: RwLock::new(scene_depth),
            thumbnail,
        };
        debug!(
            "expensive phase nominated {} candidates with scene depth {:?}",
            rest.candidate_count(),
            scene_depth
        );
        self.rest.set(rest).is_ok()
    }

    /// Recomputes the scene depth from the current pose and point positions.
    pub(crate) fn refresh_scene_depth(
        &self,
        position: impl Fn(MapPointKey) -> Option<Point3<f64>>,
    ) -> Result<Option<SceneDepth>, MapError> {
        let rest = self.rest()?;
        let scene_depth = SceneDepth::from_depths(self.measured_depths(position));
        *rest.scene_depth.write() = scene_depth;
        Ok(scene_depth)
    }
}
