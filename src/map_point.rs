use crate::{level_scale, level_zero_position, Camera, Degeneracy, KeyFrameKey, RobustStatistics};
use cv_core::nalgebra::{Point2, Point3, Unit, Vector2, Vector3};
use cv_core::{Pose, WorldToCamera};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Below this, a viewing ray is considered parallel to the patch plane.
const MINIMUM_INCIDENCE: f64 = 1e-9;

/// The planar patch model around a map point.
///
/// The four local vectors live in the camera frame of the point's source keyframe and are always
/// replaced together. The two world vectors are derived from them and the source keyframe's pose by
/// [`PatchGeometry::refresh`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchGeometry {
    center: Unit<Vector3<f64>>,
    one_down: Unit<Vector3<f64>>,
    one_right: Unit<Vector3<f64>>,
    normal: Unit<Vector3<f64>>,
    pixel_down: Vector3<f64>,
    pixel_right: Vector3<f64>,
}

impl PatchGeometry {
    /// Builds the local frame of a patch centered at `level_position` on pyramid level `level`.
    ///
    /// The patch starts out facing the camera. The world vectors are zero until the first
    /// [`PatchGeometry::refresh`].
    pub fn from_level_position(
        camera: &impl Camera,
        level: usize,
        level_position: Point2<f64>,
    ) -> Self {
        let root = level_zero_position(level_position, level);
        let step = level_scale(level);
        Self {
            center: camera.bearing(root),
            one_down: camera.bearing(root + Vector2::new(0.0, step)),
            one_right: camera.bearing(root + Vector2::new(step, 0.0)),
            normal: Unit::new_unchecked(Vector3::new(0.0, 0.0, -1.0)),
            pixel_down: Vector3::zeros(),
            pixel_right: Vector3::zeros(),
        }
    }

    /// Unit vector in the source camera frame pointing at the patch center.
    pub fn center(&self) -> Unit<Vector3<f64>> {
        self.center
    }

    /// Unit vector in the source camera frame pointing one source pixel below the center.
    pub fn one_down(&self) -> Unit<Vector3<f64>> {
        self.one_down
    }

    /// Unit vector in the source camera frame pointing one source pixel right of the center.
    pub fn one_right(&self) -> Unit<Vector3<f64>> {
        self.one_right
    }

    /// The patch normal in the source camera frame.
    pub fn normal(&self) -> Unit<Vector3<f64>> {
        self.normal
    }

    /// The world displacement corresponding to moving one pixel down in the source image.
    pub fn pixel_down(&self) -> Vector3<f64> {
        self.pixel_down
    }

    /// The world displacement corresponding to moving one pixel right in the source image.
    pub fn pixel_right(&self) -> Vector3<f64> {
        self.pixel_right
    }

    /// Recomputes the world vectors by intersecting the three viewing rays with the patch plane
    /// through `position`, as seen from `source_pose`.
    ///
    /// Nothing is changed if the geometry is degenerate.
    pub fn refresh(
        &mut self,
        position: Point3<f64>,
        source_pose: WorldToCamera,
    ) -> Result<(), Degeneracy> {
        let isometry = source_pose.isometry();
        let camera_point = isometry * position;
        if camera_point.z <= 0.0 || !camera_point.z.is_finite() {
            return Err(Degeneracy::NonPositiveDepth(camera_point.z));
        }
        let height = camera_point.coords.dot(&self.normal).abs();
        let on_plane = |ray: Unit<Vector3<f64>>| {
            let rate = ray.dot(&self.normal).abs();
            if rate < MINIMUM_INCIDENCE || height < MINIMUM_INCIDENCE {
                Err(Degeneracy::IllConditioned)
            } else {
                Ok(ray.into_inner() * (height / rate))
            }
        };
        let center = on_plane(self.center)?;
        let one_down = on_plane(self.one_down)?;
        let one_right = on_plane(self.one_right)?;
        let to_world = isometry.rotation.inverse();
        self.pixel_down = to_world * (one_down - center);
        self.pixel_right = to_world * (one_right - center);
        Ok(())
    }
}

/// The mapper-owned state of a point that must be read as a unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointState {
    pub position: Point3<f64>,
    pub patch: PatchGeometry,
}

/// Where a point was first seen, which determines the pixels used to search for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchSource {
    pub keyframe: KeyFrameKey,
    pub level: usize,
    /// The patch center on `level` of the source keyframe.
    pub center: Point2<f64>,
    pub color: [u8; 3],
}

/// A 3d landmark in the map.
///
/// The position and patch geometry are written only by the mapper, the robust statistics only by
/// the tracker, and the bad flag by either one. Once a point is bad it stays bad.
#[derive(Debug)]
pub struct MapPoint {
    state: RwLock<PointState>,
    bad: AtomicBool,
    statistics: RobustStatistics,
    source: PatchSource,
    /// Keyframes in the map holding a measurement of this point.
    observers: Mutex<HashSet<KeyFrameKey>>,
    created: Instant,
}

impl MapPoint {
    pub(crate) fn new(position: Point3<f64>, patch: PatchGeometry, source: PatchSource) -> Self {
        Self {
            state: RwLock::new(PointState { position, patch }),
            bad: AtomicBool::new(false),
            statistics: RobustStatistics::default(),
            source,
            observers: Mutex::new(HashSet::new()),
            created: Instant::now(),
        }
    }

    /// The position and patch geometry, read together.
    pub fn state(&self) -> PointState {
        *self.state.read()
    }

    pub fn position(&self) -> Point3<f64> {
        self.state.read().position
    }

    pub fn patch(&self) -> PatchGeometry {
        self.state.read().patch
    }

    pub fn is_bad(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }

    pub fn source(&self) -> &PatchSource {
        &self.source
    }

    pub fn statistics(&self) -> &RobustStatistics {
        &self.statistics
    }

    /// The number of keyframes in the map that measure this point.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn observers(&self) -> Vec<KeyFrameKey> {
        self.observers.lock().iter().copied().collect()
    }

    /// When the point was created; only useful for diagnostics.
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Raises the bad flag. Returns `true` if this call is the one that raised it.
    pub(crate) fn mark_bad(&self) -> bool {
        !self.bad.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set_position(&self, position: Point3<f64>) {
        self.state.write().position = position;
    }

    /// Recomputes the world patch vectors; the state is left untouched on failure.
    pub(crate) fn refresh_patch(&self, source_pose: WorldToCamera) -> Result<(), Degeneracy> {
        let mut state = self.state.write();
        let position = state.position;
        state.patch.refresh(position, source_pose)
    }

    pub(crate) fn add_observer(&self, keyframe: KeyFrameKey) {
        self.observers.lock().insert(keyframe);
    }

    pub(crate) fn remove_observer(&self, keyframe: KeyFrameKey) {
        self.observers.lock().remove(&keyframe);
    }
}
