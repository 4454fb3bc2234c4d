use crate::{
    level_position, Camera, KeyFrame, KeyFrameKey, Map, MapError, MapPoint, MapPointKey,
    Measurement, MeasurementSource, PatchGeometry, PatchSource, SceneDepth,
};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use cv_core::nalgebra::{Point2, Point3};
use cv_core::WorldToCamera;
use itertools::Itertools;
use log::*;
use slotmap::SecondaryMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// The mapper's handle on a [`Map`].
///
/// There is exactly one per map. It owns the mapper's private per-point data of type `M` and is the
/// only way to create points, move points and keyframes, complete the expensive phase of a
/// keyframe, and reclaim bad points.
#[derive(Debug)]
pub struct Mapping<M> {
    map: Arc<Map>,
    submitted: Receiver<KeyFrameKey>,
    data: SecondaryMap<MapPointKey, M>,
    /// Keyframes whose pose changed since the patches of their points were last refreshed.
    moved_keyframes: HashSet<KeyFrameKey>,
    /// Points whose position changed since their patch was last refreshed.
    moved_points: HashSet<MapPointKey>,
}

impl<M> Mapping<M> {
    pub(crate) fn new(map: Arc<Map>, submitted: Receiver<KeyFrameKey>) -> Self {
        Self {
            map,
            submitted,
            data: SecondaryMap::new(),
            moved_keyframes: HashSet::new(),
            moved_points: HashSet::new(),
        }
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    /// The next keyframe submitted by the tracker, if one is waiting.
    pub fn try_next_keyframe(&self) -> Option<KeyFrameKey> {
        self.submitted.try_recv().ok()
    }

    /// Waits up to `timeout` for the tracker to submit a keyframe.
    ///
    /// Returns `Ok(None)` on timeout and `Err` once the tracker is gone and nothing is pending.
    pub fn next_keyframe_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<KeyFrameKey>, RecvTimeoutError> {
        match self.submitted.recv_timeout(timeout) {
            Ok(key) => Ok(Some(key)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The number of submitted keyframes not yet taken.
    pub fn pending_keyframes(&self) -> usize {
        self.submitted.len()
    }

    /// Runs the expensive phase on a keyframe in the map.
    pub fn make_keyframe_rest(&self, keyframe: KeyFrameKey) -> Result<(), MapError> {
        let keyframe_ref = self.map.keyframe(keyframe)?;
        if keyframe_ref.make_rest(|point| self.map.live_position(point), self.map.settings()) {
            info!("completed the expensive phase of keyframe {:?}", keyframe);
            Ok(())
        } else {
            Err(MapError::AlreadyRestBuilt(keyframe))
        }
    }

    /// Promotes a candidate of `source` to a new map point at `position`.
    ///
    /// The point's patch faces the source camera and `source` receives a sub-pixel
    /// [`MeasurementSource::Root`] measurement of it.
    pub fn create_point(
        &mut self,
        source: KeyFrameKey,
        level: usize,
        candidate: usize,
        position: Point3<f64>,
        camera: &impl Camera,
    ) -> Result<MapPointKey, MapError> {
        let keyframe = self.map.keyframe(source)?;
        let found = *keyframe
            .candidates(level)?
            .get(candidate)
            .ok_or(MapError::InvalidCandidate {
                level,
                index: candidate,
            })?;
        let center = Point2::new(
            f64::from(found.level_position.x),
            f64::from(found.level_position.y),
        );
        let mut patch = PatchGeometry::from_level_position(camera, level, center);
        patch.refresh(position, keyframe.pose())?;

        let point = MapPoint::new(
            position,
            patch,
            PatchSource {
                keyframe: source,
                level,
                center,
                color: found.color,
            },
        );
        let key = self.map.insert_point(point);
        self.map.add_measurement(
            source,
            key,
            Measurement::from_level(level, center, MeasurementSource::Root, true),
        )?;
        debug!(
            "created map point {:?} from candidate {} on level {} of keyframe {:?}",
            key, candidate, level, source
        );
        Ok(key)
    }

    /// Moves a point. Its patch is refreshed by the next [`Mapping::refresh_stale_geometry`].
    pub fn set_point_position(
        &mut self,
        point: MapPointKey,
        position: Point3<f64>,
    ) -> Result<(), MapError> {
        self.map.point(point)?.set_position(position);
        self.moved_points.insert(point);
        Ok(())
    }

    /// Moves a keyframe. The patches of the points it sources are refreshed by the next
    /// [`Mapping::refresh_stale_geometry`].
    pub fn set_keyframe_pose(
        &mut self,
        keyframe: KeyFrameKey,
        pose: WorldToCamera,
    ) -> Result<(), MapError> {
        let keyframe_ref = self.map.keyframe(keyframe)?;
        if keyframe_ref.is_fixed() {
            return Err(MapError::FixedKeyFrame(keyframe));
        }
        keyframe_ref.store_pose(pose);
        self.moved_keyframes.insert(keyframe);
        Ok(())
    }

    /// Whether any pose or position changed since the last [`Mapping::refresh_stale_geometry`].
    pub fn has_stale_geometry(&self) -> bool {
        !self.moved_keyframes.is_empty() || !self.moved_points.is_empty()
    }

    /// Recomputes the world patch vectors of a point from its source keyframe's current pose.
    ///
    /// Degenerate geometry marks the point bad and returns `Ok(false)`. Bad points are skipped.
    pub fn refresh_patch_geometry(&self, point: MapPointKey) -> Result<bool, MapError> {
        let point_ref = self.map.point(point)?;
        if point_ref.is_bad() {
            return Ok(false);
        }
        let source = self.map.keyframe(point_ref.source().keyframe)?;
        match point_ref.refresh_patch(source.pose()) {
            Ok(()) => Ok(true),
            Err(degeneracy) => {
                warn!("map point {:?} became degenerate: {}", point, degeneracy);
                point_ref.mark_bad();
                Ok(false)
            }
        }
    }

    /// Refreshes the patch of every point that moved or whose source keyframe moved.
    ///
    /// Returns the number of patches refreshed successfully.
    pub fn refresh_stale_geometry(&mut self) -> usize {
        if !self.has_stale_geometry() {
            return 0;
        }
        let moved_keyframes = std::mem::take(&mut self.moved_keyframes);
        let moved_points = std::mem::take(&mut self.moved_points);
        let stale = self
            .map
            .good_points()
            .into_iter()
            .filter(|(key, point)| {
                moved_points.contains(key) || moved_keyframes.contains(&point.source().keyframe)
            })
            .map(|(key, _)| key)
            .collect_vec();
        let mut refreshed = 0;
        for point in stale {
            match self.refresh_patch_geometry(point) {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => debug!("could not refresh map point {:?}: {}", point, e),
            }
        }
        trace!("refreshed {} patches", refreshed);
        refreshed
    }

    /// Recomputes the scene depth of a keyframe from its current pose and measurements.
    pub fn refresh_scene_depth(
        &self,
        keyframe: KeyFrameKey,
    ) -> Result<Option<SceneDepth>, MapError> {
        self.map
            .keyframe(keyframe)?
            .refresh_scene_depth(|point| self.map.live_position(point))
    }

    /// Adds or replaces the measurement of `point` in a keyframe of the map.
    pub fn add_measurement(
        &self,
        keyframe: KeyFrameKey,
        point: MapPointKey,
        measurement: Measurement,
    ) -> Result<Option<Measurement>, MapError> {
        self.map.add_measurement(keyframe, point, measurement)
    }

    pub fn remove_measurement(
        &self,
        keyframe: KeyFrameKey,
        point: MapPointKey,
    ) -> Result<Option<Measurement>, MapError> {
        self.map.remove_measurement(keyframe, point)
    }

    /// The indices of the candidates on `level` that no existing measurement in the keyframe
    /// already covers.
    ///
    /// A candidate is covered when a measurement made on the same level or the next coarser one
    /// lies within `candidate_min_separation` pixels of it on `level`.
    pub fn unoccupied_candidates(
        &self,
        keyframe: KeyFrameKey,
        level: usize,
    ) -> Result<Vec<usize>, MapError> {
        let keyframe_ref = self.map.keyframe(keyframe)?;
        let candidates = keyframe_ref.candidates(level)?;
        let separation = self.map.settings().candidate_min_separation;
        let occupied = keyframe_ref
            .measurements()
            .into_iter()
            .filter(|(_, m)| m.level() == level || m.level() == level + 1)
            .map(|(_, m)| level_position(m.root_position(), level))
            .collect_vec();
        Ok(candidates
            .iter()
            .positions(|candidate| {
                let position = Point2::new(
                    f64::from(candidate.level_position.x),
                    f64::from(candidate.level_position.y),
                );
                occupied
                    .iter()
                    .all(|&other| (other - position).norm_squared() >= separation * separation)
            })
            .collect())
    }

    /// Marks a point bad after a geometric failure.
    ///
    /// Returns `true` if the point was not already bad.
    pub fn mark_bad(&self, point: MapPointKey) -> Result<bool, MapError> {
        let raised = self.map.point(point)?.mark_bad();
        if raised {
            debug!("mapper marked map point {:?} bad", point);
        }
        Ok(raised)
    }

    /// Marks bad every good point whose robust statistics show it to be unreliable.
    pub fn cull_unreliable_points(&self) -> Vec<MapPointKey> {
        let minimum = self.map.settings().outlier_cull_minimum;
        let culled = self
            .map
            .good_points()
            .into_iter()
            .filter(|(_, point)| point.statistics().is_unreliable(minimum))
            .filter(|(_, point)| point.mark_bad())
            .map(|(key, _)| key)
            .collect_vec();
        if !culled.is_empty() {
            debug!("culled {} unreliable map points", culled.len());
        }
        culled
    }

    /// Removes every measurement of a bad point so that it can be reclaimed.
    ///
    /// Returns the number of measurements removed.
    pub fn detach_point(&self, point: MapPointKey) -> Result<usize, MapError> {
        let point_ref = self.map.point(point)?;
        if !point_ref.is_bad() {
            return Err(MapError::NotBad(point));
        }
        let mut removed = 0;
        for keyframe in point_ref.observers() {
            if self.map.remove_measurement(keyframe, point)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Culls unreliable points, detaches every bad point, and reclaims them.
    ///
    /// Returns the points reclaimed.
    pub fn handle_bad_points(&mut self) -> Vec<MapPointKey> {
        self.cull_unreliable_points();
        for (point, _) in self
            .map
            .points()
            .into_iter()
            .filter(|(_, point)| point.is_bad())
        {
            if let Err(e) = self.detach_point(point) {
                warn!("could not detach bad map point {:?}: {}", point, e);
            }
        }
        self.collect_garbage()
    }

    /// Removes a keyframe from the map. The fixed keyframe cannot be erased.
    pub fn erase_keyframe(&mut self, keyframe: KeyFrameKey) -> Result<Arc<KeyFrame>, MapError> {
        let removed = self.map.erase_keyframe(keyframe)?;
        self.moved_keyframes.remove(&keyframe);
        Ok(removed)
    }

    /// Physically removes a single bad point that no keyframe references anymore.
    pub fn remove_point(&mut self, point: MapPointKey) -> Result<Arc<MapPoint>, MapError> {
        let removed = self.map.remove_point(point)?;
        self.data.remove(point);
        self.moved_points.remove(&point);
        Ok(removed)
    }

    /// Physically removes every bad point that no keyframe references anymore.
    pub fn collect_garbage(&mut self) -> Vec<MapPointKey> {
        let removed = self.map.collect_garbage();
        for &point in &removed {
            self.data.remove(point);
            self.moved_points.remove(&point);
        }
        removed
    }

    pub fn data(&self, point: MapPointKey) -> Option<&M> {
        self.data.get(point)
    }

    pub fn data_mut(&mut self, point: MapPointKey) -> Option<&mut M> {
        self.data.get_mut(point)
    }

    pub fn insert_data(&mut self, point: MapPointKey, data: M) -> Option<M> {
        self.data.insert(point, data)
    }

    pub fn remove_data(&mut self, point: MapPointKey) -> Option<M> {
        self.data.remove(point)
    }
}
