use crate::{
    KeyFrame, KeyFrameKey, MapError, MapPoint, MapPointKey, MapSettings, Mapping, Measurement,
    Tracking,
};
use cv_core::nalgebra::Point3;
use cv_core::WorldToCamera;
use log::*;
use parking_lot::RwLock;
use slotmap::DenseSlotMap;
use std::sync::Arc;

/// The registries of keyframes and map points shared by the tracker and the mapper.
///
/// Reading is open to everyone. Every write goes through either the [`Tracking`] or the [`Mapping`]
/// handle produced by [`Map::split`].
///
/// When both registries are locked, the keyframe registry is always locked first.
#[derive(Debug)]
pub struct Map {
    keyframes: RwLock<DenseSlotMap<KeyFrameKey, Arc<KeyFrame>>>,
    points: RwLock<DenseSlotMap<MapPointKey, Arc<MapPoint>>>,
    settings: MapSettings,
}

impl Map {
    pub fn new(settings: MapSettings) -> Self {
        Self {
            keyframes: RwLock::new(DenseSlotMap::with_key()),
            points: RwLock::new(DenseSlotMap::with_key()),
            settings,
        }
    }

    /// Splits the map into the handles of the two processes that share it.
    ///
    /// `T` is the per-point data private to the tracker and `M` the per-point data private to the
    /// mapper.
    pub fn split<T, M>(self) -> (Tracking<T>, Mapping<M>) {
        let map = Arc::new(self);
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            Tracking::new(map.clone(), sender),
            Mapping::new(map, receiver),
        )
    }

    pub fn settings(&self) -> &MapSettings {
        &self.settings
    }

    pub fn keyframe(&self, keyframe: KeyFrameKey) -> Result<Arc<KeyFrame>, MapError> {
        self.keyframes
            .read()
            .get(keyframe)
            .cloned()
            .ok_or(MapError::StaleKeyFrame(keyframe))
    }

    /// Retrieves a point, whether or not it is bad.
    pub fn point(&self, point: MapPointKey) -> Result<Arc<MapPoint>, MapError> {
        self.points
            .read()
            .get(point)
            .cloned()
            .ok_or(MapError::StaleMapPoint(point))
    }

    /// Retrieves a point, failing if it is bad.
    pub fn good_point(&self, point: MapPointKey) -> Result<Arc<MapPoint>, MapError> {
        let found = self.point(point)?;
        if found.is_bad() {
            Err(MapError::BadMapPoint(point))
        } else {
            Ok(found)
        }
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.read().len()
    }

    /// The number of points in the map, including bad points awaiting reclamation.
    pub fn point_count(&self) -> usize {
        self.points.read().len()
    }

    /// A snapshot of every keyframe in the map.
    pub fn keyframes(&self) -> Vec<(KeyFrameKey, Arc<KeyFrame>)> {
        self.keyframes
            .read()
            .iter()
            .map(|(key, keyframe)| (key, keyframe.clone()))
            .collect()
    }

    /// A snapshot of the pose of every keyframe in the map.
    pub fn keyframe_poses(&self) -> Vec<(KeyFrameKey, WorldToCamera)> {
        self.keyframes
            .read()
            .iter()
            .map(|(key, keyframe)| (key, keyframe.pose()))
            .collect()
    }

    /// A snapshot of every point in the map, including bad points awaiting reclamation.
    pub fn points(&self) -> Vec<(MapPointKey, Arc<MapPoint>)> {
        self.points
            .read()
            .iter()
            .map(|(key, point)| (key, point.clone()))
            .collect()
    }

    /// A snapshot of every point that is not bad.
    pub fn good_points(&self) -> Vec<(MapPointKey, Arc<MapPoint>)> {
        self.points
            .read()
            .iter()
            .filter(|(_, point)| !point.is_bad())
            .map(|(key, point)| (key, point.clone()))
            .collect()
    }

    /// The keyframes in the map that hold a measurement of `point`.
    pub fn observers(&self, point: MapPointKey) -> Result<Vec<KeyFrameKey>, MapError> {
        Ok(self.point(point)?.observers())
    }

    /// Whether any keyframe in the map still holds a measurement of `point`.
    pub fn is_referenced(&self, point: MapPointKey) -> Result<bool, MapError> {
        Ok(self.point(point)?.observer_count() != 0)
    }

    /// Bad points that no keyframe references anymore and can be physically removed.
    pub fn reclaimable_points(&self) -> Vec<MapPointKey> {
        self.points
            .read()
            .iter()
            .filter(|(_, point)| point.is_bad() && point.observer_count() == 0)
            .map(|(key, _)| key)
            .collect()
    }

    /// The position of a point if it exists and is not bad.
    pub(crate) fn live_position(&self, point: MapPointKey) -> Option<Point3<f64>> {
        self.points
            .read()
            .get(point)
            .filter(|point| !point.is_bad())
            .map(|point| point.position())
    }

    /// Makes a keyframe visible to every reader at once.
    ///
    /// The first keyframe becomes the fixed keyframe. Measurements of points that are no longer in
    /// the map are dropped; measurements of bad points are kept until they are detached.
    pub(crate) fn insert_keyframe(&self, mut keyframe: KeyFrame) -> KeyFrameKey {
        let mut keyframes = self.keyframes.write();
        let points = self.points.read();

        let before = keyframe.measurement_count();
        keyframe
            .measurements_mut()
            .retain(|&point, _| points.contains_key(point));
        let dropped = before - keyframe.measurement_count();
        if dropped != 0 {
            debug!(
                "dropped {} measurements of points removed while the keyframe was being tracked",
                dropped
            );
        }

        if keyframes.is_empty() {
            keyframe.set_fixed();
        }
        let measured: Vec<MapPointKey> = keyframe.measurements_mut().keys().copied().collect();
        let fixed = keyframe.is_fixed();
        let key = keyframes.insert(Arc::new(keyframe));
        for point in measured.iter().filter_map(|&point| points.get(point)) {
            point.add_observer(key);
        }
        info!(
            "inserted keyframe {:?} with {} measurements (fixed: {})",
            key,
            measured.len(),
            fixed
        );
        key
    }

    pub(crate) fn insert_point(&self, point: MapPoint) -> MapPointKey {
        self.points.write().insert(Arc::new(point))
    }

    /// Adds or replaces the measurement of `point` in a keyframe of the map.
    pub(crate) fn add_measurement(
        &self,
        keyframe: KeyFrameKey,
        point: MapPointKey,
        measurement: Measurement,
    ) -> Result<Option<Measurement>, MapError> {
        measurement.check_level()?;
        let keyframe_ref = self.keyframe(keyframe)?;
        let points = self.points.read();
        let point_ref = points.get(point).ok_or(MapError::StaleMapPoint(point))?;
        if point_ref.is_bad() {
            return Err(MapError::BadMapPoint(point));
        }
        let previous = keyframe_ref.insert_measurement(point, measurement);
        point_ref.add_observer(keyframe);
        Ok(previous)
    }

    pub(crate) fn remove_measurement(
        &self,
        keyframe: KeyFrameKey,
        point: MapPointKey,
    ) -> Result<Option<Measurement>, MapError> {
        let keyframe_ref = self.keyframe(keyframe)?;
        let points = self.points.read();
        let removed = keyframe_ref.remove_measurement(point);
        if let Some(point_ref) = points.get(point) {
            point_ref.remove_observer(keyframe);
        }
        Ok(removed)
    }

    /// Removes a keyframe from the map along with the observer entries of its measurements.
    pub(crate) fn erase_keyframe(&self, keyframe: KeyFrameKey) -> Result<Arc<KeyFrame>, MapError> {
        let mut keyframes = self.keyframes.write();
        match keyframes.get(keyframe) {
            None => return Err(MapError::StaleKeyFrame(keyframe)),
            Some(found) if found.is_fixed() => return Err(MapError::FixedKeyFrame(keyframe)),
            Some(_) => {}
        }
        let removed = keyframes
            .remove(keyframe)
            .ok_or(MapError::StaleKeyFrame(keyframe))?;
        let points = self.points.read();
        for (point, _) in removed.measurements() {
            if let Some(point_ref) = points.get(point) {
                point_ref.remove_observer(keyframe);
            }
        }
        info!(
            "erased keyframe {:?} with {} measurements",
            keyframe,
            removed.measurement_count()
        );
        Ok(removed)
    }

    /// Physically removes a bad point that no keyframe references anymore.
    pub(crate) fn remove_point(&self, point: MapPointKey) -> Result<Arc<MapPoint>, MapError> {
        let mut points = self.points.write();
        let found = points.get(point).ok_or(MapError::StaleMapPoint(point))?;
        if !found.is_bad() {
            return Err(MapError::NotBad(point));
        }
        let observers = found.observer_count();
        if observers != 0 {
            return Err(MapError::StillReferenced { point, observers });
        }
        points.remove(point).ok_or(MapError::StaleMapPoint(point))
    }

    /// Physically removes every reclaimable point.
    pub(crate) fn collect_garbage(&self) -> Vec<MapPointKey> {
        let mut removed = vec![];
        self.points.write().retain(|key, point| {
            let reclaim = point.is_bad() && point.observer_count() == 0;
            if reclaim {
                removed.push(key);
            }
            !reclaim
        });
        if !removed.is_empty() {
            info!("reclaimed {} bad map points", removed.len());
        }
        removed
    }
}
