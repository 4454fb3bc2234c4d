use crate::{
    CornerDetector, KeyFrame, KeyFrameKey, Map, MapError, MapPointKey, Measurement, PyramidError,
};
use crossbeam_channel::Sender;
use cv_core::WorldToCamera;
use image::{GrayImage, RgbImage};
use log::*;
use slotmap::SecondaryMap;
use std::sync::Arc;

/// The tracker's handle on a [`Map`].
///
/// There is exactly one per map. It owns the tracker's private per-point data of type `T` and is
/// the only way to increment the robust estimator counters of a point or to submit new keyframes.
#[derive(Debug)]
pub struct Tracking<T> {
    map: Arc<Map>,
    data: SecondaryMap<MapPointKey, T>,
    submitted: Sender<KeyFrameKey>,
}

impl<T> Tracking<T> {
    pub(crate) fn new(map: Arc<Map>, submitted: Sender<KeyFrameKey>) -> Self {
        Self {
            map,
            data: SecondaryMap::new(),
            submitted,
        }
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    /// Runs the cheap phase on a new frame using the map's settings.
    pub fn make_keyframe_lite(
        &self,
        image: GrayImage,
        color: RgbImage,
        pose: WorldToCamera,
        detector: &impl CornerDetector,
    ) -> Result<KeyFrame, PyramidError> {
        KeyFrame::make_lite(image, color, pose, detector, self.map.settings())
    }

    /// Attaches a measurement of `point` to a keyframe the tracker still owns.
    ///
    /// A previous measurement of the same point is replaced and returned.
    pub fn measure(
        &self,
        keyframe: &mut KeyFrame,
        point: MapPointKey,
        measurement: Measurement,
    ) -> Result<Option<Measurement>, MapError> {
        measurement.check_level()?;
        self.map.good_point(point)?;
        Ok(keyframe.measurements_mut().insert(point, measurement))
    }

    /// Removes a measurement from a keyframe the tracker still owns.
    pub fn unmeasure(&self, keyframe: &mut KeyFrame, point: MapPointKey) -> Option<Measurement> {
        keyframe.measurements_mut().remove(&point)
    }

    /// Inserts a keyframe into the map and hands it to the mapper for the expensive phase.
    ///
    /// This never waits on the mapper.
    pub fn submit_keyframe(&self, keyframe: KeyFrame) -> KeyFrameKey {
        let key = self.map.insert_keyframe(keyframe);
        if self.submitted.send(key).is_err() {
            warn!(
                "keyframe {:?} was inserted but the mapper is gone; it will stay lite",
                key
            );
        }
        key
    }

    /// Counts a successful robust match of `point`.
    pub fn record_inlier(&self, point: MapPointKey) -> Result<(), MapError> {
        self.map.point(point)?.statistics().record_inlier();
        Ok(())
    }

    /// Counts a failed robust match of `point`.
    pub fn record_outlier(&self, point: MapPointKey) -> Result<(), MapError> {
        self.map.point(point)?.statistics().record_outlier();
        Ok(())
    }

    /// Marks a point bad after repeated tracking failures.
    ///
    /// Returns `true` if the point was not already bad.
    pub fn mark_bad(&self, point: MapPointKey) -> Result<bool, MapError> {
        let raised = self.map.point(point)?.mark_bad();
        if raised {
            debug!("tracker marked map point {:?} bad", point);
        }
        Ok(raised)
    }

    pub fn data(&self, point: MapPointKey) -> Option<&T> {
        self.data.get(point)
    }

    pub fn data_mut(&mut self, point: MapPointKey) -> Option<&mut T> {
        self.data.get_mut(point)
    }

    pub fn insert_data(&mut self, point: MapPointKey, data: T) -> Option<T> {
        self.data.insert(point, data)
    }

    pub fn remove_data(&mut self, point: MapPointKey) -> Option<T> {
        self.data.remove(point)
    }

    /// Drops the private data of points that are bad or no longer in the map.
    pub fn prune_data(&mut self) -> usize {
        let map = &self.map;
        let before = self.data.len();
        self.data.retain(|point, _| map.good_point(point).is_ok());
        before - self.data.len()
    }
}
