use approx::assert_relative_eq;
use cv_core::nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Translation3, Vector3};
use cv_core::{Pose, WorldToCamera};
use cv_map::{
    level_zero_position, Camera, FastCornerDetector, KeyFrameKey, KeyFrameState, Map, MapError,
    MapPointKey, MapSettings, Mapping, Measurement, MeasurementSource, Tracking, LEVELS,
};
use cv_pinhole::CameraIntrinsics;
use image::{GrayImage, Luma, Rgb, RgbImage};
use log::*;

const SIZE: u32 = 256;

/// Bright 24 pixel squares every 64 pixels, which become the same pattern at 6 pixels every 16 on
/// level 2.
fn squares() -> (GrayImage, RgbImage) {
    let inside = |v: u32| v >= 48 && (v - 48) % 64 < 24;
    let gray = GrayImage::from_fn(SIZE, SIZE, |x, y| {
        Luma([if inside(x) && inside(y) { 220 } else { 40 }])
    });
    let color = RgbImage::from_fn(SIZE, SIZE, |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v / 2, 255 - v])
    });
    (gray, color)
}

fn camera() -> CameraIntrinsics {
    let mut intrinsics = CameraIntrinsics::identity();
    intrinsics.focals.x = 200.0;
    intrinsics.focals.y = 200.0;
    intrinsics.principal_point.x = 128.0;
    intrinsics.principal_point.y = 128.0;
    intrinsics
}

fn pose(x: f64, yaw: f64) -> WorldToCamera {
    WorldToCamera(IsometryMatrix3::from_parts(
        Translation3::new(x, 0.1, -0.2),
        Rotation3::from_euler_angles(0.02, yaw, -0.01),
    ))
}

fn init() -> (Tracking<u32>, Mapping<String>) {
    let _ = pretty_env_logger::try_init();
    Map::new(MapSettings::default()).split()
}

fn submit(tracking: &Tracking<u32>, pose: WorldToCamera) -> KeyFrameKey {
    let (gray, color) = squares();
    let keyframe = tracking
        .make_keyframe_lite(gray, color, pose, &FastCornerDetector::default())
        .unwrap();
    tracking.submit_keyframe(keyframe)
}

/// The world position at `depth` along the ray through a candidate.
fn candidate_world_position(
    mapping: &Mapping<String>,
    keyframe: KeyFrameKey,
    level: usize,
    candidate: usize,
    depth: f64,
) -> Point3<f64> {
    let keyframe = mapping.map().keyframe(keyframe).unwrap();
    let position = keyframe.candidates(level).unwrap()[candidate].level_position;
    let root = level_zero_position(
        Point2::new(f64::from(position.x), f64::from(position.y)),
        level,
    );
    let plane = camera().unproject(root);
    let camera_point = Point3::new(plane.x * depth, plane.y * depth, depth);
    keyframe.pose().isometry().inverse() * camera_point
}

fn create_point(
    mapping: &mut Mapping<String>,
    keyframe: KeyFrameKey,
    candidate: usize,
    depth: f64,
) -> MapPointKey {
    let position = candidate_world_position(mapping, keyframe, 2, candidate, depth);
    mapping
        .create_point(keyframe, 2, candidate, position, &camera())
        .unwrap()
}

#[test]
fn uniform_image_has_no_features() {
    let (tracking, mapping) = init();
    let gray = GrayImage::from_pixel(64, 48, Luma([128]));
    let color = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));
    let keyframe = tracking
        .make_keyframe_lite(gray, color, pose(0.0, 0.0), &FastCornerDetector::default())
        .unwrap();
    for level in keyframe.levels() {
        assert!(level.corners().is_empty());
        assert!(level.max_corners().is_empty());
        assert_eq!(
            level.corner_row_lut().len(),
            level.image().height() as usize + 1
        );
    }

    let key = tracking.submit_keyframe(keyframe);
    assert_eq!(mapping.try_next_keyframe(), Some(key));
    mapping.make_keyframe_rest(key).unwrap();
    let keyframe = mapping.map().keyframe(key).unwrap();
    for level in 0..LEVELS {
        assert!(keyframe.candidates(level).unwrap().is_empty());
    }
    assert_eq!(keyframe.scene_depth().unwrap(), None);
    let thumbnail = keyframe.rest().unwrap().thumbnail().unwrap();
    assert_eq!((thumbnail.width(), thumbnail.height()), (4, 3));
}

#[test]
fn pyramid_levels_halve() {
    let (tracking, _mapping) = init();
    let (gray, color) = squares();
    let keyframe = tracking
        .make_keyframe_lite(gray, color, pose(0.0, 0.0), &FastCornerDetector::default())
        .unwrap();
    for (level, pyramid_level) in keyframe.levels().iter().enumerate() {
        assert_eq!(pyramid_level.level(), level);
        assert_eq!(pyramid_level.image().width(), SIZE >> level);
        assert!(!pyramid_level.corners().is_empty());
        assert!(!pyramid_level.is_image_plane_cached());
    }
}

#[test]
fn tiny_or_mismatched_images_are_rejected() {
    let (tracking, _mapping) = init();
    let detector = FastCornerDetector::default();
    assert!(matches!(
        tracking.make_keyframe_lite(
            GrayImage::new(7, 100),
            RgbImage::new(7, 100),
            pose(0.0, 0.0),
            &detector
        ),
        Err(cv_map::PyramidError::ImageTooSmall { .. })
    ));
    assert!(matches!(
        tracking.make_keyframe_lite(
            GrayImage::new(64, 64),
            RgbImage::new(32, 32),
            pose(0.0, 0.0),
            &detector
        ),
        Err(cv_map::PyramidError::ColorMismatch { .. })
    ));
}

#[test]
fn rest_data_is_gated() {
    let (tracking, mut mapping) = init();
    let key = submit(&tracking, pose(0.0, 0.0));
    let keyframe = mapping.map().keyframe(key).unwrap();
    assert_eq!(keyframe.state(), KeyFrameState::LiteBuilt);
    assert!(matches!(keyframe.rest(), Err(MapError::NotRestBuilt)));
    assert!(matches!(keyframe.candidates(2), Err(MapError::NotRestBuilt)));
    assert!(matches!(keyframe.scene_depth(), Err(MapError::NotRestBuilt)));
    assert!(matches!(
        mapping.create_point(key, 2, 0, Point3::new(0.0, 0.0, 1.0), &camera()),
        Err(MapError::NotRestBuilt)
    ));
    assert!(matches!(
        mapping.refresh_scene_depth(key),
        Err(MapError::NotRestBuilt)
    ));

    mapping.make_keyframe_rest(key).unwrap();
    assert_eq!(keyframe.state(), KeyFrameState::RestBuilt);
    assert!(!keyframe.candidates(2).unwrap().is_empty());
    assert!(matches!(
        keyframe.candidates(LEVELS),
        Err(MapError::InvalidLevel(_))
    ));
    assert_eq!(
        mapping.make_keyframe_rest(key),
        Err(MapError::AlreadyRestBuilt(key))
    );
}

#[test]
fn level_two_point_has_depth_scaled_orthogonal_pixel_vectors() {
    let (tracking, mut mapping) = init();
    let key = submit(&tracking, pose(0.3, 0.1));
    mapping.make_keyframe_rest(key).unwrap();
    assert!(mapping.map().keyframe(key).unwrap().candidates(2).unwrap().len() >= 2);

    let near = create_point(&mut mapping, key, 0, 2.0);
    let far = create_point(&mut mapping, key, 1, 5.0);
    for (point, depth) in [(near, 2.0), (far, 5.0)] {
        assert!(mapping.refresh_patch_geometry(point).unwrap());
        let patch = mapping.map().point(point).unwrap().patch();
        // One pixel on level 2 spans four level-zero pixels.
        let expected = 4.0 * depth / camera().focals.x;
        assert_relative_eq!(patch.pixel_right().norm(), expected, epsilon = 1e-9);
        assert_relative_eq!(patch.pixel_down().norm(), expected, epsilon = 1e-9);
        assert!(patch.pixel_right().dot(&patch.pixel_down()).abs() < 1e-12);
    }

    let source = *mapping.map().point(near).unwrap().source();
    assert_eq!(source.keyframe, key);
    assert_eq!(source.level, 2);
    let measurement = mapping
        .map()
        .keyframe(key)
        .unwrap()
        .measurement(near)
        .unwrap();
    assert_eq!(measurement.source(), MeasurementSource::Root);
    assert!(measurement.is_subpixel());
    assert_eq!(measurement.root_position(), source.center * 4.0);
}

#[test]
fn duplicate_measurement_replaces() {
    let (tracking, mut mapping) = init();
    let key = submit(&tracking, pose(0.0, 0.0));
    mapping.make_keyframe_rest(key).unwrap();
    let point = create_point(&mut mapping, key, 0, 3.0);

    let (gray, color) = squares();
    let mut keyframe = tracking
        .make_keyframe_lite(gray, color, pose(0.1, 0.0), &FastCornerDetector::default())
        .unwrap();
    let first = Measurement::from_level(0, Point2::new(10.0, 10.0), MeasurementSource::Tracker, false);
    let second = Measurement::from_level(1, Point2::new(6.0, 5.0), MeasurementSource::Tracker, true);
    assert_eq!(tracking.measure(&mut keyframe, point, first), Ok(None));
    assert_eq!(tracking.measure(&mut keyframe, point, second), Ok(Some(first)));
    assert_eq!(keyframe.measurement_count(), 1);
    assert_eq!(keyframe.measurement(point), Some(second));

    let second_key = tracking.submit_keyframe(keyframe);
    let refind = Measurement::from_level(1, Point2::new(6.5, 5.0), MeasurementSource::Refind, true);
    assert_eq!(
        mapping.add_measurement(second_key, point, refind),
        Ok(Some(second))
    );
    let keyframe = mapping.map().keyframe(second_key).unwrap();
    assert_eq!(keyframe.measurement_count(), 1);
    assert_eq!(keyframe.measurement(point), Some(refind));
    assert_eq!(mapping.map().point(point).unwrap().observer_count(), 2);
}

#[test]
fn measurements_outside_the_pyramid_are_rejected() {
    let (tracking, mut mapping) = init();
    let key = submit(&tracking, pose(0.0, 0.0));
    mapping.make_keyframe_rest(key).unwrap();
    let point = create_point(&mut mapping, key, 0, 3.0);

    let (gray, color) = squares();
    let mut keyframe = tracking
        .make_keyframe_lite(gray, color, pose(0.1, 0.0), &FastCornerDetector::default())
        .unwrap();
    for level in [LEVELS, 32, 64] {
        let measurement =
            Measurement::from_level(level, Point2::new(1.0, 1.0), MeasurementSource::Tracker, false);
        assert_eq!(
            tracking.measure(&mut keyframe, point, measurement),
            Err(MapError::InvalidLevel(level))
        );
    }
    assert_eq!(keyframe.measurement_count(), 0);

    let second = tracking.submit_keyframe(keyframe);
    let refind = Measurement::from_root(
        LEVELS,
        Point2::new(20.0, 20.0),
        MeasurementSource::Refind,
        true,
    );
    assert_eq!(
        mapping.add_measurement(second, point, refind),
        Err(MapError::InvalidLevel(LEVELS))
    );
    assert!(!mapping.map().keyframe(second).unwrap().measures(point));
    assert_eq!(mapping.map().point(point).unwrap().observer_count(), 1);
}

#[test]
fn bad_point_survives_until_unreferenced() {
    let (mut tracking, mut mapping) = init();
    let first = submit(&tracking, pose(0.0, 0.0));
    mapping.make_keyframe_rest(first).unwrap();
    let point = create_point(&mut mapping, first, 0, 3.0);
    let position = mapping.map().point(point).unwrap().position();
    tracking.insert_data(point, 7);
    mapping.insert_data(point, "mapper".to_owned());

    let mut observers = vec![first];
    for x in [0.1, 0.2] {
        let (gray, color) = squares();
        let mut keyframe = tracking
            .make_keyframe_lite(gray, color, pose(x, 0.0), &FastCornerDetector::default())
            .unwrap();
        let measurement =
            Measurement::from_level(0, Point2::new(40.0, 40.0), MeasurementSource::Tracker, false);
        tracking.measure(&mut keyframe, point, measurement).unwrap();
        observers.push(tracking.submit_keyframe(keyframe));
    }
    assert_eq!(mapping.map().observers(point).unwrap().len(), 3);

    assert_eq!(tracking.mark_bad(point), Ok(true));
    assert_eq!(mapping.mark_bad(point), Ok(false));
    assert!(matches!(
        mapping.remove_point(point),
        Err(MapError::StillReferenced { observers: 3, .. })
    ));
    assert!(mapping.collect_garbage().is_empty());
    assert_eq!(mapping.map().point(point).unwrap().position(), position);
    assert!(mapping.map().good_points().is_empty());

    for (removed, &keyframe) in observers.iter().enumerate() {
        assert!(mapping.map().is_referenced(point).unwrap());
        assert!(mapping
            .remove_measurement(keyframe, point)
            .unwrap()
            .is_some());
        info!("removed {} of 3 measurements", removed + 1);
    }
    assert!(!mapping.map().is_referenced(point).unwrap());
    assert_eq!(mapping.map().reclaimable_points(), vec![point]);
    assert_eq!(mapping.collect_garbage(), vec![point]);
    assert!(matches!(
        mapping.map().point(point),
        Err(MapError::StaleMapPoint(_))
    ));
    assert!(mapping.data(point).is_none());
    assert_eq!(tracking.prune_data(), 1);
    assert!(tracking.data(point).is_none());
}

#[test]
fn bad_points_cannot_be_measured() {
    let (tracking, mut mapping) = init();
    let key = submit(&tracking, pose(0.0, 0.0));
    mapping.make_keyframe_rest(key).unwrap();
    let point = create_point(&mut mapping, key, 0, 3.0);
    mapping.mark_bad(point).unwrap();

    let (gray, color) = squares();
    let mut keyframe = tracking
        .make_keyframe_lite(gray, color, pose(0.0, 0.0), &FastCornerDetector::default())
        .unwrap();
    let measurement =
        Measurement::from_level(0, Point2::new(1.0, 1.0), MeasurementSource::Tracker, false);
    assert_eq!(
        tracking.measure(&mut keyframe, point, measurement),
        Err(MapError::BadMapPoint(point))
    );
    assert_eq!(
        mapping.add_measurement(key, point, measurement),
        Err(MapError::BadMapPoint(point))
    );
    assert!(matches!(
        mapping.remove_point(point),
        Err(MapError::StillReferenced { observers: 1, .. })
    ));
    assert_eq!(mapping.detach_point(point), Ok(1));
    assert!(mapping.remove_point(point).is_ok());
}

#[test]
fn first_keyframe_is_fixed() {
    let (tracking, mut mapping) = init();
    let first = submit(&tracking, pose(0.0, 0.0));
    let second = submit(&tracking, pose(0.5, 0.0));
    assert!(mapping.map().keyframe(first).unwrap().is_fixed());
    assert!(!mapping.map().keyframe(second).unwrap().is_fixed());
    assert_eq!(
        mapping.set_keyframe_pose(first, pose(1.0, 0.0)),
        Err(MapError::FixedKeyFrame(first))
    );
    assert!(matches!(
        mapping.erase_keyframe(first),
        Err(MapError::FixedKeyFrame(_))
    ));

    mapping.set_keyframe_pose(second, pose(0.7, 0.0)).unwrap();
    let poses = mapping.map().keyframe_poses();
    assert_eq!(poses.len(), 2);
    assert!(poses.contains(&(second, pose(0.7, 0.0))));

    mapping.erase_keyframe(second).unwrap();
    assert_eq!(mapping.map().keyframe_count(), 1);
    assert!(matches!(
        mapping.map().keyframe(second),
        Err(MapError::StaleKeyFrame(_))
    ));
    assert_eq!(mapping.try_next_keyframe(), Some(first));
    assert_eq!(mapping.try_next_keyframe(), Some(second));
    assert_eq!(mapping.try_next_keyframe(), None);
}

#[test]
fn moving_source_keyframe_refreshes_patches() {
    let (tracking, mut mapping) = init();
    let _fixed = submit(&tracking, pose(0.0, 0.0));
    let key = submit(&tracking, pose(0.2, 0.0));
    mapping.make_keyframe_rest(key).unwrap();
    let stable = create_point(&mut mapping, key, 0, 3.0);
    let doomed = create_point(&mut mapping, key, 1, 3.0);
    assert_eq!(mapping.refresh_stale_geometry(), 0);

    // Rotating the keyframe about its own center keeps both points in front of it.
    let turn = IsometryMatrix3::from_parts(
        Translation3::identity(),
        Rotation3::new(Vector3::y() * 0.05),
    );
    let rotated = WorldToCamera(turn * pose(0.2, 0.0).isometry());
    let before = mapping.map().point(stable).unwrap().patch().pixel_right();
    mapping.set_keyframe_pose(key, rotated).unwrap();
    assert!(mapping.has_stale_geometry());
    assert_eq!(mapping.refresh_stale_geometry(), 2);
    assert!(!mapping.has_stale_geometry());
    let after = mapping.map().point(stable).unwrap().patch().pixel_right();
    assert!((before - after).norm() > 1e-6);

    // Pushing one point behind the camera makes it degenerate.
    let behind = rotated.isometry().inverse() * Point3::new(0.0, 0.0, -1.0);
    mapping.set_point_position(doomed, behind).unwrap();
    assert_eq!(mapping.refresh_stale_geometry(), 0);
    assert!(mapping.map().point(doomed).unwrap().is_bad());
    assert!(!mapping.map().point(stable).unwrap().is_bad());
}

#[test]
fn scene_depth_follows_measured_points() {
    let (tracking, mut mapping) = init();
    let first = submit(&tracking, pose(0.0, 0.0));
    mapping.make_keyframe_rest(first).unwrap();
    let near = create_point(&mut mapping, first, 0, 2.0);
    let far = create_point(&mut mapping, first, 1, 4.0);
    assert_eq!(mapping.refresh_scene_depth(first).unwrap().map(|d| d.samples), Some(2));

    let (gray, color) = squares();
    let mut keyframe = tracking
        .make_keyframe_lite(gray, color, pose(0.0, 0.0), &FastCornerDetector::default())
        .unwrap();
    for point in [near, far] {
        let measurement =
            Measurement::from_level(0, Point2::new(5.0, 5.0), MeasurementSource::Tracker, false);
        tracking.measure(&mut keyframe, point, measurement).unwrap();
    }
    let second = tracking.submit_keyframe(keyframe);
    mapping.make_keyframe_rest(second).unwrap();
    let depth = mapping
        .map()
        .keyframe(second)
        .unwrap()
        .scene_depth()
        .unwrap()
        .unwrap();
    assert_eq!(depth.samples, 2);
    assert_relative_eq!(depth.mean, 3.0, epsilon = 1e-9);
    assert_relative_eq!(depth.sigma, 1.0, epsilon = 1e-9);

    mapping.mark_bad(far).unwrap();
    let depth = mapping.refresh_scene_depth(second).unwrap().unwrap();
    assert_eq!(depth.samples, 1);
    assert_relative_eq!(depth.mean, 2.0, epsilon = 1e-9);
}

#[test]
fn measurements_of_reclaimed_points_are_dropped_on_submission() {
    let (tracking, mut mapping) = init();
    let first = submit(&tracking, pose(0.0, 0.0));
    mapping.make_keyframe_rest(first).unwrap();
    let point = create_point(&mut mapping, first, 0, 3.0);

    let (gray, color) = squares();
    let mut keyframe = tracking
        .make_keyframe_lite(gray, color, pose(0.0, 0.0), &FastCornerDetector::default())
        .unwrap();
    let measurement =
        Measurement::from_level(0, Point2::new(5.0, 5.0), MeasurementSource::Tracker, false);
    tracking.measure(&mut keyframe, point, measurement).unwrap();

    mapping.mark_bad(point).unwrap();
    assert_eq!(mapping.handle_bad_points(), vec![point]);

    let second = tracking.submit_keyframe(keyframe);
    assert_eq!(
        mapping.map().keyframe(second).unwrap().measurement_count(),
        0
    );
}

#[test]
fn unreliable_points_are_culled() {
    let (tracking, mut mapping) = init();
    let key = submit(&tracking, pose(0.0, 0.0));
    mapping.make_keyframe_rest(key).unwrap();
    let reliable = create_point(&mut mapping, key, 0, 3.0);
    let unreliable = create_point(&mut mapping, key, 1, 3.0);
    for _ in 0..21 {
        tracking.record_outlier(reliable).unwrap();
        tracking.record_inlier(reliable).unwrap();
        tracking.record_outlier(unreliable).unwrap();
    }
    tracking.record_inlier(unreliable).unwrap();

    assert_eq!(mapping.handle_bad_points(), vec![unreliable]);
    assert!(!mapping.map().point(reliable).unwrap().is_bad());
    assert_eq!(mapping.map().point_count(), 1);
    let statistics = mapping.map().point(reliable).unwrap();
    assert_eq!(
        (statistics.statistics().inliers(), statistics.statistics().outliers()),
        (21, 21)
    );
}

#[test]
fn measured_candidates_are_thinned() {
    let (tracking, mut mapping) = init();
    let key = submit(&tracking, pose(0.0, 0.0));
    mapping.make_keyframe_rest(key).unwrap();
    let all = mapping.unoccupied_candidates(key, 2).unwrap();
    let count = mapping.map().keyframe(key).unwrap().candidates(2).unwrap().len();
    assert_eq!(all, (0..count).collect::<Vec<_>>());

    create_point(&mut mapping, key, 0, 3.0);
    let remaining = mapping.unoccupied_candidates(key, 2).unwrap();
    assert!(!remaining.contains(&0));
    assert!(remaining.len() < count);
}
