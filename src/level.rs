use crate::{
    corner_row_lut, level_zero_position, maximal_corners, shi_tomasi_score, Camera, Corner,
    CornerDetector, MapSettings, OverflowPolicy, PyramidError,
};
use cv_core::nalgebra::Point2;
use float_ord::FloatOrd;
use image::{GrayImage, RgbImage};
use log::*;
use std::borrow::Cow;
use std::ops::Range;
use std::sync::OnceLock;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A maximal corner nominated as raw material for a new map point.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// The position on the candidate's pyramid level.
    pub level_position: Point2<u32>,
    /// The Shi-Tomasi score at the position; higher is more salient.
    pub shi_tomasi_score: f64,
    /// The color sampled from the keyframe's color image.
    pub color: [u8; 3],
}

/// Corners unprojected onto the `z = 1` plane by one camera.
#[derive(Debug, Clone)]
struct ImagePlaneCorners {
    /// Where the camera puts a few reference pixels, so another camera can be told apart.
    fingerprint: [Point2<f64>; 3],
    corners: Vec<Point2<f64>>,
}

fn camera_fingerprint(camera: &impl Camera) -> [Point2<f64>; 3] {
    [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)].map(|(x, y)| camera.unproject(Point2::new(x, y)))
}

/// One level of a keyframe's image pyramid and the corners detected on it.
#[derive(Debug, Clone, Default)]
pub struct PyramidLevel {
    level: usize,
    image: GrayImage,
    /// Sorted by row, then column.
    corners: Vec<Corner>,
    corner_row_lut: Vec<usize>,
    max_corners: Vec<Point2<u32>>,
    /// Corners unprojected onto the `z = 1` plane; empty until first requested.
    image_plane_corners: OnceLock<ImagePlaneCorners>,
}

impl PyramidLevel {
    /// Creates a level from an image and the corners detected on it.
    pub fn from_corners(level: usize, image: GrayImage, corners: Vec<Corner>) -> Self {
        let mut this = Self {
            level,
            image,
            ..Default::default()
        };
        this.set_corners(corners);
        this
    }

    /// Runs the corner detector on `image` and builds the level, enforcing the corner budget.
    pub fn detect(
        level: usize,
        image: GrayImage,
        detector: &impl CornerDetector,
        settings: &MapSettings,
    ) -> Result<Self, PyramidError> {
        let mut corners = detector.detect(&image, level);
        let limit = settings.max_corners_per_level;
        if corners.len() > limit {
            match settings.overflow_policy {
                OverflowPolicy::Fail => {
                    return Err(PyramidError::CornerOverflow {
                        level,
                        count: corners.len(),
                        limit,
                    })
                }
                OverflowPolicy::KeepStrongest => {
                    warn!(
                        "level {} produced {} corners, keeping the strongest {}",
                        level,
                        corners.len(),
                        limit
                    );
                    corners.sort_unstable_by_key(|corner| std::cmp::Reverse(FloatOrd(corner.score)));
                    corners.truncate(limit);
                }
            }
        }
        trace!(
            "level {} is {}x{} with {} corners",
            level,
            image.width(),
            image.height(),
            corners.len()
        );
        Ok(Self::from_corners(level, image, corners))
    }

    /// Replaces the corners of this level.
    ///
    /// The row lookup table and maximal corners are rebuilt and the image-plane cache is dropped.
    pub fn set_corners(&mut self, mut corners: Vec<Corner>) {
        corners.sort_by_key(|corner| (corner.position.y, corner.position.x));
        corners.dedup_by_key(|corner| corner.position);
        self.corner_row_lut = corner_row_lut(&corners, self.image.height());
        self.max_corners = maximal_corners(&corners, &self.corner_row_lut);
        self.corners = corners;
        self.image_plane_corners = OnceLock::new();
    }

    /// The index of this level in the pyramid; zero is full resolution.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// All corners on the level, sorted by row and then column.
    pub fn corners(&self) -> &[Corner] {
        &self.corners
    }

    pub fn corner_positions(&self) -> impl Iterator<Item = Point2<u32>> + Clone + '_ {
        self.corners.iter().map(|corner| corner.position)
    }

    /// See [`corner_row_lut`](crate::corner_row_lut).
    pub fn corner_row_lut(&self) -> &[usize] {
        &self.corner_row_lut
    }

    /// The corners that survived non-maximum suppression.
    pub fn max_corners(&self) -> &[Point2<u32>] {
        &self.max_corners
    }

    /// Retrieves the corners whose row lies in `rows`.
    pub fn corners_in_rows(&self, rows: Range<u32>) -> &[Corner] {
        let last = self.corner_row_lut.len().saturating_sub(1);
        let start = (rows.start as usize).min(last);
        let end = (rows.end as usize).min(last).max(start);
        &self.corners[self.corner_row_lut[start]..self.corner_row_lut[end]]
    }

    /// Whether the image-plane projections of the corners have been computed.
    pub fn is_image_plane_cached(&self) -> bool {
        self.image_plane_corners.get().is_some()
    }

    /// Retrieves every corner unprojected onto the `z = 1` plane, in corner order.
    ///
    /// The result for the first camera is cached until the corners change. A camera that
    /// unprojects differently gets freshly computed corners and leaves the cache alone.
    pub fn image_plane_corners(&self, camera: &impl Camera) -> Cow<'_, [Point2<f64>]> {
        let fingerprint = camera_fingerprint(camera);
        let cached = self.image_plane_corners.get_or_init(|| ImagePlaneCorners {
            fingerprint,
            corners: self.unproject_corners(camera),
        });
        if cached.fingerprint == fingerprint {
            Cow::Borrowed(&cached.corners)
        } else {
            trace!("level {} unprojected with an uncached camera", self.level);
            Cow::Owned(self.unproject_corners(camera))
        }
    }

    fn unproject_corners(&self, camera: &impl Camera) -> Vec<Point2<f64>> {
        self.corners
            .iter()
            .map(|corner| {
                let position =
                    Point2::new(f64::from(corner.position.x), f64::from(corner.position.y));
                camera.unproject(level_zero_position(position, self.level))
            })
            .collect()
    }

    /// Scores the maximal corners and keeps the salient ones away from the border as candidates.
    pub(crate) fn find_candidates(&self, color: &RgbImage, settings: &MapSettings) -> Vec<Candidate> {
        if self.level < settings.candidate_min_level {
            return vec![];
        }
        let border = settings.candidate_border;
        let (width, height) = self.image.dimensions();
        self.max_corners
            .iter()
            .filter(|position| {
                position.x >= border
                    && position.y >= border
                    && position.x + border < width
                    && position.y + border < height
            })
            .filter_map(|&position| {
                let score = shi_tomasi_score(&self.image, settings.shi_tomasi_half_box, position)?;
                (score > settings.candidate_min_shi_tomasi_score).then(|| Candidate {
                    level_position: position,
                    shi_tomasi_score: score,
                    color: sample_color(color, position, self.level),
                })
            })
            .collect()
    }
}

/// Reads the color image at the level-zero position of a level pixel.
fn sample_color(color: &RgbImage, position: Point2<u32>, level: usize) -> [u8; 3] {
    if color.width() == 0 || color.height() == 0 {
        return [0; 3];
    }
    let x = (position.x << level).min(color.width() - 1);
    let y = (position.y << level).min(color.height() - 1);
    color.get_pixel(x, y).0
}
