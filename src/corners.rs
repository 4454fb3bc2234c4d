use crate::LEVELS;
use cv_core::nalgebra::Point2;
use image::GrayImage;
use imageproc::corners::corners_fast9;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A corner detected on one pyramid level, in level-local pixel coordinates.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub position: Point2<u32>,
    /// The detector's response; higher is more distinctive.
    pub score: f32,
}

impl Corner {
    pub fn new(x: u32, y: u32, score: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            score,
        }
    }
}

/// Produces all corners on one level of an image pyramid.
pub trait CornerDetector {
    /// Detects corners on `image`, which is pyramid level `level`.
    ///
    /// The corners may be returned in any order.
    fn detect(&self, image: &GrayImage, level: usize) -> Vec<Corner>;
}

impl<D> CornerDetector for &D
where
    D: CornerDetector + ?Sized,
{
    fn detect(&self, image: &GrayImage, level: usize) -> Vec<Corner> {
        (**self).detect(image, level)
    }
}

/// FAST-9 corner detection with a separate threshold for every level.
///
/// Different thresholds are used to balance the feature density of the levels.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FastCornerDetector {
    pub thresholds: [u8; LEVELS],
}

impl FastCornerDetector {
    pub fn new(thresholds: [u8; LEVELS]) -> Self {
        Self { thresholds }
    }
}

impl Default for FastCornerDetector {
    fn default() -> Self {
        Self::new(crate::MapSettings::default().fast_thresholds)
    }
}

impl CornerDetector for FastCornerDetector {
    fn detect(&self, image: &GrayImage, level: usize) -> Vec<Corner> {
        let threshold = self.thresholds[level.min(LEVELS - 1)];
        corners_fast9(image, threshold)
            .into_iter()
            .map(|corner| Corner::new(corner.x, corner.y, corner.score))
            .collect()
    }
}

/// Builds the row lookup table for corners sorted by row.
///
/// Entry `y` is the index of the first corner whose row is at least `y`. There is one entry for
/// every row of an image `height` tall, plus a final entry equal to the number of corners, so that
/// the corners of rows `a..b` are always `corners[lut[a]..lut[b]]`.
pub fn corner_row_lut(corners: &[Corner], height: u32) -> Vec<usize> {
    let mut lut = Vec::with_capacity(height as usize + 1);
    let mut ix = 0;
    for y in 0..height {
        while ix < corners.len() && corners[ix].position.y < y {
            ix += 1;
        }
        lut.push(ix);
    }
    lut.push(corners.len());
    lut
}

/// Finds the corners whose score is at least that of all 8 of their neighbours.
///
/// The corners must be sorted by row and `lut` must be their [`corner_row_lut`].
pub fn maximal_corners(corners: &[Corner], lut: &[usize]) -> Vec<Point2<u32>> {
    let rows = lut.len().saturating_sub(1) as u32;
    corners
        .iter()
        .filter(|corner| {
            let (x, y) = (corner.position.x, corner.position.y);
            let first_row = y.saturating_sub(1);
            let end_row = (y + 2).min(rows);
            if first_row >= end_row {
                return true;
            }
            corners[lut[first_row as usize]..lut[end_row as usize]]
                .iter()
                .filter(|other| {
                    other.position != corner.position && x.abs_diff(other.position.x) <= 1
                })
                .all(|other| corner.score >= other.score)
        })
        .map(|corner| corner.position)
        .collect()
}

/// Computes the Shi-Tomasi score (the smaller eigenvalue of the structure tensor) in a box of
/// `2 * half_box + 1` pixels on a side around `center`.
///
/// Returns `None` if the box and its gradient stencil do not fit inside the image.
pub fn shi_tomasi_score(image: &GrayImage, half_box: u32, center: Point2<u32>) -> Option<f64> {
    let reach = half_box + 1;
    if center.x < reach
        || center.y < reach
        || center.x + reach >= image.width()
        || center.y + reach >= image.height()
    {
        return None;
    }
    let pixel = |x: u32, y: u32| f64::from(image.get_pixel(x, y)[0]);
    let (mut xx, mut yy, mut xy) = (0.0, 0.0, 0.0);
    for y in center.y - half_box..=center.y + half_box {
        for x in center.x - half_box..=center.x + half_box {
            let dx = pixel(x + 1, y) - pixel(x - 1, y);
            let dy = pixel(x, y + 1) - pixel(x, y - 1);
            xx += dx * dx;
            yy += dy * dy;
            xy += dx * dy;
        }
    }
    let side = f64::from(2 * half_box + 1);
    let norm = 2.0 * side * side;
    let (xx, yy, xy) = (xx / norm, yy / norm, xy / norm);
    let trace = xx + yy;
    let determinant = xx * yy - xy * xy;
    Some(0.5 * (trace - (trace * trace - 4.0 * determinant).max(0.0).sqrt()))
}
