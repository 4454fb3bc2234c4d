use crate::LEVELS;
use cv_core::nalgebra::Point2;
use image::{GrayImage, Luma};

/// The factor that converts a distance on `level` into a distance on level zero.
///
/// Levels past the pyramid still scale by a power of two rather than overflowing.
pub fn level_scale(level: usize) -> f64 {
    (level as f64).exp2()
}

/// Converts a position on `level` into the coordinates of level zero.
///
/// ```
/// use cv_map::level_zero_position;
/// use cv_map::cv_core::nalgebra::Point2;
///
/// assert_eq!(level_zero_position(Point2::new(3.0, 4.5), 0), Point2::new(3.0, 4.5));
/// assert_eq!(level_zero_position(Point2::new(3.0, 4.5), 2), Point2::new(12.0, 18.0));
/// ```
pub fn level_zero_position(position: Point2<f64>, level: usize) -> Point2<f64> {
    position * level_scale(level)
}

/// Converts a level-zero position into the coordinates of `level`.
pub fn level_position(root_position: Point2<f64>, level: usize) -> Point2<f64> {
    root_position / level_scale(level)
}

/// The smallest side length a level-zero image needs for every level to keep at least one pixel.
pub fn minimum_image_side() -> u32 {
    1 << (LEVELS - 1)
}

/// Halves the resolution of an image by averaging each 2x2 tile.
///
/// Odd trailing rows and columns are dropped.
pub fn half_sample(image: &GrayImage) -> GrayImage {
    let width = image.width() / 2;
    let height = image.height() / 2;
    GrayImage::from_fn(width, height, |x, y| {
        let sum = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .iter()
            .map(|&(dx, dy)| u32::from(image.get_pixel(2 * x + dx, 2 * y + dy)[0]))
            .sum::<u32>();
        Luma([((sum + 2) / 4) as u8])
    })
}
