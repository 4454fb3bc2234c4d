use crate::half_sample;
use derive_more::{AsRef, Deref};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;

type GrayFloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A tiny, blurred, zero-mean copy of a keyframe used by the relocalizer.
///
/// This crate only builds and stores it; comparing thumbnails is up to the relocalizer. The
/// image is reached through `Deref` or `AsRef`.
#[derive(Debug, Clone, AsRef, Deref)]
pub struct Thumbnail {
    image: GrayFloatImage,
}

impl Thumbnail {
    /// Builds a thumbnail from the coarsest pyramid level by halving it once more, blurring it,
    /// and subtracting its mean.
    pub fn from_coarsest_level(coarsest: &GrayImage, blur: f32) -> Self {
        let small = half_sample(coarsest);
        let (width, height) = small.dimensions();
        if width == 0 || height == 0 {
            return Self {
                image: GrayFloatImage::new(width, height),
            };
        }
        let blurred = if blur > 0.0 {
            gaussian_blur_f32(&small, blur)
        } else {
            small
        };
        let mean = blurred.pixels().map(|p| f64::from(p[0])).sum::<f64>()
            / f64::from(width * height);
        let image = GrayFloatImage::from_fn(width, height, |x, y| {
            Luma([(f64::from(blurred.get_pixel(x, y)[0]) - mean) as f32])
        });
        Self { image }
    }
}
