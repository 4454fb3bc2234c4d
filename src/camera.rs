use cv_core::nalgebra::{Point2, Unit, Vector2, Vector3};
use cv_pinhole::CameraIntrinsics;

/// A camera model that converts between level-zero pixel coordinates and the virtual image plane.
///
/// The virtual image plane is the plane at `z = 1.0` in front of the optical center. The X axis
/// points right, the Y axis points down, and the Z axis points forwards, for both the pixel
/// coordinates and the camera frame.
pub trait Camera {
    /// Converts a pixel position on pyramid level zero into a point on the virtual image plane.
    fn unproject(&self, pixel: Point2<f64>) -> Point2<f64>;

    /// Converts a point on the virtual image plane into a pixel position on pyramid level zero.
    fn project(&self, plane: Point2<f64>) -> Point2<f64>;

    /// Retrieves the unit bearing out of the optical center through the given level-zero pixel.
    fn bearing(&self, pixel: Point2<f64>) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.unproject(pixel).coords.push(1.0))
    }
}

impl<C> Camera for &C
where
    C: Camera + ?Sized,
{
    fn unproject(&self, pixel: Point2<f64>) -> Point2<f64> {
        (**self).unproject(pixel)
    }

    fn project(&self, plane: Point2<f64>) -> Point2<f64> {
        (**self).project(plane)
    }
}

/// The pinhole intrinsics are used directly without distortion correction.
impl Camera for CameraIntrinsics {
    fn unproject(&self, pixel: Point2<f64>) -> Point2<f64> {
        let centered = Vector2::new(
            pixel.x - self.principal_point.x,
            pixel.y - self.principal_point.y,
        );
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        Point2::new(x, y)
    }

    fn project(&self, plane: Point2<f64>) -> Point2<f64> {
        let y = plane.y * self.focals.y;
        let x = plane.x * self.focals.x + self.skew * plane.y;
        Point2::new(x + self.principal_point.x, y + self.principal_point.y)
    }
}
