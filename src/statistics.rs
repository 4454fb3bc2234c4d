use std::sync::atomic::{AtomicU32, Ordering};

/// Inlier and outlier tallies accumulated by the tracker's robust pose estimator.
///
/// Only the tracker increments these; the mapper reads them to decide whether a point is
/// unreliable enough to cull.
#[derive(Debug, Default)]
pub struct RobustStatistics {
    inliers: AtomicU32,
    outliers: AtomicU32,
}

impl RobustStatistics {
    pub fn inliers(&self) -> u32 {
        self.inliers.load(Ordering::Relaxed)
    }

    pub fn outliers(&self) -> u32 {
        self.outliers.load(Ordering::Relaxed)
    }

    /// A point is unreliable once it has more than `minimum` outliers and more outliers than inliers.
    pub fn is_unreliable(&self, minimum: u32) -> bool {
        let outliers = self.outliers();
        outliers > minimum && outliers > self.inliers()
    }

    pub(crate) fn record_inlier(&self) {
        self.inliers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outlier(&self) {
        self.outliers.fetch_add(1, Ordering::Relaxed);
    }
}
