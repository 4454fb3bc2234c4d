use crate::LEVELS;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// What to do when a pyramid level produces more corners than the budget allows.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Report [`PyramidError::CornerOverflow`](crate::PyramidError::CornerOverflow) to the caller.
    Fail,
    /// Keep only the strongest corners, producing a degraded level.
    KeepStrongest,
}

/// The settings for building keyframes and maintaining the map.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone)]
pub struct MapSettings {
    /// The FAST threshold used on each pyramid level
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_fast_thresholds")
    )]
    pub fast_thresholds: [u8; LEVELS],
    /// The maximum number of corners kept on a single pyramid level
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_corners_per_level")
    )]
    pub max_corners_per_level: usize,
    /// What happens when a level exceeds `max_corners_per_level`
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_overflow_policy")
    )]
    pub overflow_policy: OverflowPolicy,
    /// The Shi-Tomasi score a maximal corner must exceed to become a candidate
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_candidate_min_shi_tomasi_score")
    )]
    pub candidate_min_shi_tomasi_score: f64,
    /// The distance in pixels a candidate must keep from the level image border
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_candidate_border")
    )]
    pub candidate_border: u32,
    /// The half size of the box the Shi-Tomasi score is computed over
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_shi_tomasi_half_box")
    )]
    pub shi_tomasi_half_box: u32,
    /// The lowest pyramid level that nominates candidates
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_candidate_min_level")
    )]
    pub candidate_min_level: usize,
    /// Whether the expensive phase produces a thumbnail for relocalization
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_make_thumbnail"))]
    pub make_thumbnail: bool,
    /// The Gaussian sigma used to blur the thumbnail
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_thumbnail_blur"))]
    pub thumbnail_blur: f32,
    /// The outlier count a point must exceed before robust statistics can cull it
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_outlier_cull_minimum")
    )]
    pub outlier_cull_minimum: u32,
    /// The distance in level pixels a candidate must keep from existing measurements to be offered
    /// for point creation
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_candidate_min_separation")
    )]
    pub candidate_min_separation: f64,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            fast_thresholds: default_fast_thresholds(),
            max_corners_per_level: default_max_corners_per_level(),
            overflow_policy: default_overflow_policy(),
            candidate_min_shi_tomasi_score: default_candidate_min_shi_tomasi_score(),
            candidate_border: default_candidate_border(),
            shi_tomasi_half_box: default_shi_tomasi_half_box(),
            candidate_min_level: default_candidate_min_level(),
            make_thumbnail: default_make_thumbnail(),
            thumbnail_blur: default_thumbnail_blur(),
            outlier_cull_minimum: default_outlier_cull_minimum(),
            candidate_min_separation: default_candidate_min_separation(),
        }
    }
}

impl MapSettings {
    /// Set the per-level FAST thresholds.
    pub fn fast_thresholds(self, fast_thresholds: [u8; LEVELS]) -> Self {
        Self {
            fast_thresholds,
            ..self
        }
    }

    /// Set the corner budget of each level.
    pub fn max_corners_per_level(self, max_corners_per_level: usize) -> Self {
        Self {
            max_corners_per_level,
            ..self
        }
    }

    /// Set the policy applied when a level exceeds its corner budget.
    pub fn overflow_policy(self, overflow_policy: OverflowPolicy) -> Self {
        Self {
            overflow_policy,
            ..self
        }
    }

    /// Set the minimum Shi-Tomasi score of a candidate.
    pub fn candidate_min_shi_tomasi_score(self, candidate_min_shi_tomasi_score: f64) -> Self {
        Self {
            candidate_min_shi_tomasi_score,
            ..self
        }
    }

    /// Set the lowest level that nominates candidates.
    pub fn candidate_min_level(self, candidate_min_level: usize) -> Self {
        Self {
            candidate_min_level,
            ..self
        }
    }

    /// Enable or disable thumbnail generation.
    pub fn make_thumbnail(self, make_thumbnail: bool) -> Self {
        Self {
            make_thumbnail,
            ..self
        }
    }
}

fn default_fast_thresholds() -> [u8; LEVELS] {
    [10, 15, 15, 10]
}

fn default_max_corners_per_level() -> usize {
    16384
}

fn default_overflow_policy() -> OverflowPolicy {
    OverflowPolicy::Fail
}

fn default_candidate_min_shi_tomasi_score() -> f64 {
    70.0
}

fn default_candidate_border() -> u32 {
    10
}

fn default_shi_tomasi_half_box() -> u32 {
    3
}

fn default_candidate_min_level() -> usize {
    0
}

fn default_make_thumbnail() -> bool {
    true
}

fn default_thumbnail_blur() -> f32 {
    2.5
}

fn default_outlier_cull_minimum() -> u32 {
    20
}

fn default_candidate_min_separation() -> f64 {
    10.0
}
