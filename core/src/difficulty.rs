use serde::{Deserialize, Serialize};

/// Score at or above which work is sized `challenging`.
pub const CHALLENGING_SCORE_THRESHOLD: f64 = 0.75;
pub const MODERATE_SCORE_THRESHOLD: f64 = 0.55;
pub const COMFORTABLE_SCORE_THRESHOLD: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Easy,
    Comfortable,
    Moderate,
    Challenging,
}

impl ComplexityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityTier::Easy => "easy",
            ComplexityTier::Comfortable => "comfortable",
            ComplexityTier::Moderate => "moderate",
            ComplexityTier::Challenging => "challenging",
        }
    }

    /// Paired time block for the tier.
    pub fn time_block(self) -> TimeBlockTier {
        match self {
            ComplexityTier::Easy => TimeBlockTier::Tiny,
            ComplexityTier::Comfortable => TimeBlockTier::Small,
            ComplexityTier::Moderate => TimeBlockTier::Medium,
            ComplexityTier::Challenging => TimeBlockTier::Large,
        }
    }

    /// Inclusive growth-ratio band `(low, high)` for the tier.
    pub fn growth_band(self) -> (f64, f64) {
        match self {
            ComplexityTier::Easy => (0.10, 0.20),
            ComplexityTier::Comfortable => (0.20, 0.30),
            ComplexityTier::Moderate => (0.30, 0.45),
            ComplexityTier::Challenging => (0.45, 0.50),
        }
    }

    /// Score band `[low, high)` that maps to the tier.
    fn score_band(self) -> (f64, f64) {
        match self {
            ComplexityTier::Easy => (0.0, COMFORTABLE_SCORE_THRESHOLD),
            ComplexityTier::Comfortable => (COMFORTABLE_SCORE_THRESHOLD, MODERATE_SCORE_THRESHOLD),
            ComplexityTier::Moderate => (MODERATE_SCORE_THRESHOLD, CHALLENGING_SCORE_THRESHOLD),
            ComplexityTier::Challenging => (CHALLENGING_SCORE_THRESHOLD, 1.0),
        }
    }

    pub fn from_score(score: f64) -> Self {
        if score >= CHALLENGING_SCORE_THRESHOLD {
            ComplexityTier::Challenging
        } else if score >= MODERATE_SCORE_THRESHOLD {
            ComplexityTier::Moderate
        } else if score >= COMFORTABLE_SCORE_THRESHOLD {
            ComplexityTier::Comfortable
        } else {
            ComplexityTier::Easy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBlockTier {
    Tiny,
    Small,
    Medium,
    Large,
}

impl TimeBlockTier {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeBlockTier::Tiny => "tiny",
            TimeBlockTier::Small => "small",
            TimeBlockTier::Medium => "medium",
            TimeBlockTier::Large => "large",
        }
    }
}

/// Recommended sizing for the next growth task. Always recomputable from
/// snapshot history, so it is never stored as source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyProfile {
    pub performance_score: f64,
    pub complexity_tier: ComplexityTier,
    pub time_block_tier: TimeBlockTier,
    /// Share of the next block spent on growth (vs. comfort) work
    pub growth_ratio: f64,
}

impl DifficultyProfile {
    /// Map a performance score onto its tier row. The growth ratio is
    /// interpolated linearly across the tier's band so that a score at the
    /// top of a band gets the top of its growth range.
    pub fn from_score(score: f64) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let tier = ComplexityTier::from_score(score);
        let (score_low, score_high) = tier.score_band();
        let (growth_low, growth_high) = tier.growth_band();
        let position = ((score - score_low) / (score_high - score_low)).clamp(0.0, 1.0);
        let growth_ratio = growth_low + position * (growth_high - growth_low);

        Self {
            performance_score: score,
            complexity_tier: tier,
            time_block_tier: tier.time_block(),
            growth_ratio,
        }
    }

    /// Fallback used when there is too little history to judge performance.
    pub fn comfortable_default() -> Self {
        let (score_low, score_high) = ComplexityTier::Comfortable.score_band();
        Self::from_score((score_low + score_high) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within(value: f64, (low, high): (f64, f64)) -> bool {
        value >= low - 1e-9 && value <= high + 1e-9
    }

    #[test]
    fn score_of_point_eight_is_challenging_and_large() {
        let profile = DifficultyProfile::from_score(0.80);
        assert_eq!(profile.complexity_tier, ComplexityTier::Challenging);
        assert_eq!(profile.time_block_tier, TimeBlockTier::Large);
        assert!(within(profile.growth_ratio, (0.45, 0.50)));
    }

    #[test]
    fn tier_rows_match_score_bands() {
        let cases = [
            (0.0, ComplexityTier::Easy, TimeBlockTier::Tiny),
            (0.349, ComplexityTier::Easy, TimeBlockTier::Tiny),
            (0.35, ComplexityTier::Comfortable, TimeBlockTier::Small),
            (0.54, ComplexityTier::Comfortable, TimeBlockTier::Small),
            (0.55, ComplexityTier::Moderate, TimeBlockTier::Medium),
            (0.74, ComplexityTier::Moderate, TimeBlockTier::Medium),
            (0.75, ComplexityTier::Challenging, TimeBlockTier::Large),
            (1.0, ComplexityTier::Challenging, TimeBlockTier::Large),
        ];
        for (score, tier, block) in cases {
            let profile = DifficultyProfile::from_score(score);
            assert_eq!(profile.complexity_tier, tier, "score {score}");
            assert_eq!(profile.time_block_tier, block, "score {score}");
            assert!(
                within(profile.growth_ratio, tier.growth_band()),
                "score {score} growth {}",
                profile.growth_ratio
            );
        }
    }

    #[test]
    fn growth_ratio_rises_with_score_inside_a_band() {
        let low = DifficultyProfile::from_score(0.56);
        let high = DifficultyProfile::from_score(0.73);
        assert!(high.growth_ratio > low.growth_ratio);
    }

    #[test]
    fn comfortable_default_sits_in_comfortable_band() {
        let profile = DifficultyProfile::comfortable_default();
        assert_eq!(profile.complexity_tier, ComplexityTier::Comfortable);
        assert_eq!(profile.time_block_tier, TimeBlockTier::Small);
        assert!(within(profile.growth_ratio, (0.20, 0.30)));
    }

    #[test]
    fn non_finite_score_falls_to_easy() {
        let profile = DifficultyProfile::from_score(f64::NAN);
        assert_eq!(profile.complexity_tier, ComplexityTier::Easy);
        assert_eq!(profile.performance_score, 0.0);
    }
}
