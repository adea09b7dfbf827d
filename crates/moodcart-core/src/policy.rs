//! Emotion-driven price window derivation.
//!
//! The dominant emotion picks a multiplier bucket; the window's upper bound
//! is the target price scaled by that multiplier and the lower bound is 30%
//! of the upper bound. All arithmetic is integer so the floors are exact.

use crate::types::Emotion;
use serde::Serialize;
use thiserror::Error;

/// Lower bound of a window as a fraction of its upper bound, in tenths.
const FLOOR_RATIO_TENTHS: u128 = 3;

/// Largest accepted target price. Every derived bound stays below `i64::MAX`.
pub const MAX_TARGET_PRICE: u64 = u64::MAX / 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("target price {0} exceeds the maximum of {MAX_TARGET_PRICE}")]
    TargetTooLarge(u64),
}

/// Inclusive price range. Invariant: `min == floor(max * 0.3)`, hence `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceWindow {
    min: u64,
    max: u64,
}

impl PriceWindow {
    /// Window with the given upper bound and the derived lower bound.
    pub fn with_max(max: u64) -> Self {
        // The floor never exceeds `max`, so narrowing back cannot truncate.
        let min = u128::from(max) * FLOOR_RATIO_TENTHS / 10;
        Self {
            min: min as u64,
            max,
        }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Whether a numeric price lies within the window (bounds inclusive).
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min as f64 && price <= self.max as f64
    }
}

/// Emotion buckets sharing a multiplier and rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// sad, angry, fearful
    BudgetSensitive,
    /// surprised, disgusted
    ShockMitigation,
    /// happy
    Premium,
    /// neutral, no detection
    Similar,
}

impl Bucket {
    pub fn for_emotion(emotion: Option<Emotion>) -> Self {
        match emotion {
            Some(Emotion::Sad | Emotion::Angry | Emotion::Fearful) => Bucket::BudgetSensitive,
            Some(Emotion::Surprised | Emotion::Disgusted) => Bucket::ShockMitigation,
            Some(Emotion::Happy) => Bucket::Premium,
            Some(Emotion::Neutral) | None => Bucket::Similar,
        }
    }

    /// Price multiplier in tenths (0.6 → 6).
    fn multiplier_tenths(self) -> u128 {
        match self {
            Bucket::BudgetSensitive => 6,
            Bucket::ShockMitigation => 8,
            Bucket::Premium => 12,
            Bucket::Similar => 10,
        }
    }

    pub fn multiplier(self) -> f64 {
        self.multiplier_tenths() as f64 / 10.0
    }

    /// Whether this bucket narrows the range away from the target price.
    pub fn narrows(self) -> bool {
        self != Bucket::Similar
    }

    fn message(self, max: u64) -> String {
        match self {
            Bucket::BudgetSensitive => format!(
                "I noticed you might be looking for more budget-friendly options. \
                 Here are some great alternatives under ₹{max}:"
            ),
            Bucket::ShockMitigation => {
                format!("Let me show you some better value options under ₹{max}:")
            }
            Bucket::Premium => {
                format!("Great choice! Here are some premium options up to ₹{max} you might love:")
            }
            Bucket::Similar => "Here are some similar products in your price range:".to_string(),
        }
    }
}

/// Output of [`derive`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub bucket: Bucket,
    pub window: PriceWindow,
    pub message: String,
}

/// Map a dominant emotion (or none) and a target price to a price window and rationale.
///
/// Targets above [`MAX_TARGET_PRICE`] are rejected rather than clamped.
pub fn derive(emotion: Option<Emotion>, target_price: u64) -> Result<PolicyDecision, PolicyError> {
    if target_price > MAX_TARGET_PRICE {
        return Err(PolicyError::TargetTooLarge(target_price));
    }
    let bucket = Bucket::for_emotion(emotion);
    let scaled = u128::from(target_price) * bucket.multiplier_tenths() / 10;
    let max = u64::try_from(scaled).map_err(|_| PolicyError::TargetTooLarge(target_price))?;
    let window = PriceWindow::with_max(max);
    Ok(PolicyDecision {
        bucket,
        window,
        message: bucket.message(max),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sad_at_1000() {
        let d = derive(Some(Emotion::Sad), 1000).unwrap();
        assert_eq!((d.window.min(), d.window.max()), (180, 600));
        assert!(d.message.contains("600"));
        assert_eq!(d.bucket, Bucket::BudgetSensitive);
    }

    #[test]
    fn test_happy_at_500() {
        let d = derive(Some(Emotion::Happy), 500).unwrap();
        assert_eq!((d.window.min(), d.window.max()), (180, 600));
        assert!(d.message.contains("600"));
    }

    #[test]
    fn test_neutral_at_1000() {
        let d = derive(Some(Emotion::Neutral), 1000).unwrap();
        assert_eq!((d.window.min(), d.window.max()), (300, 1000));
        assert!(!d.message.contains("1000"));
        assert!(!d.bucket.narrows());
    }

    #[test]
    fn test_no_detection_is_similar_range() {
        assert_eq!(derive(None, 1000), derive(Some(Emotion::Neutral), 1000));
    }

    #[test]
    fn test_shock_bucket() {
        for emotion in [Emotion::Surprised, Emotion::Disgusted] {
            let d = derive(Some(emotion), 999).unwrap();
            assert_eq!(d.window.max(), 799);
            assert_eq!(d.window.min(), 239);
            assert!(d.message.contains("799"));
        }
    }

    #[test]
    fn test_window_formula_holds_for_all_buckets() {
        for emotion in Emotion::CANONICAL {
            let bucket = Bucket::for_emotion(Some(emotion));
            for target in (0..5000u64).step_by(7) {
                let d = derive(Some(emotion), target).unwrap();
                let expected_max = (target as f64 * bucket.multiplier()).floor() as u64;
                assert_eq!(d.window.max(), expected_max, "{emotion} @ {target}");
                assert_eq!(d.window.min(), (d.window.max() as f64 * 0.3).floor() as u64);
                assert!(d.window.min() <= d.window.max());
            }
        }
    }

    #[test]
    fn test_zero_target() {
        let d = derive(Some(Emotion::Happy), 0).unwrap();
        assert_eq!((d.window.min(), d.window.max()), (0, 0));
    }

    #[test]
    fn test_window_contains_inclusive() {
        let w = PriceWindow::with_max(600);
        assert!(w.contains(180.0));
        assert!(w.contains(600.0));
        assert!(!w.contains(600.5));
        assert!(!w.contains(179.99));
    }

    #[test]
    fn test_oversized_target_rejected() {
        for target in [MAX_TARGET_PRICE + 1, u64::MAX / 2, u64::MAX] {
            assert_eq!(
                derive(Some(Emotion::Happy), target),
                Err(PolicyError::TargetTooLarge(target))
            );
        }
    }

    #[test]
    fn test_largest_target_is_exact() {
        let d = derive(Some(Emotion::Happy), MAX_TARGET_PRICE).unwrap();
        assert_eq!(d.window.max(), 1_844_674_407_370_955_161);
        assert_eq!(d.window.min(), 553_402_322_211_286_548);
        assert!(d.window.max() < i64::MAX as u64);
    }

    #[test]
    fn test_with_max_does_not_overflow() {
        let w = PriceWindow::with_max(u64::MAX);
        assert_eq!(w.max(), u64::MAX);
        assert_eq!(w.min(), 5_534_023_222_112_865_484);
    }
}
