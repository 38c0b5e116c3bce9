use crate::models::{Method, ReviewTier};

/// Confidence at which direct SC mappings and keyword rules are trusted
/// regardless of the configured high threshold.
const TRUSTED_METHOD_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high: f64,
    pub medium: f64,
}

pub fn assign(method: Method, confidence: f64, thresholds: Thresholds) -> ReviewTier {
    let trusted_method = matches!(method, Method::ScCodeMapping | Method::Rule);
    if (trusted_method && confidence >= TRUSTED_METHOD_CONFIDENCE) || confidence >= thresholds.high {
        ReviewTier::AutoAccept
    } else if confidence >= thresholds.medium {
        ReviewTier::QuickReview
    } else {
        ReviewTier::ManualReview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Thresholds = Thresholds {
        high: 0.95,
        medium: 0.75,
    };

    #[test]
    fn test_trusted_method_shortcut() {
        assert_eq!(assign(Method::Rule, 0.92, T), ReviewTier::AutoAccept);
        assert_eq!(assign(Method::ScCodeMapping, 0.9, T), ReviewTier::AutoAccept);
    }

    #[test]
    fn test_other_methods_need_high_threshold() {
        assert_eq!(assign(Method::SupplierRefinement, 0.92, T), ReviewTier::QuickReview);
        assert_eq!(assign(Method::SupplierRefinement, 0.95, T), ReviewTier::AutoAccept);
        assert_eq!(assign(Method::SupplierOverride, 0.97, T), ReviewTier::AutoAccept);
    }

    #[test]
    fn test_medium_band() {
        assert_eq!(assign(Method::ScCodeMappingAmbiguous, 0.75, T), ReviewTier::QuickReview);
        assert_eq!(assign(Method::Rule, 0.89, T), ReviewTier::QuickReview);
    }

    #[test]
    fn test_manual_review() {
        assert_eq!(assign(Method::ContextRefinement, 0.6, T), ReviewTier::ManualReview);
        assert_eq!(assign(Method::Unmapped, 0.0, T), ReviewTier::ManualReview);
    }

    #[test]
    fn test_thresholds_are_not_hardcoded() {
        let lenient = Thresholds {
            high: 0.5,
            medium: 0.2,
        };
        assert_eq!(assign(Method::CostCenterRefinement, 0.6, lenient), ReviewTier::AutoAccept);
        assert_eq!(assign(Method::CostCenterRefinement, 0.3, lenient), ReviewTier::QuickReview);
    }
}
