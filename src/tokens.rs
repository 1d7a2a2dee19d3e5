//! Token cost estimation for rendered text.
//!
//! The estimate only has to be deterministic and grow with the text; the
//! strategy is pluggable through `TokenEstimator`.

/// Estimates how many tokens the embedding service will charge for a text
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Counts whitespace-separated words
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceEstimator;

impl TokenEstimator for WhitespaceEstimator {
    fn estimate(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        if words == 0 && !text.is_empty() {
            1
        } else {
            words
        }
    }
}

/// Approximates tokens as a fixed number of characters each
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    pub chars_per_token: usize,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        // Rule of thumb for English text with BPE tokenizers
        Self { chars_per_token: 4 }
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        let ratio = self.chars_per_token.max(1);
        text.chars().count().div_ceil(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_estimator() {
        let estimator = WhitespaceEstimator;
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("   "), 1);
        assert_eq!(estimator.estimate("one"), 1);
        assert_eq!(estimator.estimate("long long,  long\nlong"), 4);
    }

    #[test]
    fn test_char_ratio_estimator() {
        let estimator = CharRatioEstimator::default();
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("abc"), 1);
        assert_eq!(estimator.estimate("abcd"), 1);
        assert_eq!(estimator.estimate("abcde"), 2);

        let zero = CharRatioEstimator { chars_per_token: 0 };
        assert_eq!(zero.estimate("abc"), 3);
    }

    #[test]
    fn test_estimators_are_monotonic() {
        let mut text = String::new();
        let mut last = (0, 0);
        for _ in 0..20 {
            text.push_str("word ");
            let now = (
                WhitespaceEstimator.estimate(&text),
                CharRatioEstimator::default().estimate(&text),
            );
            assert!(now.0 >= last.0);
            assert!(now.1 >= last.1);
            last = now;
        }
    }
}
