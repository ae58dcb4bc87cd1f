/// What to do with a batch after a fail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the batch pending and queue it for another emission.
    Requeue,
    /// Give up on the batch: remove it and resolve its producer with failure.
    Drop,
}

/// The retry policy deciding between requeue and terminal drop when the
/// downstream sink fails a batch.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Number of fail verdicts after which a batch is dropped.
    /// Negative means retry without bound.
    max_failures: i32,
}

impl RetryPolicy {
    pub fn new(max_failures: i32) -> Self {
        Self { max_failures }
    }

    /// Decide for a batch whose failure count, including the fail being
    /// handled right now, is `failure_count`. The comparison is strictly
    /// less-than: reaching the configured maximum is itself the drop
    /// trigger, there is no extra grace attempt.
    pub fn decide(&self, failure_count: i32) -> RetryDecision {
        if self.max_failures < 0 || failure_count < self.max_failures {
            RetryDecision::Requeue
        } else {
            RetryDecision::Drop
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_failures: 5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_max_drops_on_first_fail() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.decide(1), RetryDecision::Drop);
    }

    #[test]
    fn test_reaching_the_maximum_is_the_drop_trigger() {
        let policy = RetryPolicy::new(2);
        assert_eq!(policy.decide(1), RetryDecision::Requeue);
        assert_eq!(policy.decide(2), RetryDecision::Drop);
    }

    #[test]
    fn test_negative_max_means_unlimited() {
        let policy = RetryPolicy::new(-1);
        for count in [1, 10, 1_000, i32::MAX] {
            assert_eq!(policy.decide(count), RetryDecision::Requeue);
        }
    }
}
