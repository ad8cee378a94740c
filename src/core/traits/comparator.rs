use crate::core::domain::ComparisonConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Comparison {
    pub outputs_differ: bool,
    /// In `[0, 1]`, `1.0` for identical outputs.
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("comparison failed: {reason}")]
pub struct ComparatorError {
    pub reason: String,
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait Comparator: std::fmt::Debug + Send + Sync {
    async fn compare(
        &self,
        first: &[u8],
        second: &[u8],
        config: &ComparisonConfig,
    ) -> Result<Comparison, ComparatorError>;
}
