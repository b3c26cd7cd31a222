/// Errors raised while transforming a single entry.
///
/// These never abort a scan: the runner logs them against the key, counts
/// them, and moves on to the next key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// The value's shape is unsuitable for the active transform.
    #[error("malformed entry: {reason}")]
    Malformed { reason: String },
    /// The transform needs the entry value but none was fetched.
    #[error("transform requires the entry value")]
    MissingValue,
}

impl TransformError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
