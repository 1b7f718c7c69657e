use thiserror::Error;

/// A failed store operation, tagged with what was being attempted.
#[derive(Debug, Error)]
#[error("store {op} failed: {source}")]
pub struct StoreError {
    pub op: &'static str,
    #[source]
    pub source: rusqlite::Error,
}

pub(crate) trait OpContext<T> {
    fn op(self, op: &'static str) -> Result<T, StoreError>;
}

impl<T> OpContext<T> for rusqlite::Result<T> {
    fn op(self, op: &'static str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError { op, source })
    }
}
