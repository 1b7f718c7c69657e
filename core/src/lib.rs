//! Core types shared by the fetch, parse, store and render stages.

pub mod context;
pub mod record;

pub use context::{parse_date, today, RunContext, Source};
pub use record::{ColumnKind, SnapshotRow, COLUMNS, TABLE};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
