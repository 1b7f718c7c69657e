use serde::{Deserialize, Serialize};

/// Destination table inside each per-source store.
pub const TABLE: &str = "x_world";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Text,
}

/// Positional layout of a dump row. `partition_date` is stamped separately and
/// is not part of it.
pub const COLUMNS: [(&str, ColumnKind); 11] = [
    ("world_id", ColumnKind::Integer),
    ("x", ColumnKind::Integer),
    ("y", ColumnKind::Integer),
    ("tile_id", ColumnKind::Integer),
    ("settlement_id", ColumnKind::Integer),
    ("settlement_name", ColumnKind::Text),
    ("owner_id", ColumnKind::Integer),
    ("owner_name", ColumnKind::Text),
    ("group_id", ColumnKind::Integer),
    ("group_name", ColumnKind::Text),
    ("population", ColumnKind::Integer),
];

/// One settlement row of a snapshot, in `COLUMNS` order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub world_id: i64,
    pub x: i64,
    pub y: i64,
    pub tile_id: i64,
    pub settlement_id: i64,
    pub settlement_name: String,
    pub owner_id: i64,
    pub owner_name: String,
    pub group_id: i64,
    pub group_name: String,
    pub population: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_are_unique() {
        let mut names: Vec<_> = COLUMNS.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), COLUMNS.len());
    }

    #[test]
    fn text_columns_are_the_three_names() {
        let text: Vec<_> = COLUMNS.iter().filter(|(_, k)| *k == ColumnKind::Text).map(|(n, _)| *n).collect();
        assert_eq!(text, ["settlement_name", "owner_name", "group_name"]);
    }
}
