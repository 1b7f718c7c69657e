use serde::{Deserialize, Serialize};

/// Which rows the aggregate statistics cover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateScope {
    /// Every row in the table, across all retained partition dates.
    #[default]
    #[serde(rename = "all")]
    AllTime,
    /// Only rows of the most recent partition date.
    #[serde(rename = "latest")]
    LatestPartition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct StatsOptions {
    #[serde(default)]
    pub scope: AggregateScope,
    /// Leave owner id 0 ("no owner") out of `owner_count`.
    #[serde(default)]
    pub exclude_unowned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// `None` when no row is in scope.
    pub population: Option<i64>,
    pub owner_count: i64,
    pub settlement_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Rows of the same date removed before inserting.
    pub removed: usize,
    pub inserted: usize,
    pub stamped: usize,
}
