use crate::error::OpContext;
use crate::{AggregateScope, Db, Result, StatsOptions, Statistics};
use rusqlite::OptionalExtension;
use time::Date;

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
                [name],
                |r| r.get(0),
            )
            .op("inspect schema")?;
        Ok(cnt > 0)
    }

    pub fn statistics(&self, opts: StatsOptions) -> Result<Statistics> {
        let mut filters = Vec::new();
        if opts.scope == AggregateScope::LatestPartition {
            filters.push("partition_date = (SELECT MAX(partition_date) FROM x_world)");
        }
        let scoped = where_clause(&filters);
        if opts.exclude_unowned {
            filters.push("owner_id <> 0");
        }
        let owned = where_clause(&filters);

        let population: Option<i64> = self
            .conn
            .query_row(&format!("SELECT SUM(population) FROM x_world{scoped}"), [], |r| r.get(0))
            .op("sum population")?;
        let owner_count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(DISTINCT owner_id) FROM x_world{owned}"), [], |r| r.get(0))
            .op("count owners")?;
        let settlement_count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM x_world{scoped}"), [], |r| r.get(0))
            .op("count settlements")?;
        Ok(Statistics { population, owner_count, settlement_count })
    }

    /// Map coordinates of every row in the `date` partition.
    pub fn coordinates(&self, date: Date) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT x, y FROM x_world WHERE partition_date = ?1 ORDER BY record_id")
            .op("query coordinates")?;
        let rows = stmt
            .query_map([date.to_string()], |r| Ok((r.get(0)?, r.get(1)?)))
            .op("query coordinates")?;
        rows.collect::<rusqlite::Result<Vec<_>>>().op("query coordinates")
    }

    pub fn partition_len(&self, date: Date) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM x_world WHERE partition_date = ?1", [date.to_string()], |r| r.get(0))
            .op("count partition")
    }

    /// Stored partition dates, oldest first.
    pub fn partition_dates(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT partition_date FROM x_world WHERE partition_date IS NOT NULL ORDER BY partition_date")
            .op("list partitions")?;
        let rows = stmt.query_map([], |r| r.get(0)).op("list partitions")?;
        rows.collect::<rusqlite::Result<Vec<String>>>().op("list partitions")
    }

    pub fn latest_partition(&self) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT MAX(partition_date) FROM x_world", [], |r| r.get::<_, Option<String>>(0))
            .optional()
            .map(Option::flatten)
            .op("latest partition")
    }
}

fn where_clause(filters: &[&str]) -> String {
    if filters.is_empty() { String::new() } else { format!(" WHERE {}", filters.join(" AND ")) }
}
