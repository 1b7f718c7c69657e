use crate::error::OpContext;
use crate::{Db, LoadSummary, Result};
use rusqlite::{params, Connection};
use time::Date;
use worldmap_core::SnapshotRow;

const DELETE_PARTITION: &str = "DELETE FROM x_world WHERE partition_date = ?1";
const STAMP_UNBOUND: &str = "UPDATE x_world SET partition_date = ?1 WHERE partition_date IS NULL";
const INSERT_ROW: &str = "INSERT INTO x_world(world_id,x,y,tile_id,settlement_id,settlement_name,owner_id,owner_name,group_id,group_name,population) VALUES (?,?,?,?,?,?,?,?,?,?,?)";

impl Db {
    /// Delete every row of `date`. A date with no rows is a no-op.
    pub fn replace_partition(&self, date: Date) -> Result<usize> {
        self.conn.execute(DELETE_PARTITION, [date.to_string()]).op("clear partition")
    }

    /// Give `date` to every row that has no partition date yet.
    pub fn stamp_unbound_rows(&self, date: Date) -> Result<usize> {
        self.conn.execute(STAMP_UNBOUND, [date.to_string()]).op("stamp partition")
    }

    /// Insert rows without a partition date; callers stamp them afterwards.
    pub fn insert_rows(&self, rows: &[SnapshotRow]) -> Result<usize> {
        insert_all(&self.conn, rows).op("insert rows")
    }

    /// Replace the partition for `date` with `rows`: clear, insert, stamp.
    /// Runs in one transaction, so a failure leaves the previous partition intact.
    pub fn load_partition(&mut self, date: Date, rows: &[SnapshotRow]) -> Result<LoadSummary> {
        let key = date.to_string();
        let tx = self.conn.transaction().op("begin load")?;
        let removed = tx.execute(DELETE_PARTITION, [&key]).op("clear partition")?;
        let inserted = insert_all(&tx, rows).op("insert rows")?;
        let stamped = tx.execute(STAMP_UNBOUND, [&key]).op("stamp partition")?;
        tx.commit().op("commit load")?;
        Ok(LoadSummary { removed, inserted, stamped })
    }
}

fn insert_all(conn: &Connection, rows: &[SnapshotRow]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(INSERT_ROW)?;
    for r in rows {
        stmt.execute(params![
            r.world_id, r.x, r.y, r.tile_id, r.settlement_id, r.settlement_name,
            r.owner_id, r.owner_name, r.group_id, r.group_name, r.population
        ])?;
    }
    Ok(rows.len())
}
