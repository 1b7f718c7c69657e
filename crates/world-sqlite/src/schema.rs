use crate::error::OpContext;
use crate::{Db, Result};
use worldmap_core::TABLE;

pub const CREATE_X_WORLD: &str = r#"
CREATE TABLE IF NOT EXISTS x_world (
  record_id        INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  world_id         INTEGER NOT NULL DEFAULT 0,
  x                INTEGER NOT NULL DEFAULT 0,
  y                INTEGER NOT NULL DEFAULT 0,
  tile_id          INTEGER NOT NULL DEFAULT 0,
  settlement_id    INTEGER NOT NULL DEFAULT 0,
  settlement_name  TEXT NOT NULL DEFAULT '',
  owner_id         INTEGER NOT NULL DEFAULT 0,
  owner_name       TEXT NOT NULL DEFAULT '',
  group_id         INTEGER NOT NULL DEFAULT 0,
  group_name       TEXT NOT NULL DEFAULT '',
  population       INTEGER NOT NULL DEFAULT 0 CHECK (population >= 0),
  partition_date   TEXT
);

CREATE INDEX IF NOT EXISTS idx_x_world_partition ON x_world(partition_date);
"#;

impl Db {
    /// Create the snapshot table if it is missing. Returns `true` when it was
    /// created by this call.
    pub fn ensure_schema(&self) -> Result<bool> {
        if self.table_exists(TABLE)? {
            return Ok(false);
        }
        self.conn.execute_batch(CREATE_X_WORLD).op("create schema")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_schema_is_idempotent() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.ensure_schema().unwrap());
        assert!(!db.ensure_schema().unwrap());
        assert!(db.table_exists(TABLE).unwrap());
    }

    #[test]
    fn create_statement_tolerates_existing_table() {
        let db = Db::open_in_memory().unwrap();
        db.conn.execute_batch(CREATE_X_WORLD).unwrap();
        db.conn.execute_batch(CREATE_X_WORLD).unwrap();
    }
}
