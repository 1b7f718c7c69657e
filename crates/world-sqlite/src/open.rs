use crate::error::OpContext;
use crate::Result;
use rusqlite::Connection;

/// Handle on one source's store file. Dropping it closes the connection.
pub struct Db {
    pub conn: Connection,
}

impl Db {
    pub fn open_or_create(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).op("open")?;
        apply_pragmas(&conn).op("apply pragmas")?;
        Ok(Db { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().op("open")?;
        apply_pragmas(&conn).op("apply pragmas")?;
        Ok(Db { conn })
    }
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", -65536i64)?; // 64 MiB
    Ok(())
}
