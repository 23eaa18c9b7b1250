// src/db/schema_init.rs
use rusqlite::{Connection, Result as SqlResult};
use std::path::Path;
use tracing::info;

pub struct SchemaInitializer;

impl SchemaInitializer {
    /// Idempotent; safe to run on every start.
    pub fn init(db_conn: &Connection) -> SqlResult<()> {
        info!("Initializing database schema");
        let schema_sql = include_str!("schema.sql");
        db_conn.execute_batch(schema_sql)?;
        info!("Database schema initialized");
        Ok(())
    }

    pub fn open(path: &Path) -> SqlResult<Connection> {
        info!(path = %path.display(), "Opening database");
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(conn)
    }

    pub fn open_in_memory() -> SqlResult<Connection> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let conn = SchemaInitializer::open_in_memory().unwrap();
        SchemaInitializer::init(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users','materials','notifications','bookmarks')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 4);
    }
}
