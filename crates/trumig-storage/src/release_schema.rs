use crate::{META_TABLE, VERSION_KEY};
use rusqlite::{params, Connection};

/// Table layout written by the oldest release the engine can migrate.
pub const V0_1_2_SCHEMA: &str = include_str!("../schema/v0_1_2.sql");

pub fn create_v0_1_2(conn: &Connection, version: &str) -> Result<(), rusqlite::Error> {
    conn.execute_batch(V0_1_2_SCHEMA)?;
    conn.execute(
        &format!("INSERT OR REPLACE INTO {META_TABLE} (key, value) VALUES (?1, ?2)"),
        params![VERSION_KEY, version],
    )?;
    Ok(())
}
