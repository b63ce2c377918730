//! Turn history.

use jiff::Timestamp;
use rusqlite::{params, types::Type};

use crate::{
    error::{DatabaseResultExt, Result},
    models::Turn,
};

const INSERT_TURN_SQL: &str =
    "INSERT INTO turns (session_id, input, kind, summary, created_at) VALUES (?1, ?2, ?3, ?4, ?5)";
const SELECT_TURNS_SQL: &str =
    "SELECT session_id, input, kind, summary, created_at FROM turns WHERE session_id = ?1 ORDER BY id";

impl super::Database {
    pub fn insert_turn(&self, turn: &Turn) -> Result<()> {
        self.connection
            .execute(
                INSERT_TURN_SQL,
                params![
                    &turn.session_id,
                    &turn.input,
                    &turn.kind,
                    &turn.summary,
                    turn.created_at.to_string()
                ],
            )
            .db_context("Failed to insert turn")?;
        Ok(())
    }

    pub fn get_turns(&self, session_id: &str) -> Result<Vec<Turn>> {
        let mut stmt = self
            .connection
            .prepare(SELECT_TURNS_SQL)
            .db_context("Failed to prepare query")?;

        let turns = stmt
            .query_map(params![session_id], |row| {
                Ok(Turn {
                    session_id: row.get(0)?,
                    input: row.get(1)?,
                    kind: row.get(2)?,
                    summary: row.get(3)?,
                    created_at: row.get::<_, String>(4)?.parse::<Timestamp>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                    })?,
                })
            })
            .db_context("Failed to query turns")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to read turn row")?;

        Ok(turns)
    }
}
