//! Payload storage.

use jiff::Timestamp;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::{
    error::{DatabaseResultExt, EngineError, Result},
    models::ResultRef,
};

const INSERT_RESULT_SQL: &str = "INSERT INTO results (payload, created_at) VALUES (?1, ?2)";
const SELECT_RESULT_SQL: &str = "SELECT payload FROM results WHERE id = ?1";

const REF_PREFIX: &str = "res-";

impl super::Database {
    pub fn insert_result(&self, payload: &Value) -> Result<ResultRef> {
        let text = serde_json::to_string(payload)?;
        self.connection
            .execute(INSERT_RESULT_SQL, params![text, Timestamp::now().to_string()])
            .db_context("Failed to insert result")?;
        let id = self.connection.last_insert_rowid();
        Ok(ResultRef::new(format!("{REF_PREFIX}{id}")))
    }

    pub fn get_result(&self, reference: &ResultRef) -> Result<Value> {
        let not_found = || EngineError::ResultNotFound {
            reference: reference.to_string(),
        };
        let id: i64 = reference
            .as_str()
            .strip_prefix(REF_PREFIX)
            .and_then(|id| id.parse().ok())
            .ok_or_else(not_found)?;

        let text: Option<String> = self
            .connection
            .query_row(SELECT_RESULT_SQL, params![id], |row| row.get(0))
            .optional()
            .db_context("Failed to query result")?;

        let text = text.ok_or_else(not_found)?;
        Ok(serde_json::from_str(&text)?)
    }
}
