//! Plan and step persistence.

use std::collections::BTreeSet;

use jiff::Timestamp;
use rusqlite::{params, types::Type, OptionalExtension};

use crate::{
    error::{DatabaseResultExt, EngineError, OperationError, Result},
    models::{Params, Plan, PlanStep, ResultRef, StepId, StepStatus},
};

const SELECT_PLAN_SQL: &str =
    "SELECT session_id, version, goal, created_at, updated_at FROM plans WHERE session_id = ?1";
const SELECT_PLAN_VERSION_SQL: &str = "SELECT version FROM plans WHERE session_id = ?1";
const INSERT_PLAN_SQL: &str = "INSERT INTO plans (session_id, version, goal, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)";
const UPDATE_PLAN_SQL: &str = "UPDATE plans SET version = ?1, goal = ?2, created_at = ?3, updated_at = ?4 WHERE session_id = ?5 AND version = ?6";
const DELETE_STEPS_SQL: &str = "DELETE FROM steps WHERE session_id = ?1";
const INSERT_STEP_SQL: &str = "INSERT INTO steps (session_id, step_order, id, action, params, status, dependencies, result_ref, error, rate_limited_since, abandoned, processing_since) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";
const SELECT_STEPS_SQL: &str = "SELECT id, action, params, status, dependencies, result_ref, error, rate_limited_since, abandoned, processing_since FROM steps WHERE session_id = ?1 ORDER BY step_order";

fn parse_timestamp(index: usize, value: String) -> rusqlite::Result<Timestamp> {
    value
        .parse::<Timestamp>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(index: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

impl super::Database {
    /// Helper function to construct a PlanStep from a database row
    fn build_step_from_row(row: &rusqlite::Row) -> rusqlite::Result<PlanStep> {
        let status_str: String = row.get(3)?;
        let status = status_str.parse::<StepStatus>().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("Invalid status: {status_str}").into(),
            )
        })?;

        let params: Params = parse_json(2, &row.get::<_, String>(2)?)?;
        let dependencies: BTreeSet<StepId> = parse_json(4, &row.get::<_, String>(4)?)?;
        let error: Option<OperationError> = row
            .get::<_, Option<String>>(6)?
            .map(|text| parse_json(6, &text))
            .transpose()?;
        let rate_limited_since = row
            .get::<_, Option<String>>(7)?
            .map(|text| parse_timestamp(7, text))
            .transpose()?;
        let processing_since = row
            .get::<_, Option<String>>(9)?
            .map(|text| parse_timestamp(9, text))
            .transpose()?;

        Ok(PlanStep {
            id: StepId::new(row.get::<_, String>(0)?),
            action: row.get(1)?,
            params,
            status,
            dependencies,
            result_ref: row.get::<_, Option<String>>(5)?.map(ResultRef::new),
            error,
            rate_limited_since,
            processing_since,
            abandoned: row.get::<_, i64>(8)? != 0,
        })
    }

    /// Loads the plan of a session with its steps in order.
    pub fn load_plan(&self, session_id: &str) -> Result<Option<Plan>> {
        let mut stmt = self
            .connection
            .prepare(SELECT_PLAN_SQL)
            .db_context("Failed to prepare query")?;

        let plan = stmt
            .query_row(params![session_id], |row| {
                Ok(Plan {
                    session_id: row.get(0)?,
                    version: row.get::<_, i64>(1)? as u64,
                    goal: row.get(2)?,
                    steps: Vec::new(),
                    created_at: parse_timestamp(3, row.get(3)?)?,
                    updated_at: parse_timestamp(4, row.get(4)?)?,
                })
            })
            .optional()
            .db_context("Failed to query plan")?;

        let Some(mut plan) = plan else {
            return Ok(None);
        };

        let mut stmt = self
            .connection
            .prepare(SELECT_STEPS_SQL)
            .db_context("Failed to prepare query")?;
        plan.steps = stmt
            .query_map(params![session_id], Self::build_step_from_row)
            .db_context("Failed to query steps")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to read step row")?;

        Ok(Some(plan))
    }

    /// Writes the plan and all its steps in one transaction, if the stored
    /// version still equals `plan.version`. Returns the new version.
    pub fn save_plan(&mut self, plan: &Plan) -> Result<u64> {
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;

        let stored: Option<i64> = tx
            .query_row(SELECT_PLAN_VERSION_SQL, params![&plan.session_id], |row| {
                row.get(0)
            })
            .optional()
            .db_context("Failed to read plan version")?;
        let found = stored.map_or(0, |version| version as u64);

        let conflict = || EngineError::VersionConflict {
            session_id: plan.session_id.clone(),
            expected: plan.version,
            found,
        };
        if found != plan.version {
            return Err(conflict());
        }

        let next = plan.version + 1;
        let created_at = plan.created_at.to_string();
        let updated_at = plan.updated_at.to_string();

        if stored.is_none() {
            tx.execute(
                INSERT_PLAN_SQL,
                params![&plan.session_id, next as i64, plan.goal, created_at, updated_at],
            )
            .db_context("Failed to insert plan")?;
        } else {
            let changed = tx
                .execute(
                    UPDATE_PLAN_SQL,
                    params![
                        next as i64,
                        plan.goal,
                        created_at,
                        updated_at,
                        &plan.session_id,
                        plan.version as i64
                    ],
                )
                .db_context("Failed to update plan")?;
            if changed != 1 {
                return Err(conflict());
            }
        }

        tx.execute(DELETE_STEPS_SQL, params![&plan.session_id])
            .db_context("Failed to delete steps")?;

        for (order, step) in plan.steps.iter().enumerate() {
            let params_json = serde_json::to_string(&step.params)?;
            let dependencies_json = serde_json::to_string(&step.dependencies)?;
            let error_json = step.error.as_ref().map(serde_json::to_string).transpose()?;

            tx.execute(
                INSERT_STEP_SQL,
                params![
                    &plan.session_id,
                    order as i64,
                    step.id.as_str(),
                    &step.action,
                    params_json,
                    step.status.as_str(),
                    dependencies_json,
                    step.result_ref.as_ref().map(ResultRef::as_str),
                    error_json,
                    step.rate_limited_since.map(|t| t.to_string()),
                    i64::from(step.abandoned),
                    step.processing_since.map(|t| t.to_string())
                ],
            )
            .db_context("Failed to insert step")?;
        }

        tx.commit().db_context("Failed to commit transaction")?;
        Ok(next)
    }
}
