//! Database schema initialization and migrations.

use crate::error::{DatabaseResultExt, EngineError, Result};

impl super::Database {
    /// Initializes the database schema using the embedded SQL file.
    pub(super) fn initialize_schema(&self) -> Result<()> {
        self.connection
            .execute("PRAGMA foreign_keys = ON", [])
            .db_context("Failed to enable foreign keys")?;

        let schema_sql = include_str!("../../../assets/schema.sql");
        self.connection
            .execute_batch(schema_sql)
            .db_context("Failed to initialize database schema")?;

        self.apply_migrations()?;

        Ok(())
    }

    /// Apply migrations for databases created by earlier versions.
    fn apply_migrations(&self) -> Result<()> {
        // Columns added to `steps` after the first release.
        self.add_step_column("abandoned", "INTEGER NOT NULL DEFAULT 0")?;
        self.add_step_column("processing_since", "TEXT")?;
        Ok(())
    }

    fn add_step_column(&self, name: &str, definition: &str) -> Result<()> {
        let exists: bool = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('steps') WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .map(|count: i64| count > 0)
            .unwrap_or(false);

        if !exists {
            self.connection
                .execute(&format!("ALTER TABLE steps ADD COLUMN {name} {definition}"), [])
                .map_err(|e| {
                    EngineError::database(format!("Failed to add {name} column to steps table"))
                        .with_source(e)
                })?;
        }
        Ok(())
    }
}
