//! Repository functions — one function per database operation.
//!
//! Every function takes a `PgExecutor` (the pool, or `&mut *tx` inside a
//! transaction) and returns a `Result<T, DbError>`.
//! No business logic and no domain types.

pub mod instances;
pub mod relations;
pub mod tasks;
pub mod workflows;

/// Map a unique-key violation onto [`crate::DbError::VersionConflict`].
pub(crate) fn conflict_on_unique(
    err: sqlx::Error,
    code: i64,
    expected: Option<i32>,
) -> crate::DbError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            crate::DbError::VersionConflict { code, expected }
        }
        _ => err.into(),
    }
}
