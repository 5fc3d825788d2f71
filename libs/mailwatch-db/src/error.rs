use thiserror::Error;

/// Failures surfaced by the summary store.
///
/// Nothing here is retried locally; the scheduler re-invokes on a later cycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to write {what}: {source}")]
    Write {
        what: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("transaction aborted during {stage}: {source}")]
    TransactionAbort {
        stage: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("stored slot label {label:?} is not a month start or the thirty-day label")]
    CorruptLabel { label: String },
}

impl StoreError {
    pub fn read(what: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| StoreError::Read { what, source }
    }

    pub fn write(what: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| StoreError::Write { what, source }
    }

    pub fn abort(stage: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| StoreError::TransactionAbort { stage, source }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, StoreError::Read { .. } | StoreError::CorruptLabel { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(self, StoreError::Write { .. })
    }
}
