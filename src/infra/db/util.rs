use crate::application::repos::{ConnectionError, RepoError};
use crate::domain::indicators::DataSource;

/// SQLSTATE classes that mean the server could not be used at all.
const UNREACHABLE_STATES: &[&str] = &[
    "08000", "08001", "08003", "08004", "08006", // connection exception
    "28000", "28P01", // invalid authorization / password
    "3D000", // unknown database
    "57P01", "57P02", "57P03", // server shutting down or starting up
];

pub fn map_sqlx_error(source: DataSource, err: sqlx::Error) -> RepoError {
    let name = source.label();
    match err {
        sqlx::Error::PoolTimedOut => ConnectionError::Timeout { name }.into(),
        sqlx::Error::PoolClosed => ConnectionError::Unreachable {
            name,
            message: "connection pool is closed".to_string(),
        }
        .into(),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Configuration(_) => {
            ConnectionError::Unreachable {
                name,
                message: err.to_string(),
            }
            .into()
        }
        sqlx::Error::Database(db)
            if db
                .code()
                .is_some_and(|code| UNREACHABLE_STATES.contains(&code.as_ref())) =>
        {
            ConnectionError::Unreachable {
                name,
                message: db.message().to_string(),
            }
            .into()
        }
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => RepoError::Schema(err.to_string()),
        other => RepoError::from_query(other),
    }
}
