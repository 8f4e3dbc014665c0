use sea_orm::{DbErr, RuntimeErr};

pub use deposit_tracker_domain::storage::StorageError;

/// Errors that mean the backend could not be reached at all, as opposed to a
/// query the backend rejected. A socket dropped mid-statement surfaces as an
/// `Exec`/`Query` error wrapping the driver's I/O or pool error.
pub(crate) fn is_connectivity_error(err: &DbErr) -> bool {
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(source))
        | DbErr::Query(RuntimeErr::SqlxError(source)) => matches!(
            source,
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut
        ),
        _ => false,
    }
}
