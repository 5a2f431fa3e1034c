pub mod bookings;
pub mod chats;
pub mod files;
pub mod item_types;
pub mod payments;
pub mod posts;
pub mod storage;
pub mod teams;
pub mod users;

/// True when the failure is a Postgres unique-constraint violation.
pub fn is_unique_violation(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(db)) if db.is_unique_violation()
    )
}
