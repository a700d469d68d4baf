// Repository layer — each domain lives in its own file with `impl RelayRepository`.
//
// This is the relay's only path to shared mutable state: every mutation is a
// single statement or a short transaction, never a read-then-write across an
// await point in the caller.

use sqlx::sqlite::SqlitePool;

mod accounts;
mod chat;
mod sessions;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use accounts::AuthToken;

#[derive(Clone)]
pub struct RelayRepository {
    pub(crate) pool: SqlitePool,
}

impl RelayRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
