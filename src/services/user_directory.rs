//! Read-only view of the backing relational store: the system of record for
//! the user population to reconcile. Failure to reach it is fatal to the run
//! (nothing has been dispatched yet).

use crate::error::{Error, Result};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct UserDirectory {
    pool: SqlitePool,
}

impl UserDirectory {
    /// Open the backing store read-only. The database must already exist.
    pub async fn new(database_path: PathBuf) -> Result<Self> {
        if !database_path.is_file() {
            return Err(Error::Config(format!(
                "Backing store not found at {:?}",
                database_path
            )));
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .read_only(true);

        let pool = SqlitePool::connect_with(connect_options).await?;
        info!("Opened backing store (read-only) at: {:?}", database_path);

        Ok(Self { pool })
    }

    /// The full user population in a stable order, so the rotating slice is
    /// deterministic across runs.
    pub async fn list_user_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT id FROM users ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get::<String, _>("id")).collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Deterministic rotating slice of the population: length `len/divisor`
/// starting at offset `len * counter / divisor`. With divisor 1 (or 0) the
/// slice is the whole population.
pub fn rotation_slice<'a>(user_ids: &'a [String], divisor: u32, counter: u32) -> &'a [String] {
    if divisor <= 1 {
        return user_ids;
    }

    let len = user_ids.len() / divisor as usize;
    let start = user_ids.len() * counter as usize / divisor as usize;
    let end = (start + len).min(user_ids.len());
    &user_ids[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn users(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user-{:03}", i)).collect()
    }

    #[test]
    fn test_slice_covers_population_over_full_rotation() {
        let population = users(10);
        let mut seen = HashSet::new();
        for counter in 0..4 {
            for id in rotation_slice(&population, 4, counter) {
                seen.insert(id.clone());
            }
        }
        // len/divisor truncates, so a full rotation covers at least the
        // aligned prefix of every slice start
        assert!(seen.len() >= 8);
    }

    #[test]
    fn test_slice_offsets() {
        let population = users(12);
        assert_eq!(rotation_slice(&population, 4, 0), &population[0..3]);
        assert_eq!(rotation_slice(&population, 4, 1), &population[3..6]);
        assert_eq!(rotation_slice(&population, 4, 3), &population[9..12]);
    }

    #[test]
    fn test_divisor_one_is_whole_population() {
        let population = users(5);
        assert_eq!(rotation_slice(&population, 1, 0), &population[..]);
        assert_eq!(rotation_slice(&population, 0, 0), &population[..]);
    }

    #[test]
    fn test_slice_never_overruns() {
        let population = users(7);
        for counter in 0..3 {
            let slice = rotation_slice(&population, 3, counter);
            assert!(slice.len() <= population.len());
        }
        // Last slice with a ragged population stays in bounds
        assert_eq!(rotation_slice(&population, 3, 2).len(), 2);
    }

    #[test]
    fn test_empty_population() {
        let population: Vec<String> = vec![];
        assert!(rotation_slice(&population, 4, 2).is_empty());
    }

    #[tokio::test]
    async fn test_list_user_ids_reads_backing_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backend.db");

        // Seed a backing store the way the system of record would look
        let seed_pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true),
        )
        .await
        .unwrap();
        sqlx::query("CREATE TABLE users (id TEXT PRIMARY KEY)")
            .execute(&seed_pool)
            .await
            .unwrap();
        for id in ["user-b", "user-a", "user-c"] {
            sqlx::query("INSERT INTO users (id) VALUES (?1)")
                .bind(id)
                .execute(&seed_pool)
                .await
                .unwrap();
        }
        seed_pool.close().await;

        let directory = UserDirectory::new(path).await.unwrap();
        let ids = directory.list_user_ids().await.unwrap();
        assert_eq!(ids, vec!["user-a", "user-b", "user-c"]);
    }

    #[tokio::test]
    async fn test_missing_backing_store_is_fatal() {
        let dir = tempdir().unwrap();
        let err = UserDirectory::new(dir.path().join("missing.db")).await;
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
