//! Helpers for working with SQLite through SQLx.

use std::time::Duration;

use sqlx::Error;
use tracing::debug;

/// SQLite extended result codes that indicate a transient lock.
///
/// `SQLITE_BUSY`, `SQLITE_LOCKED`, `SQLITE_BUSY_RECOVERY`, `SQLITE_BUSY_SNAPSHOT`,
/// `SQLITE_BUSY_TIMEOUT`.
const RETRY_ERRORS: &[&str] = &["5", "6", "261", "517", "773"];

/// Give up once the accumulated backoff would exceed this many milliseconds.
const RETRY_TIMEOUT_MS: u64 = 5000;

/// Retries an asynchronous SQLite operation with backoff while the database is busy.
pub(crate) async fn retry_sqlite<F, Fut, T>(operation: F) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if is_retryable_sqlite_error(&err) => {
                let Some(wait_ms) = get_wait_ms_sqlite(attempt, RETRY_TIMEOUT_MS) else {
                    return Err(err);
                };
                debug!("database busy, retrying in {wait_ms}ms (attempt {attempt})");
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Checks if an error is retryable for SQLite.
fn is_retryable_sqlite_error(err: &Error) -> bool {
    matches!(
        err,
        Error::Database(db_err) if db_err
            .code()
            .is_some_and(|code| RETRY_ERRORS.contains(&code.as_ref()))
    )
}

/// Calculates the wait time for retries based on SQLite's own busy-handler schedule.
fn get_wait_ms_sqlite(attempt: usize, timeout: u64) -> Option<u64> {
    const DELAYS: [u64; 12] = [1, 2, 5, 10, 15, 20, 25, 25, 25, 50, 50, 100];
    const TOTALS: [u64; 12] = [0, 1, 3, 8, 18, 33, 53, 78, 103, 128, 178, 228];

    let (delay, prior) = if attempt >= DELAYS.len() {
        let delay = DELAYS[DELAYS.len() - 1];
        let extra = (attempt - (DELAYS.len() - 1)) as u64;
        (delay, TOTALS[TOTALS.len() - 1] + delay * extra)
    } else {
        (DELAYS[attempt], TOTALS[attempt])
    };

    (prior + delay <= timeout).then_some(delay)
}

/// Checks if an error is a unique constraint violation.
pub(crate) fn is_err_unique_violation(err: &Error) -> bool {
    matches!(err, Error::Database(db_err) if db_err.is_unique_violation())
}
