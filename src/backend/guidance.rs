//! Setup guidance for missing storage objects
//!
//! Each engine reports an uninitialized table differently. When one of the
//! known signatures shows up in a local storage error, the message gains
//! the command that provisions the missing table or collection.

use crate::error::MetricsError;
use crate::stats::driver::DEFAULT_TABLE;

/// Lower-cased fragments of "object does not exist" errors
/// (sqlite, mysql, postgres)
pub const MISSING_OBJECT_SIGNATURES: [&str; 3] = ["no such table", "doesn't exist", "relation"];

/// Append a setup command to `err` when it reports a missing table.
///
/// A blank driver name means sqlite; a blank target means the default
/// table. Drivers without a setup step, and errors without a known
/// signature, pass through untouched.
pub fn suggest_setup(err: MetricsError, driver: &str, target: &str) -> MetricsError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if !MISSING_OBJECT_SIGNATURES.iter().any(|s| lower.contains(s)) {
        return err;
    }

    let driver = match driver.trim().to_lowercase().as_str() {
        "" => "sqlite".to_string(),
        "mongodb" => "mongo".to_string(),
        other => other.to_string(),
    };

    match driver.as_str() {
        "sqlite" | "postgres" | "mysql" => {
            let target = match target.trim() {
                "" => DEFAULT_TABLE,
                value => value,
            };
            MetricsError::Storage(format!(
                "{} (run: tally metrics setup --driver {} --table {})",
                message, driver, target
            ))
        }
        "mongo" => MetricsError::Storage(format!(
            "{} (run: tally metrics setup --driver mongo)",
            message
        )),
        _ => err,
    }
}
