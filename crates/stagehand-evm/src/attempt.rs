//! Progress reporting and failure attribution for named steps.

use crate::error::StageError;
use tracing::{error, info};

/// Runs one named step, emitting a progress line before and after.
///
/// On failure the step name is attached to the error, so reports can say
/// which step broke without walking a backtrace. A failed step is never
/// retried; callers decide whether to keep going.
pub fn attempt<T>(
    step: &str,
    run: impl FnOnce() -> Result<T, StageError>,
) -> Result<T, StageError> {
    info!("{step}...");
    match run() {
        Ok(value) => {
            info!("{step}... done");
            Ok(value)
        }
        Err(source) => {
            error!("{step}... failed: {source}");
            Err(StageError::Step { step: step.to_string(), source: Box::new(source) })
        }
    }
}
