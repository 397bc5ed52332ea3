use serde::{Deserialize, Serialize};

/// Persisted batch partition state for the rotating user slice.
///
/// Advanced `(counter + 1) % divisor` inside a single store transaction at
/// run start, so a crash mid-run does not re-process the same slice on the
/// next scheduled invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatchCursor {
    pub divisor: u32,
    /// The counter value in effect for the current run (already advanced)
    pub counter: u32,
}

impl SyncBatchCursor {
    pub fn new(divisor: u32, counter: u32) -> Self {
        Self { divisor, counter }
    }
}
