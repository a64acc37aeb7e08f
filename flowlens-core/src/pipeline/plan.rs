//! Window selection for a run

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::WindowPolicy;
use crate::error::InvalidWindow;
use crate::state::RunState;
use crate::window::{QueryWindow, truncate_to_minute};

/// Operator overrides for one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Explicit window start; defaults to the stored cursor.
    pub start: Option<DateTime<Utc>>,
    /// Explicit window end; defaults to `now` truncated to the minute.
    pub end: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    /// Leave the run state untouched.
    pub dry_run: bool,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            now: Utc::now(),
            dry_run: false,
        }
    }
}

impl RunRequest {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }
}

/// Pick the window for this run.
///
/// Returns `Ok(None)` when the stored cursor has already reached the end, and
/// an error only when the operator supplied both bounds in the wrong order.
/// Spans longer than `policy.max_span` are clamped; the following run picks up
/// from the clamp point.
pub fn plan_window(
    state: &RunState,
    request: &RunRequest,
    policy: &WindowPolicy,
) -> Result<Option<QueryWindow>, InvalidWindow> {
    let end = request.end.unwrap_or_else(|| truncate_to_minute(request.now));
    let start = request
        .start
        .or(state.last_window_end)
        .unwrap_or(end - policy.size);

    if start >= end {
        if request.start.is_some() {
            return Err(InvalidWindow { start, end });
        }
        return Ok(None);
    }

    let end = if end - start > policy.max_span {
        let clamped = start + policy.max_span;
        warn!(%start, requested_end = %end, %clamped, "window exceeds max span, clamping");
        clamped
    } else {
        end
    };

    QueryWindow::new(start, end).map(Some)
}
