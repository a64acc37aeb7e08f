//! Process exit codes

use flowlens_core::RunReport;

pub const SUCCESS: u8 = 0;
/// Fatal error: configuration, fetch, or persist
pub const FAILURE: u8 = 1;
/// Run succeeded but the notification failed under `--strict-notify`
pub const NOTIFY_FAILED: u8 = 2;
/// Interrupted by Ctrl-C (128 + SIGINT)
pub const INTERRUPTED: u8 = 130;

/// Exit code for a completed run. Degraded stages still count as success
/// unless `strict_notify` is set and the notification failed.
pub fn for_report(report: &RunReport, strict_notify: bool) -> u8 {
    if strict_notify && report.notification_failed() {
        NOTIFY_FAILED
    } else {
        SUCCESS
    }
}
