use std::collections::HashSet;

use chrono::Duration;

use super::{EvaluationContext, ViolationDraft};
use crate::error::Result;
use vigil_model::{DeviceVelocityConfig, Severity, Signal};

/// Batch-only: count distinct `(player, platform)` tuples the user touched
/// inside the window.
pub(super) fn evaluate(
    config: &DeviceVelocityConfig,
    ctx: &EvaluationContext,
) -> Result<Option<ViolationDraft>> {
    let window = Duration::try_milliseconds(
        (config.time_window_hours * 3_600_000.0) as i64,
    )
    .unwrap_or(Duration::MAX);
    let cutoff = ctx.now - window;

    let devices: HashSet<(&str, &str)> = ctx
        .recent_history
        .iter()
        .filter(|entry| entry.stopped_at >= cutoff)
        .filter(|entry| !entry.player.is_empty() || !entry.platform.is_empty())
        .map(|entry| (entry.player.as_str(), entry.platform.as_str()))
        .collect();

    let count = devices.len() as u32;
    if count <= config.max_devices_per_hour {
        return Ok(None);
    }

    let draft = ViolationDraft::new(
        Severity::Warning,
        format!(
            "{} used {count} devices within {:.1} h (limit {})",
            ctx.user_name, config.time_window_hours, config.max_devices_per_hour
        ),
    )
    .detail("device_count", count)
    .detail("max_devices", config.max_devices_per_hour)
    .signal(Signal::numeric(
        "device_count",
        2.0,
        f64::from(count) / f64::from(config.max_devices_per_hour.max(1))
            * 50.0,
    ))
    .signal(Signal::boolean("over_limit", 1.0, true));
    Ok(Some(draft))
}
