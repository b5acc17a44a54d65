use super::{EvaluationContext, ViolationDraft};
use crate::error::Result;
use vigil_model::{NewDeviceConfig, Severity, Signal};

/// First-ever observation of a `(player, platform)` tuple for the user.
pub(super) fn evaluate(
    config: &NewDeviceConfig,
    ctx: &EvaluationContext,
) -> Result<Option<ViolationDraft>> {
    let Some(stream) = &ctx.stream else {
        return Ok(None);
    };
    if stream.player.is_empty() && stream.platform.is_empty() {
        return Ok(None);
    }
    let device = (stream.player.clone(), stream.platform.clone());
    if ctx.known_devices.contains(&device) {
        return Ok(None);
    }

    let severity = if config.notify_only {
        Severity::Info
    } else {
        Severity::Warning
    };
    let draft = ViolationDraft::new(
        severity,
        format!(
            "{} started streaming on a new device: {} ({})",
            ctx.user_name, stream.player, stream.platform
        ),
    )
    .detail("player", stream.player.clone())
    .detail("platform", stream.platform.clone())
    .signal(Signal::boolean("new_device", 1.0, true))
    .signal(Signal::boolean(
        "household_ip",
        1.0,
        !ctx.is_household_ip(&stream.ip_address),
    ));
    Ok(Some(draft))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, stream};
    use super::*;

    #[test]
    fn unseen_device_fires() {
        let ctx = context(stream("203.0.113.9", "fresh-player"));
        let config = NewDeviceConfig::default();
        let draft = evaluate(&config, &ctx).unwrap().expect("violation");
        assert_eq!(draft.severity, Severity::Warning);
        assert_eq!(draft.details["player"], "fresh-player");
    }

    #[test]
    fn known_device_is_quiet() {
        let trigger = stream("203.0.113.9", "tv");
        let mut ctx = context(trigger.clone());
        ctx.known_devices
            .insert((trigger.player.clone(), trigger.platform.clone()));
        let config = NewDeviceConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn notify_only_downgrades_severity() {
        let ctx = context(stream("203.0.113.9", "fresh-player"));
        let config = NewDeviceConfig { notify_only: true };
        let draft = evaluate(&config, &ctx).unwrap().expect("violation");
        assert_eq!(draft.severity, Severity::Info);
    }
}
