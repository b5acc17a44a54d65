use super::{EvaluationContext, ViolationDraft};
use crate::error::Result;
use vigil_model::{ActiveStream, ConcurrentStreamsConfig, Severity, SessionState, Signal};

/// Effective stream count after the configured collapses.
///
/// Household-IP streams collapse to a single unit when exempted, as do
/// paused streams when configured; every remaining stream counts alone.
fn effective_count(
    streams: &[ActiveStream],
    ctx: &EvaluationContext,
    config: &ConcurrentStreamsConfig,
) -> u32 {
    let mut count = 0u32;
    let mut household_seen = false;
    let mut paused_seen = false;

    for stream in streams {
        if config.exempt_household && ctx.is_household_ip(&stream.ip_address) {
            if !household_seen {
                household_seen = true;
                count += 1;
            }
            continue;
        }
        if config.collapse_paused && stream.state == SessionState::Paused {
            if !paused_seen {
                paused_seen = true;
                count += 1;
            }
            continue;
        }
        count += 1;
    }
    count
}

pub(super) fn evaluate(
    config: &ConcurrentStreamsConfig,
    ctx: &EvaluationContext,
) -> Result<Option<ViolationDraft>> {
    if ctx.stream.is_none() {
        return Ok(None);
    }
    let count = effective_count(&ctx.user_streams, ctx, config);
    if count <= config.max_streams {
        return Ok(None);
    }

    let severity = if count > config.max_streams + 2 {
        Severity::Critical
    } else {
        Severity::Warning
    };
    let draft = ViolationDraft::new(
        severity,
        format!(
            "{} has {count} concurrent streams (limit {})",
            ctx.user_name, config.max_streams
        ),
    )
    .detail("stream_count", count)
    .detail("raw_stream_count", ctx.user_streams.len())
    .detail("max_streams", config.max_streams)
    .signal(Signal::boolean("over_limit", 2.0, true))
    .signal(Signal::numeric(
        "stream_count",
        1.0,
        f64::from(count) / f64::from(config.max_streams.max(1)) * 50.0,
    ));
    Ok(Some(draft))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, stream};
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vigil_model::HouseholdLocation;

    fn household(ip: &str) -> HouseholdLocation {
        HouseholdLocation {
            id: Uuid::new_v4(),
            user_name: "alice".into(),
            ip_address: Some(ip.into()),
            city: None,
            country: None,
            latitude: None,
            longitude: None,
            session_count: 20,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            auto_learned: true,
            trusted: true,
        }
    }

    #[test]
    fn household_streams_collapse_to_one_unit() {
        let home_a = stream("192.0.2.10", "tv");
        let home_b = stream("192.0.2.10", "tablet");
        let away = stream("203.0.113.9", "web");
        let mut ctx = context(away.clone());
        ctx.user_streams = vec![home_a, home_b, away];
        ctx.household = vec![household("192.0.2.10")];

        let config = ConcurrentStreamsConfig {
            max_streams: 2,
            exempt_household: true,
            collapse_paused: false,
        };
        // Two household streams + one remote = effective 2, within limit.
        assert_eq!(effective_count(&ctx.user_streams, &ctx, &config), 2);
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn over_limit_fires() {
        let mut ctx = context(stream("203.0.113.9", "a"));
        ctx.user_streams = vec![
            stream("203.0.113.9", "a"),
            stream("198.51.100.1", "b"),
            stream("198.51.100.2", "c"),
        ];
        let config = ConcurrentStreamsConfig {
            max_streams: 2,
            ..Default::default()
        };
        let draft = evaluate(&config, &ctx).unwrap().expect("violation");
        assert_eq!(draft.severity, Severity::Warning);
        assert_eq!(draft.details["stream_count"], 3);
    }

    #[test]
    fn paused_streams_collapse_when_configured() {
        let mut playing = stream("203.0.113.9", "a");
        playing.state = SessionState::Playing;
        let mut paused_a = stream("198.51.100.1", "b");
        paused_a.state = SessionState::Paused;
        let mut paused_b = stream("198.51.100.2", "c");
        paused_b.state = SessionState::Paused;

        let mut ctx = context(playing.clone());
        ctx.user_streams = vec![playing, paused_a, paused_b];

        let config = ConcurrentStreamsConfig {
            max_streams: 2,
            exempt_household: false,
            collapse_paused: true,
        };
        assert_eq!(effective_count(&ctx.user_streams, &ctx, &config), 2);
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn far_over_limit_is_critical() {
        let mut ctx = context(stream("203.0.113.9", "a"));
        ctx.user_streams = (0..6)
            .map(|i| stream(&format!("203.0.113.{i}"), &format!("p{i}")))
            .collect();
        let config = ConcurrentStreamsConfig {
            max_streams: 2,
            ..Default::default()
        };
        let draft = evaluate(&config, &ctx).unwrap().expect("violation");
        assert_eq!(draft.severity, Severity::Critical);
    }
}
