use chrono::Duration;

use super::{EvaluationContext, ViolationDraft};
use crate::error::Result;
use crate::geo::haversine_km;
use vigil_model::{ImpossibleTravelConfig, Severity, Signal};

/// Previous session at geo A, current at geo B: flag when the implied
/// ground speed between them is impossible.
pub(super) fn evaluate(
    config: &ImpossibleTravelConfig,
    ctx: &EvaluationContext,
) -> Result<Option<ViolationDraft>> {
    let Some(stream) = &ctx.stream else {
        return Ok(None);
    };
    let Some(current) = ctx.current_geo.as_ref().and_then(|g| g.coordinates())
    else {
        return Ok(None);
    };
    let Some(previous) = ctx.previous_geo.as_ref().and_then(|g| g.coordinates())
    else {
        return Ok(None);
    };
    let Some(previous_at) = ctx.previous_seen_at else {
        return Ok(None);
    };

    let elapsed = ctx.now - previous_at;
    if elapsed > Duration::try_milliseconds(
        (config.time_window_hours * 3_600_000.0) as i64,
    )
    .unwrap_or(Duration::MAX)
    {
        return Ok(None);
    }

    let distance_km = haversine_km(previous, current);
    if distance_km < config.min_distance_km {
        return Ok(None);
    }

    // Sub-second gaps read as simultaneous use; one second floors the
    // division instead of blowing it up.
    let hours = (elapsed.num_seconds().max(1) as f64) / 3600.0;
    let speed_km_h = distance_km / hours;
    if speed_km_h <= config.max_speed_km_h {
        return Ok(None);
    }

    let household_trusted = ctx.is_household_ip(&stream.ip_address);
    let draft = ViolationDraft::new(
        Severity::Critical,
        format!(
            "{} appeared {:.0} km away within {:.1} h ({:.0} km/h)",
            ctx.user_name, distance_km, hours, speed_km_h
        ),
    )
    .detail("distance_km", distance_km.round())
    .detail("speed_km_h", speed_km_h.round())
    .detail("previous_ip", ctx.previous_geo.as_ref().map(|g| g.ip.clone()))
    .detail("current_ip", stream.ip_address.clone())
    .signal(Signal::numeric(
        "speed",
        3.0,
        (speed_km_h / config.max_speed_km_h) * 50.0,
    ))
    .signal(Signal::numeric(
        "distance",
        2.0,
        (distance_km / config.min_distance_km) * 25.0,
    ))
    .signal(Signal::boolean("household_trust", 1.0, !household_trusted));

    Ok(Some(draft))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, geo, stream};
    use super::*;
    use crate::rules::confidence;

    #[test]
    fn transatlantic_hour_fires_critical() {
        let mut ctx = context(stream("203.0.113.9", "web"));
        ctx.current_geo = Some(geo("203.0.113.9", 51.51, -0.13, "GB"));
        ctx.previous_geo = Some(geo("198.51.100.7", 40.71, -74.01, "US"));
        ctx.previous_seen_at = Some(ctx.now - Duration::seconds(3600));

        let config = ImpossibleTravelConfig::default();
        let draft = evaluate(&config, &ctx).unwrap().expect("violation");

        assert_eq!(draft.severity, Severity::Critical);
        assert!(confidence::score(&draft.signals) >= 90.0);
        let distance = draft.details["distance_km"].as_f64().unwrap();
        assert!((distance - 5570.0).abs() < 30.0);
    }

    #[test]
    fn slow_travel_is_fine() {
        let mut ctx = context(stream("203.0.113.9", "web"));
        ctx.current_geo = Some(geo("203.0.113.9", 51.51, -0.13, "GB"));
        ctx.previous_geo = Some(geo("198.51.100.7", 40.71, -74.01, "US"));
        // Eight hours over the Atlantic is an ordinary flight.
        ctx.previous_seen_at = Some(ctx.now - Duration::hours(8));

        let config = ImpossibleTravelConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn short_hops_are_ignored() {
        let mut ctx = context(stream("203.0.113.9", "web"));
        ctx.current_geo = Some(geo("203.0.113.9", 40.75, -74.00, "US"));
        ctx.previous_geo = Some(geo("198.51.100.7", 40.71, -74.01, "US"));
        ctx.previous_seen_at = Some(ctx.now - Duration::seconds(60));

        let config = ImpossibleTravelConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn outside_window_is_ignored() {
        let mut ctx = context(stream("203.0.113.9", "web"));
        ctx.current_geo = Some(geo("203.0.113.9", 51.51, -0.13, "GB"));
        ctx.previous_geo = Some(geo("198.51.100.7", 40.71, -74.01, "US"));
        ctx.previous_seen_at = Some(ctx.now - Duration::hours(26));

        let config = ImpossibleTravelConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn missing_geo_skips() {
        let ctx = context(stream("203.0.113.9", "web"));
        let config = ImpossibleTravelConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }
}
