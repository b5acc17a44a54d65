use super::{EvaluationContext, ViolationDraft};
use crate::error::Result;
use vigil_model::{NewLocationConfig, Severity, Signal};

/// Geo point outside every trusted location, and far enough from the
/// nearest one to matter.
pub(super) fn evaluate(
    config: &NewLocationConfig,
    ctx: &EvaluationContext,
) -> Result<Option<ViolationDraft>> {
    let Some(stream) = &ctx.stream else {
        return Ok(None);
    };
    let Some(geo) = &ctx.current_geo else {
        return Ok(None);
    };
    if geo.private || ctx.is_household_ip(&stream.ip_address) {
        return Ok(None);
    }
    let Some(point) = geo.coordinates() else {
        return Ok(None);
    };

    // With no trusted coordinates at all there is nothing to measure
    // against; the household learner has to run first.
    let Some(nearest_km) = ctx.distance_to_nearest_household(point) else {
        return Ok(None);
    };
    if nearest_km < config.min_distance_km {
        return Ok(None);
    }

    let severity = if nearest_km >= config.severity_threshold_km {
        Severity::Warning
    } else {
        Severity::Info
    };
    let draft = ViolationDraft::new(
        severity,
        format!(
            "{} is streaming {:.0} km from the nearest trusted location",
            ctx.user_name, nearest_km
        ),
    )
    .detail("distance_km", nearest_km.round())
    .detail("city", geo.city.clone())
    .detail("country", geo.country.clone())
    .signal(Signal::numeric(
        "distance",
        2.0,
        (nearest_km / config.severity_threshold_km.max(1.0)) * 60.0,
    ))
    .signal(Signal::boolean("outside_household", 1.0, true));
    Ok(Some(draft))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, geo, stream};
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vigil_model::HouseholdLocation;

    fn household_at(lat: f64, lng: f64) -> HouseholdLocation {
        HouseholdLocation {
            id: Uuid::new_v4(),
            user_name: "alice".into(),
            ip_address: Some("192.0.2.1".into()),
            city: None,
            country: None,
            latitude: Some(lat),
            longitude: Some(lng),
            session_count: 30,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            auto_learned: true,
            trusted: true,
        }
    }

    #[test]
    fn far_from_home_warns() {
        let mut ctx = context(stream("203.0.113.9", "web"));
        ctx.current_geo = Some(geo("203.0.113.9", 51.51, -0.13, "GB"));
        ctx.household = vec![household_at(40.71, -74.01)];

        let config = NewLocationConfig::default();
        let draft = evaluate(&config, &ctx).unwrap().expect("violation");
        assert_eq!(draft.severity, Severity::Warning);
    }

    #[test]
    fn near_home_is_quiet() {
        let mut ctx = context(stream("203.0.113.9", "web"));
        ctx.current_geo = Some(geo("203.0.113.9", 40.75, -74.02, "US"));
        ctx.household = vec![household_at(40.71, -74.01)];

        let config = NewLocationConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn moderate_distance_is_info() {
        let mut ctx = context(stream("203.0.113.9", "web"));
        // Philadelphia is roughly 130 km from NYC.
        ctx.current_geo = Some(geo("203.0.113.9", 39.95, -75.17, "US"));
        ctx.household = vec![household_at(40.71, -74.01)];

        let config = NewLocationConfig {
            min_distance_km: 50.0,
            severity_threshold_km: 500.0,
        };
        let draft = evaluate(&config, &ctx).unwrap().expect("violation");
        assert_eq!(draft.severity, Severity::Info);
    }

    #[test]
    fn household_ip_is_trusted_regardless_of_distance() {
        let mut ctx = context(stream("192.0.2.1", "web"));
        ctx.current_geo = Some(geo("192.0.2.1", 51.51, -0.13, "GB"));
        ctx.household = vec![household_at(40.71, -74.01)];

        let config = NewLocationConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn no_trusted_coordinates_skips() {
        let mut ctx = context(stream("203.0.113.9", "web"));
        ctx.current_geo = Some(geo("203.0.113.9", 51.51, -0.13, "GB"));
        let config = NewLocationConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }
}
