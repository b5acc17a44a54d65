use super::{EvaluationContext, ViolationDraft};
use crate::error::Result;
use crate::geo::haversine_km;
use vigil_model::{Severity, Signal, SimultaneousLocationsConfig};

/// Flag a user whose active streams originate from places too far apart to
/// be one household watching at once.
pub(super) fn evaluate(
    config: &SimultaneousLocationsConfig,
    ctx: &EvaluationContext,
) -> Result<Option<ViolationDraft>> {
    if ctx.stream.is_none() {
        return Ok(None);
    }

    // Distinct coordinates across the user's streams.
    let mut points: Vec<(String, (f64, f64))> = Vec::new();
    for stream in &ctx.user_streams {
        let Some(geo) = ctx.stream_geos.get(&stream.ip_address) else {
            continue;
        };
        if geo.private {
            continue;
        }
        if let Some(coords) = geo.coordinates()
            && !points.iter().any(|(ip, _)| ip == &stream.ip_address)
        {
            points.push((stream.ip_address.clone(), coords));
        }
    }
    if points.len() < 2 {
        return Ok(None);
    }

    let mut worst: Option<(f64, &str, &str)> = None;
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let distance = haversine_km(points[i].1, points[j].1);
            if worst.is_none_or(|(d, _, _)| distance > d) {
                worst = Some((distance, &points[i].0, &points[j].0));
            }
        }
    }
    let Some((distance_km, ip_a, ip_b)) = worst else {
        return Ok(None);
    };
    if distance_km < config.min_distance_km {
        return Ok(None);
    }

    let severity = if distance_km >= config.min_distance_km * 4.0 {
        Severity::Critical
    } else {
        Severity::Warning
    };
    let draft = ViolationDraft::new(
        severity,
        format!(
            "{} is streaming from locations {:.0} km apart",
            ctx.user_name, distance_km
        ),
    )
    .detail("distance_km", distance_km.round())
    .detail("ip_a", ip_a)
    .detail("ip_b", ip_b)
    .detail("location_count", points.len())
    .signal(Signal::numeric(
        "distance",
        2.0,
        (distance_km / config.min_distance_km) * 50.0,
    ))
    .signal(Signal::boolean("multiple_locations", 1.0, true));
    Ok(Some(draft))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, geo, stream};
    use super::*;

    #[test]
    fn far_apart_streams_fire() {
        let nyc = stream("198.51.100.7", "a");
        let london = stream("203.0.113.9", "b");
        let mut ctx = context(nyc.clone());
        ctx.user_streams = vec![nyc, london];
        ctx.stream_geos.insert(
            "198.51.100.7".into(),
            geo("198.51.100.7", 40.71, -74.01, "US"),
        );
        ctx.stream_geos.insert(
            "203.0.113.9".into(),
            geo("203.0.113.9", 51.51, -0.13, "GB"),
        );

        let config = SimultaneousLocationsConfig::default();
        let draft = evaluate(&config, &ctx).unwrap().expect("violation");
        assert_eq!(draft.severity, Severity::Critical);
        assert_eq!(draft.details["location_count"], 2);
    }

    #[test]
    fn same_city_is_fine() {
        let a = stream("198.51.100.7", "a");
        let b = stream("198.51.100.8", "b");
        let mut ctx = context(a.clone());
        ctx.user_streams = vec![a, b];
        ctx.stream_geos.insert(
            "198.51.100.7".into(),
            geo("198.51.100.7", 40.71, -74.01, "US"),
        );
        ctx.stream_geos.insert(
            "198.51.100.8".into(),
            geo("198.51.100.8", 40.73, -73.99, "US"),
        );

        let config = SimultaneousLocationsConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn single_stream_never_fires() {
        let a = stream("198.51.100.7", "a");
        let mut ctx = context(a);
        ctx.stream_geos.insert(
            "198.51.100.7".into(),
            geo("198.51.100.7", 40.71, -74.01, "US"),
        );
        let config = SimultaneousLocationsConfig::default();
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }
}
