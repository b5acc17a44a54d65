use super::{EvaluationContext, ViolationDraft};
use crate::error::Result;
use vigil_model::{GeoRestrictionConfig, Severity, Signal};

/// Country allow/block list. A non-empty allow list wins; the block list is
/// consulted only when no allow list is set.
pub(super) fn evaluate(
    config: &GeoRestrictionConfig,
    ctx: &EvaluationContext,
) -> Result<Option<ViolationDraft>> {
    let Some(stream) = &ctx.stream else {
        return Ok(None);
    };
    let Some(geo) = &ctx.current_geo else {
        return Ok(None);
    };
    if geo.private {
        return Ok(None);
    }
    let Some(country) = geo.country.as_deref().filter(|c| !c.is_empty()) else {
        return Ok(None);
    };

    let blocked = if !config.allowed_countries.is_empty() {
        !config
            .allowed_countries
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(country))
    } else {
        config
            .blocked_countries
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(country))
    };
    if !blocked {
        return Ok(None);
    }

    let draft = ViolationDraft::new(
        Severity::Warning,
        format!("{} is streaming from {country}", ctx.user_name),
    )
    .detail("country", country)
    .detail("ip", stream.ip_address.clone())
    .signal(Signal::boolean("restricted_country", 1.0, true));
    Ok(Some(draft))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, geo, stream};
    use super::*;

    fn ctx_with_country(country: &str) -> EvaluationContext {
        let mut ctx = context(stream("203.0.113.9", "web"));
        ctx.current_geo = Some(geo("203.0.113.9", 1.0, 2.0, country));
        ctx
    }

    #[test]
    fn allow_list_excludes_everything_else() {
        let config = GeoRestrictionConfig {
            allowed_countries: vec!["US".into(), "CA".into()],
            blocked_countries: vec![],
        };
        assert!(evaluate(&config, &ctx_with_country("US"))
            .unwrap()
            .is_none());
        assert!(evaluate(&config, &ctx_with_country("FR"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn block_list_applies_without_allow_list() {
        let config = GeoRestrictionConfig {
            allowed_countries: vec![],
            blocked_countries: vec!["KP".into()],
        };
        assert!(evaluate(&config, &ctx_with_country("KP"))
            .unwrap()
            .is_some());
        assert!(evaluate(&config, &ctx_with_country("US"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn allow_list_shadows_block_list() {
        let config = GeoRestrictionConfig {
            allowed_countries: vec!["US".into()],
            blocked_countries: vec!["US".into()],
        };
        assert!(evaluate(&config, &ctx_with_country("US"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn country_match_is_case_insensitive() {
        let config = GeoRestrictionConfig {
            allowed_countries: vec!["us".into()],
            blocked_countries: vec![],
        };
        assert!(evaluate(&config, &ctx_with_country("US"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn private_ip_skips() {
        let config = GeoRestrictionConfig {
            allowed_countries: vec!["US".into()],
            blocked_countries: vec![],
        };
        let mut ctx = context(stream("192.168.1.5", "web"));
        ctx.current_geo =
            Some(vigil_model::GeoResult::private_sentinel("192.168.1.5"));
        assert!(evaluate(&config, &ctx).unwrap().is_none());
    }
}
