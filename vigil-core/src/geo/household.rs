use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::GeoService;
use crate::database::ports::HouseholdRepository;
use crate::error::Result;
use vigil_model::HouseholdLocation;

/// Scan history for `(user, ip)` groups with at least `min_sessions`
/// entries and create trusted household locations for the new ones.
///
/// Existing locations only get their session counters refreshed; nothing
/// already learned is ever demoted here.
pub async fn household_calculate(
    household: Arc<dyn HouseholdRepository>,
    geo: &GeoService,
    min_sessions: i64,
) -> Result<usize> {
    let groups = household.user_ip_groups(min_sessions).await?;
    let mut learned = 0;

    for group in groups {
        if let Some(existing) = household
            .get_by_user_ip(&group.user_name, &group.ip_address)
            .await?
        {
            household
                .touch(existing.id, group.session_count, group.last_seen)
                .await?;
            continue;
        }

        let lookup = geo.lookup(&group.ip_address).await?;
        if lookup.private {
            // LAN addresses are implicitly home; a location row would only
            // add a meaningless (0, 0) coordinate.
            continue;
        }

        household
            .insert(&HouseholdLocation {
                id: Uuid::new_v4(),
                user_name: group.user_name.clone(),
                ip_address: Some(group.ip_address.clone()),
                city: lookup.city,
                country: lookup.country,
                latitude: lookup.latitude,
                longitude: lookup.longitude,
                session_count: group.session_count,
                first_seen: group.first_seen,
                last_seen: group.last_seen,
                auto_learned: true,
                trusted: true,
            })
            .await?;
        learned += 1;
        info!(
            user = %group.user_name,
            ip = %group.ip_address,
            sessions = group.session_count,
            "learned household location"
        );
    }

    Ok(learned)
}
