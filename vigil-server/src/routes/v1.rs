use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers::{
    dashboard, history, household, maintenance, notifications, rules,
    servers, violations,
};
use crate::infra::app_state::AppState;

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        // Dashboard
        .route("/api/dashboard/sse", get(dashboard::dashboard_sse))
        .route("/api/dashboard/stats", get(dashboard::dashboard_stats))
        .route("/api/dashboard/sessions", get(dashboard::active_sessions))
        // History
        .route("/api/history", get(history::list_history))
        // Servers
        .route(
            "/api/servers",
            get(servers::list_servers).post(servers::create_server),
        )
        .route(
            "/api/servers/{id}",
            put(servers::update_server).delete(servers::delete_server),
        )
        .route("/api/servers/{id}/test", post(servers::test_server))
        .route(
            "/api/servers/{id}/import-history",
            post(servers::import_history),
        )
        // Maintenance
        .route("/api/maintenance/sync", post(maintenance::start_sync))
        .route("/api/maintenance/sync/status", get(maintenance::sync_status))
        .route(
            "/api/maintenance/rules",
            get(maintenance::list_rules).post(maintenance::create_rule),
        )
        .route(
            "/api/maintenance/rules/{id}",
            put(maintenance::update_rule).delete(maintenance::delete_rule),
        )
        .route(
            "/api/maintenance/rules/{id}/evaluate",
            post(maintenance::evaluate_rule),
        )
        .route(
            "/api/maintenance/rules/{id}/candidates",
            get(maintenance::list_candidates),
        )
        .route(
            "/api/maintenance/rules/{id}/exclusions",
            get(maintenance::list_exclusions)
                .post(maintenance::add_exclusion),
        )
        .route(
            "/api/maintenance/rules/{id}/exclusions/{item_id}",
            delete(maintenance::remove_exclusion),
        )
        .route(
            "/api/maintenance/candidates/bulk-delete",
            post(maintenance::bulk_delete),
        )
        .route(
            "/api/maintenance/items/{server_id}/{item_id}",
            get(maintenance::item_details),
        )
        // Sharing rules
        .route(
            "/api/rules",
            get(rules::list_rules).post(rules::create_rule),
        )
        .route(
            "/api/rules/{id}",
            put(rules::update_rule).delete(rules::delete_rule),
        )
        .route("/api/rules/defaults/{type}", get(rules::rule_defaults))
        // Violations
        .route("/api/violations", get(violations::list_violations))
        .route(
            "/api/violations/{id}",
            get(violations::get_violation).delete(violations::delete_violation),
        )
        // Notification channels
        .route(
            "/api/notifications",
            get(notifications::list_channels)
                .post(notifications::create_channel),
        )
        .route(
            "/api/notifications/{id}",
            put(notifications::update_channel)
                .delete(notifications::delete_channel),
        )
        .route(
            "/api/notifications/{id}/test",
            post(notifications::test_channel),
        )
        // Household locations
        .route("/api/household", get(household::list_locations))
        .route(
            "/api/household/recalculate",
            post(household::recalculate),
        )
        .route("/api/household/{id}/trust", put(household::set_trusted))
        .route("/api/household/{id}", delete(household::delete_location))
}
