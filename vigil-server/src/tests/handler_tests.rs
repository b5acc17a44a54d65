use axum::extract::Path;
use chrono::Utc;
use uuid::Uuid;

use crate::handlers::rules;
use crate::handlers::servers::ServerResponse;
use vigil_model::{RuleType, Server, ServerKind};

#[tokio::test]
async fn rule_defaults_expose_type_schema() {
    let axum::Json(value) =
        rules::rule_defaults(Path(RuleType::ConcurrentStreams))
            .await
            .unwrap();
    assert_eq!(value["max_streams"], 3);
    assert_eq!(value["exempt_household"], false);

    let axum::Json(value) =
        rules::rule_defaults(Path(RuleType::ImpossibleTravel))
            .await
            .unwrap();
    assert_eq!(value["max_speed_km_h"], 800.0);
}

#[test]
fn server_response_never_carries_the_api_key() {
    let server = Server {
        id: Uuid::new_v4(),
        name: "plex".into(),
        kind: ServerKind::Plex,
        url: "http://plex.local:32400".into(),
        api_key: "very-secret".into(),
        machine_id: None,
        enabled: true,
        created_at: Utc::now(),
    };
    let response = ServerResponse::from(server);
    let serialized = serde_json::to_string(&response).unwrap();
    assert!(!serialized.contains("very-secret"));
    assert!(!serialized.contains("api_key"));
}
