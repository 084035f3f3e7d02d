//! End-to-end tests of the HTTP API behind the authorization middleware

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use warden_api_server::{create_router, AppState};
use warden_authz::store::InMemoryEntityStore;
use warden_authz::{
    AccessConfig, AccessControl, Claims, JwtVerifier, NewAccessGroup, NewPermission,
};

const SECRET: &str = "api-test-secret";

const CONFIG: &str = r#"
resource_level_permissions = true

[jwt]
secret = "api-test-secret"

[route_access."/api/v1/me"]
GET = ["view:self"]

[route_access."/api/v1/groups"]
GET = ["manage:access"]
POST = ["manage:access"]

[route_access."/api/v1/groups/:id"]
GET = ["manage:access", "view:groups"]
PUT = ["manage:access"]
DELETE = ["manage:access"]

[route_access."/api/v1/groups/:id/members"]
POST = ["manage:access"]

[route_access."/api/v1/bulk/groups"]
POST = ["manage:access"]

[route_access."/api/v1/permissions"]
POST = ["manage:access"]

[route_access."/api/v1/permissions/:id/resource-types"]
POST = ["manage:access"]

[route_access."/api/v1/users/:id/access"]
POST = ["manage:access"]
"#;

const ADMIN: i64 = 1;
const VIEWER: i64 = 2;
const NOBODY: i64 = 3;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
}

/// User 1 is a super admin, user 2 may view groups and themselves, user 3 has nothing
async fn setup() -> TestApp {
    let store = InMemoryEntityStore::new();
    store.register_users([ADMIN, VIEWER, NOBODY, 4]).await;

    let config = AccessConfig::from_toml(CONFIG).unwrap();
    let access = AccessControl::new(
        config,
        Arc::new(store),
        Arc::new(JwtVerifier::hs256(SECRET)),
    )
    .await
    .unwrap();

    let admin = access.admin();
    let root = admin
        .create_permission(NewPermission::new("super_admin", "Everything"))
        .await
        .unwrap();
    let admins = admin.create_group(NewAccessGroup::new("Admins")).await.unwrap();
    admin.assign_permission(admins.id, root.id).await.unwrap();
    admin.add_user(admins.id, ADMIN).await.unwrap();

    let viewers = admin.create_group(NewAccessGroup::new("Viewers")).await.unwrap();
    for code in ["view:groups", "view:self"] {
        let permission = admin
            .create_permission(NewPermission::new(code, code))
            .await
            .unwrap();
        admin.assign_permission(viewers.id, permission.id).await.unwrap();
    }
    admin.add_user(viewers.id, VIEWER).await.unwrap();

    let state = Arc::new(AppState::new(access));
    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

fn token_with(secret: &str, claims: Value) -> String {
    let mut claims: Claims = match claims {
        Value::Object(map) => map,
        _ => Claims::new(),
    };
    claims.insert(
        "exp".to_string(),
        json!(chrono::Utc::now().timestamp() + 3600),
    );
    JwtVerifier::hs256(secret).sign(&claims).unwrap()
}

fn bearer(user_id: i64) -> String {
    format!("Bearer {}", token_with(SECRET, json!({ "userId": user_id })))
}

impl TestApp {
    async fn send(
        &self,
        method: &str,
        uri: &str,
        authorization: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(authorization) = authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

#[tokio::test]
async fn test_unprotected_routes_pass_through() {
    let app = setup().await;

    let (status, body) = app.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    // No rule for GET /api/v1/users/:id/permissions
    let (status, body) = app
        .send("GET", "/api/v1/users/2/permissions", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["permissions"], json!(["view:groups", "view:self"]));
}

#[tokio::test]
async fn test_authentication_failures_are_401() {
    let app = setup().await;

    let (status, body) = app.send("GET", "/api/v1/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "missing_token");

    let (status, body) = app
        .send("GET", "/api/v1/me", Some("Token abc"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "malformed_authorization");

    let forged = format!("Bearer {}", token_with("wrong-secret", json!({ "userId": 2 })));
    let (status, body) = app.send("GET", "/api/v1/me", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "invalid_token");

    let anonymous = format!("Bearer {}", token_with(SECRET, json!({ "sub": "x" })));
    let (status, body) = app.send("GET", "/api/v1/me", Some(&anonymous), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "missing_user_claim");
}

#[tokio::test]
async fn test_missing_permission_is_403() {
    let app = setup().await;

    let (status, body) = app
        .send("GET", "/api/v1/me", Some(&bearer(NOBODY)), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "forbidden");
    assert_eq!(body["status"], 403);
}

#[tokio::test]
async fn test_whoami_carries_principal() {
    let app = setup().await;

    let (status, body) = app
        .send("GET", "/api/v1/me", Some(&bearer(VIEWER)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], VIEWER);
    assert_eq!(body["super_admin"], false);
}

#[tokio::test]
async fn test_any_listed_permission_suffices() {
    let app = setup().await;

    let (status, created) = app
        .send(
            "POST",
            "/api/v1/groups",
            Some(&bearer(ADMIN)),
            Some(json!({ "name": "Editors", "description": "Content editors" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_i64().unwrap();

    // view:groups is enough to read
    let uri = format!("/api/v1/groups/{}", id);
    let (status, body) = app.send("GET", &uri, Some(&bearer(VIEWER)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Editors");

    // but not to write
    let (status, _) = app
        .send(
            "PUT",
            &uri,
            Some(&bearer(VIEWER)),
            Some(json!({ "name": "Writers" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_domain_errors_map_to_status() {
    let app = setup().await;
    let admin = bearer(ADMIN);

    let (status, body) = app
        .send("POST", "/api/v1/groups", Some(&admin), Some(json!({ "name": "Viewers" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "duplicate_name");

    let (status, body) = app
        .send("GET", "/api/v1/groups/999", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, _) = app
        .send("POST", "/api/v1/groups", Some(&admin), Some(json!({ "name": "" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Viewers still has members and permissions
    let viewers = app
        .state
        .access
        .admin()
        .get_group_by_name("Viewers")
        .await
        .unwrap()
        .unwrap();
    let (status, body) = app
        .send(
            "DELETE",
            &format!("/api/v1/groups/{}", viewers.id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "group_in_use");
}

#[tokio::test]
async fn test_bulk_create_is_atomic() {
    let app = setup().await;
    let admin = bearer(ADMIN);

    let (status, body) = app
        .send(
            "POST",
            "/api/v1/bulk/groups",
            Some(&admin),
            Some(json!({
                "name": "Broken",
                "user_ids": [4],
                "permissions": [{ "permission_id": 999 }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, _) = app
        .send("GET", "/api/v1/groups?name=Broken", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send("GET", "/api/v1/users/4/groups", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_resource_level_access_over_http() {
    let app = setup().await;
    let admin = bearer(ADMIN);

    let (status, permission) = app
        .send(
            "POST",
            "/api/v1/permissions",
            Some(&admin),
            Some(json!({ "code": "read:observations", "name": "Read observations" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let permission_id = permission["id"].as_i64().unwrap();

    let (status, declared) = app
        .send(
            "POST",
            &format!("/api/v1/permissions/{}/resource-types", permission_id),
            Some(&admin),
            Some(json!({ "name": "location" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(declared["name"], "location");

    let (status, summary) = app
        .send(
            "POST",
            "/api/v1/bulk/groups",
            Some(&admin),
            Some(json!({
                "name": "Observers",
                "user_ids": [4],
                "permissions": [{
                    "permission_id": permission_id,
                    "resources": { "location": [1, 2, 3] }
                }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(summary["grants_added"], 3);

    let check = |ids: Value| {
        json!({
            "permission_id": permission_id,
            "resource_type": "location",
            "resource_ids": ids
        })
    };

    let (status, body) = app
        .send("POST", "/api/v1/users/4/access", Some(&admin), Some(check(json!([1, 2]))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (_, body) = app
        .send("POST", "/api/v1/users/4/access", Some(&admin), Some(check(json!([1, 4]))))
        .await;
    assert_eq!(body["allowed"], false);

    let (status, body) = app
        .send(
            "GET",
            &format!(
                "/api/v1/users/4/resources?resource_type=location&permission_id={}",
                permission_id
            ),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource_ids"], json!([1, 2, 3]));

    let (status, body) = app
        .send(
            "GET",
            &format!(
                "/api/v1/users/4/resources?resource_type=region&permission_id={}",
                permission_id
            ),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unconfigured_resource_type");
}

#[tokio::test]
async fn test_metrics_count_decisions() {
    let app = setup().await;

    app.send("GET", "/api/v1/me", None, None).await;
    app.send("GET", "/api/v1/me", Some(&bearer(VIEWER)), None).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains(r#"warden_decisions_total{outcome="allowed"} 1"#));
    assert!(text.contains(r#"warden_decisions_total{outcome="denied_unauthenticated"} 1"#));
}
