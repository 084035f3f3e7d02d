//! Route definitions for the API server
//!
//! Routes are organized by functionality:
//! - Health and metrics endpoints
//! - Access group administration and bulk assignment
//! - Permissions and resource-level grants
//! - Per-user resolution and cache control
//!
//! Every request goes through the authorization middleware; which routes it
//! protects is decided by the `route_access` configuration.

use crate::{handlers, middleware, state::AppState};
use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Warden Access Control API",
        version = "1.0.0",
        description = "Access groups, permissions and resource-level grants",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        handlers::health_check,
        handlers::metrics,
        handlers::whoami,
        handlers::create_group,
        handlers::find_group,
        handlers::get_group,
        handlers::update_group,
        handlers::delete_group,
        handlers::bulk_create_group,
        handlers::bulk_update_group,
        handlers::list_members,
        handlers::add_member,
        handlers::remove_member,
        handlers::list_group_permissions,
        handlers::assign_permission,
        handlers::unassign_permission,
        handlers::group_view,
        handlers::grant_resources,
        handlers::revoke_resources,
        handlers::create_permission,
        handlers::find_permission,
        handlers::get_permission,
        handlers::list_resource_types,
        handlers::declare_resource_type,
        handlers::revoke_resource_type,
        handlers::user_permissions,
        handlers::user_groups,
        handlers::user_resources,
        handlers::check_access,
        handlers::clear_cache,
        handlers::clear_user_cache,
    ),
    components(
        schemas(
            crate::models::HealthResponse,
            crate::models::ErrorResponse,
            crate::models::WhoAmIResponse,
            crate::models::CreateGroupRequest,
            crate::models::UpdateGroupRequest,
            crate::models::GroupResponse,
            crate::models::ListGroupsResponse,
            crate::models::DeleteModeParam,
            crate::models::CreatePermissionRequest,
            crate::models::PermissionResponse,
            crate::models::ListPermissionsResponse,
            crate::models::AddMemberRequest,
            crate::models::AssignPermissionRequest,
            crate::models::ChangedResponse,
            crate::models::MembersResponse,
            crate::models::PermissionAssignmentBody,
            crate::models::BulkCreateGroupRequest,
            crate::models::BulkUpdateGroupRequest,
            crate::models::AssignmentModeParam,
            crate::models::AssignmentSummaryResponse,
            crate::models::DeclareResourceTypeRequest,
            crate::models::ResourceTypeResponse,
            crate::models::ListResourceTypesResponse,
            crate::models::ResourceGrantRequest,
            crate::models::GrantResponse,
            crate::models::GrantsResponse,
            crate::models::RevokeResponse,
            crate::models::GroupPermissionsResponse,
            crate::models::PermissionViewResponse,
            crate::models::UserPermissionsResponse,
            crate::models::UserResourcesResponse,
            crate::models::AccessCheckRequest,
            crate::models::AccessCheckResponse,
        )
    ),
    tags(
        (name = "health", description = "Health and monitoring endpoints"),
        (name = "authorization", description = "Caller identity"),
        (name = "groups", description = "Access group management"),
        (name = "bulk", description = "Transactional bulk assignment"),
        (name = "permissions", description = "Permission management"),
        (name = "resources", description = "Resource-level permissions"),
        (name = "users", description = "Per-user resolution"),
        (name = "cache", description = "Permission cache control"),
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    )
)]
pub struct ApiDoc;

/// Create the application router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/me", get(handlers::whoami))
        // Access groups
        .route(
            "/groups",
            get(handlers::find_group).post(handlers::create_group),
        )
        .route(
            "/groups/:id",
            get(handlers::get_group)
                .put(handlers::update_group)
                .delete(handlers::delete_group),
        )
        .route(
            "/groups/:id/members",
            get(handlers::list_members).post(handlers::add_member),
        )
        .route("/groups/:id/members/:user_id", delete(handlers::remove_member))
        .route(
            "/groups/:id/permissions",
            get(handlers::list_group_permissions).post(handlers::assign_permission),
        )
        .route(
            "/groups/:id/permissions/:permission_id",
            delete(handlers::unassign_permission),
        )
        .route("/groups/:id/view", get(handlers::group_view))
        .route("/groups/:id/grants", post(handlers::grant_resources))
        .route("/groups/:id/grants/revoke", post(handlers::revoke_resources))
        // Bulk assignment
        .route("/bulk/groups", post(handlers::bulk_create_group))
        .route("/bulk/groups/:id", put(handlers::bulk_update_group))
        // Permissions
        .route(
            "/permissions",
            get(handlers::find_permission).post(handlers::create_permission),
        )
        .route("/permissions/:id", get(handlers::get_permission))
        .route(
            "/permissions/:id/resource-types",
            get(handlers::list_resource_types).post(handlers::declare_resource_type),
        )
        .route(
            "/permissions/:id/resource-types/:name",
            delete(handlers::revoke_resource_type),
        )
        // Users
        .route("/users/:id/permissions", get(handlers::user_permissions))
        .route("/users/:id/groups", get(handlers::user_groups))
        .route("/users/:id/resources", get(handlers::user_resources))
        .route("/users/:id/access", post(handlers::check_access))
        // Cache
        .route("/cache", delete(handlers::clear_cache))
        .route("/cache/users/:id", delete(handlers::clear_user_cache));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::authorization_middleware,
        ))
        .with_state(state)
        // Middleware layers (executed bottom to top)
        .layer(axum_middleware::from_fn(middleware::error_handling_middleware))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;
    use warden_authz::store::InMemoryEntityStore;
    use warden_authz::{AccessConfig, AccessControl, JwtVerifier};

    async fn create_test_state() -> Arc<AppState> {
        let access = AccessControl::new(
            AccessConfig::default(),
            Arc::new(InMemoryEntityStore::new()),
            Arc::new(JwtVerifier::hs256("test-secret")),
        )
        .await
        .unwrap();
        Arc::new(AppState::new(access))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(create_test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(create_test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_swagger_ui() {
        let app = create_router(create_test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_found() {
        let app = create_router(create_test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
