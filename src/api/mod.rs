/// API routes and handlers
pub mod admin;
pub mod auth;
pub mod committee;
pub mod user;

use crate::{context::AppContext, csrf::require_csrf};
use axum::{middleware, Router};

/// Build API routes
///
/// Member and admin routes sit behind the CSRF check; the auth routes run
/// before a session (and so a CSRF token) exists.
pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    let protected = Router::new()
        .merge(user::routes())
        .merge(admin::routes())
        .merge(committee::admin_routes())
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_csrf));

    Router::new()
        .merge(auth::routes(ctx))
        .merge(committee::public_routes())
        .merge(protected)
}
