/// API routes and handlers
pub mod admin;
pub mod ai;
pub mod auth;
pub mod billing;
pub mod extract;
pub mod gateway;
pub mod health;
pub mod keys;
pub mod middleware;
pub mod notify;
pub mod referral;
pub mod telegram;
pub mod twofa;
pub mod user;

use crate::context::AppContext;
use axum::{middleware::{from_fn, from_fn_with_state}, Router};

/// Build API routes.
///
/// Four groups, each with its own gate:
/// public (none), session (JWT), admin (JWT then role check) and
/// gateway (raw API key).
pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    let public = Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .merge(billing::public_routes())
        .merge(keys::public_routes())
        .merge(telegram::routes());

    let session = Router::new()
        .merge(user::routes())
        .merge(keys::routes())
        .merge(billing::routes())
        .merge(ai::routes())
        .merge(twofa::routes())
        .merge(referral::routes())
        .merge(notify::routes())
        .route_layer(from_fn_with_state(ctx.clone(), middleware::require_jwt));

    // route_layer runs last-added first: JWT, then the role check
    let admin = admin::routes()
        .route_layer(from_fn(middleware::require_admin))
        .route_layer(from_fn_with_state(ctx.clone(), middleware::require_jwt));

    let gateway = gateway::routes()
        .route_layer(from_fn_with_state(ctx.clone(), middleware::require_api_key));

    Router::new()
        .merge(public)
        .merge(session)
        .merge(admin)
        .merge(gateway)
}
