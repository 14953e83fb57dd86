use axum::Router;

pub mod auth;
pub mod menus;
pub mod permissions;
pub mod roles;
pub mod system;
pub mod users;

/// Endpoints reachable without a bearer token.
pub fn public_router() -> Router {
    auth::public_router()
}

/// Endpoints behind the bearer middleware.
pub fn protected_router() -> Router {
    auth::router()
        .nest("/users", users::router())
        .nest("/roles", roles::router())
        .nest("/permissions", permissions::router())
        .nest("/menus", menus::router())
}
