use rocket::{http::Status, serde::json::Json, Catcher, Request, Route};

use crate::error::ErrorBody;
use crate::model::api::auth::GuardFailure;

mod auth;
mod common;
mod import;
mod nomination;
mod voting;

#[cfg(test)]
pub(crate) mod testing;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(import::routes());
    routes.extend(nomination::routes());
    routes.extend(voting::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Render every unhandled status as a `{ "message": ... }` body. Failed
/// credential guards leave their message in the request cache.
#[catch(default)]
fn default_catcher(status: Status, req: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let guard_message = match status.code {
        401 | 403 => req.local_cache(|| GuardFailure(None)).0.clone(),
        _ => None,
    };
    let message = guard_message.unwrap_or_else(|| match status.code {
        404 => "Route not found".to_string(),
        500..=599 => "Server error".to_string(),
        _ => status.reason_lossy().to_string(),
    });
    (status, Json(ErrorBody::new(message)))
}
