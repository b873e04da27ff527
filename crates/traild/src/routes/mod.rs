pub mod agents;
pub mod capabilities;
pub mod events;
pub mod health;
pub mod reputation;

use axum::Router;

use crate::state::AppState;

/// Build the full application router.
///
/// All routes live under `/api`. Authentication is enforced per handler:
/// administrative mutations take the service key, event appends take a
/// per-request agent signature, reads are public (payloads are public by
/// construction).
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(agents::router())
        .merge(events::router())
        .merge(capabilities::router())
        .merge(reputation::router())
        .with_state(state)
}
