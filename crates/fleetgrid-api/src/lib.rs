//! fleetgrid-api — REST API for the fleet.
//!
//! Thin axum handlers over `FleetManager`. Every response uses the
//! `{success, data?, error?}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/players/{player_id}/join` | Route a player onto an instance |
//! | DELETE | `/api/v1/players/{player_id}` | Drop a player's assignment |
//! | GET | `/api/v1/instances` | List instances |
//! | POST | `/api/v1/instances` | Provision one instance |
//! | GET | `/api/v1/instances/{id}` | Get one instance |
//! | DELETE | `/api/v1/instances/{id}` | Stop and delete an instance |
//! | POST | `/api/v1/instances/{id}/start` | Start a stopped instance |
//! | POST | `/api/v1/instances/{id}/stop` | Stop an instance |
//! | POST | `/api/v1/instances/{id}/players` | Report connected players |
//! | POST | `/api/v1/fleet/scale` | Scale the fleet to a target size |
//! | GET | `/api/v1/fleet/status` | Fleet counts |
//! | POST | `/api/v1/fleet/reconcile` | Reconcile against the panel now |
//! | GET | `/api/v1/queue` | Player assignments |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use fleetgrid_manager::FleetManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<FleetManager>,
}

/// Build the API router.
pub fn build_router(manager: Arc<FleetManager>) -> Router {
    let state = ApiState { manager };

    let api_routes = Router::new()
        .route("/players/{player_id}/join", post(handlers::join))
        .route("/players/{player_id}", delete(handlers::leave))
        .route("/instances", get(handlers::list_instances).post(handlers::create_instance))
        .route("/instances/{id}", get(handlers::get_instance).delete(handlers::delete_instance))
        .route("/instances/{id}/start", post(handlers::start_instance))
        .route("/instances/{id}/stop", post(handlers::stop_instance))
        .route("/instances/{id}/players", post(handlers::report_players))
        .route("/fleet/scale", post(handlers::scale_fleet))
        .route("/fleet/status", get(handlers::fleet_status))
        .route("/fleet/reconcile", post(handlers::reconcile))
        .route("/queue", get(handlers::list_queue))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
