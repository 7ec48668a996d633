// Export route modules
pub mod reply;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    reply::routes(state)
}
