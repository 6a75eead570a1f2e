mod env;
mod global_state;
mod middleware;
mod response;
mod routes;
mod utils;

pub use routes::{auth_routes, counseling_routes, game_routes, psychology_routes};

pub use env::ApiServerEnv;
pub use global_state::GlobalState;
pub use middleware::authenticate;
pub use response::{AppError, AppSuccess};
pub use utils::setup_tracing;
