mod auth;
mod counseling;
mod game;
mod psychology;

pub use auth::auth_routes;
pub use counseling::counseling_routes;
pub use game::game_routes;
pub use psychology::psychology_routes;
