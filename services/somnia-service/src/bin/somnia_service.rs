use anyhow::Result;
use axum::Router;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use somnia_api::{
    auth_routes, counseling_routes, game_routes, psychology_routes, setup_tracing, GlobalState,
};
use somnia_common::EnvVars;
use somnia_database::{get_db, MongoDbEnv};
use somnia_runtime::{ensure_indexes, GameEngine};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    setup_tracing();

    let cors = CorsLayer::very_permissive();
    let trace = TraceLayer::new_for_http();

    let env = MongoDbEnv::load();
    let db = get_db(
        &env.get_env_var("MONGODB_URI"),
        &env.get_env_var("MONGODB_DB_NAME"),
    )
    .await?;
    ensure_indexes(&db).await?;

    let global_state = GlobalState::new(GameEngine::new(db));

    let app = Router::new()
        .merge(auth_routes())
        .merge(game_routes())
        .merge(psychology_routes())
        .merge(counseling_routes())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(120)))
        .layer(cors)
        .layer(trace)
        .with_state(global_state);

    let port: u16 = std::env::var("PORT")
        .unwrap_or("3033".into())
        .parse()
        .expect("failed to convert to number");

    let listener = tokio::net::TcpListener::bind(format!(":::{port}")).await?;

    tracing::info!("LISTENING ON {port}");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
