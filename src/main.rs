mod auth;
mod config;
mod db;
mod element;
mod frame;
mod hub;
mod routes;
mod session;
mod state;
mod store;

use std::sync::Arc;

use crate::store::PgElementStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env().expect("configuration");

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");
    let store = Arc::new(PgElementStore::new(pool, config.store_deadline));

    let port = config.port;
    let state = state::AppState::new(config, store);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "designhub listening");
    axum::serve(listener, app).await.expect("server failed");
}
