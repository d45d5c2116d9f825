use ab_glyph::FontArc;
use axum::serve;
use dotenvy::dotenv;
use giftlink::blend::HttpStyleBlender;
use giftlink::canvas::{bundled_font, load_font};
use giftlink::config::Config;
use giftlink::dao::PgGiftStore;
use giftlink::pipeline::SharePipeline;
use giftlink::routes::create_router;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_TRACING_LEVEL: &str = "giftlink=debug";
const DATABASE_MAX_CONNECTIONS: u32 = 20;

#[tokio::main]
async fn main() {
    _ = dotenv();
    configure_tracing();
    let config = Config::from_env().unwrap_or_else(|err| {
        tracing::error!("{}", err);
        process::exit(1);
    });
    let db_connection_pool = create_db_connection_pool(&config.database_url).await;
    let pipeline = SharePipeline::new(
        PgGiftStore::new(db_connection_pool),
        config.public_origin.clone(),
        create_style_blender(&config),
        load_poster_font(&config),
    );
    let listener = create_listener(&config.server_address).await;
    let router = create_router(Arc::new(pipeline), config.encrypted_api_key.into());
    serve(listener, router)
        .await
        .expect("Server failed to start");
}

fn configure_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or(DEFAULT_TRACING_LEVEL.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn create_db_connection_pool(database_url: &str) -> Pool<Postgres> {
    let pool = PgPoolOptions::new()
        .max_connections(DATABASE_MAX_CONNECTIONS)
        .connect(database_url)
        .await
        .expect("Creating database connection pool failed");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Running database migrations failed");
    pool
}

fn create_style_blender(config: &Config) -> Option<HttpStyleBlender> {
    let Some(endpoint) = &config.style_blender_url else {
        tracing::info!(
            "STYLE_BLENDER_URL not set, artistic QR codes fall back to the standard code"
        );
        return None;
    };
    match HttpStyleBlender::new(endpoint.as_str(), config.style_blender_token.clone()) {
        Ok(blender) => Some(blender),
        Err(err) => {
            tracing::error!("Style blender disabled: {}", err);
            None
        }
    }
}

fn load_poster_font(config: &Config) -> Option<FontArc> {
    if let Some(path) = &config.poster_font_path {
        match load_font(path) {
            Ok(font) => return Some(font),
            Err(err) => {
                tracing::error!("Font {} unusable, using the bundled font: {}", path.display(), err)
            }
        }
    }
    match bundled_font() {
        Ok(font) => Some(font),
        Err(err) => {
            tracing::error!("Poster text disabled: {}", err);
            None
        }
    }
}

async fn create_listener(server_address: &str) -> TcpListener {
    let listener = TcpListener::bind(&server_address)
        .await
        .expect("Creating tcp listener failed");
    tracing::info!("Listening on address: {}", server_address);
    listener
}
