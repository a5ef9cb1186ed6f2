use finance_api::create_app;
use once_cell::sync::Lazy;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// --- Configuration using once_cell::sync::Lazy ---
// Completion settings (API key, model, token bounds) are read by CompletionConfig::from_env.
static API_BASE_URL: Lazy<String> =
    Lazy::new(|| env::var("API_BASE_URL").unwrap_or_else(|_| "127.0.0.1:3030".to_string()));

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // if we don't init tracing, we won't be able to see the env results
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "finance_api=debug,tower_http=debug,finance_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match dotenvy::dotenv().ok() {
        Some(path) => tracing::info!(".env file loaded successfully from: {:?}", path),
        None => tracing::warn!(
            "Could not load .env file or it was already loaded. This is fine if variables are set externally."
        ),
    }

    let app = create_app(None).await?;

    let listener = tokio::net::TcpListener::bind(API_BASE_URL.as_str()).await?;
    tracing::debug!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
