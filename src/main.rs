mod config;
mod handlers;
mod models;
mod services;
#[cfg(feature = "web-server")]
mod web; // HTTP front end

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;

use config::Config;
use handlers::{console, AppController};
use services::GeminiService;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables first so RUST_LOG from .env applies
    dotenv().ok();

    // Initialize logger
    env_logger::init();

    log::info!("🚀 Starting NutriScan AI...");

    let config = Config::from_env()?;

    let gemini = Arc::new(GeminiService::with_base_url(
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
    ));
    log::info!("✅ Gemini service initialized with model: {}", config.model);

    let mut controller = AppController::new(gemini.clone(), gemini);

    let serve = std::env::args().nth(1).as_deref() == Some("serve");
    if serve {
        run_server(controller, &config.web_addr).await
    } else {
        console::run(&mut controller).await
    }
}

#[cfg(feature = "web-server")]
async fn run_server(controller: AppController, addr: &str) -> Result<()> {
    let app = web::server::create_router(controller);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("🌐 Web server listening on {}", addr);
    println!("\n🥗 NutriScan AI 已启动: http://{}", addr);
    println!("🛑 按 Ctrl+C 停止\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    log::info!("🛑 Shutting down...");
    Ok(())
}

#[cfg(not(feature = "web-server"))]
async fn run_server(_controller: AppController, _addr: &str) -> Result<()> {
    anyhow::bail!("built without the web-server feature; rebuild with --features web-server")
}
