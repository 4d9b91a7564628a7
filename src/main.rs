// src/main.rs
mod anneal;
mod api;
mod bvh;
mod config;
mod geometry;
mod model;
mod optimizer;
mod types;

use config::AppConfig;

#[tokio::main]
async fn main() {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("⚠️ Could not load .env: {}", err);
        }
    }

    // after .env so RUST_LOG can come from there
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_config = AppConfig::from_env();
    let api_config = app_config.api.clone();
    let optimizer_config = app_config.optimizer.clone();

    println!("🚀 Solid packing service starting...");
    api::start_api_server(api_config, optimizer_config).await;
}
