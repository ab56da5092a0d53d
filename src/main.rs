mod config;
mod error;
mod handlers;
mod models;
mod services;
mod upload; // HTTP endpoint for the scanner app

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;

use config::Config;
use handlers::{run_packet_listener, ScanHandler};
use services::{FoodClassifier, MistralService, ModelHandle, NutritionEnricher, OnnxFoodClassifier, RelayClient, TransientSlot};
use upload::server::create_scan_router;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    log::info!("🚀 Starting Food Scan Nutrition Server...");

    let config = Config::from_env()?;

    // The model loads once; a failure is remembered and every scan reports it
    let model = Arc::new(ModelHandle::new(
        config.classifier.model_path.clone(),
        config.classifier.labels_path.clone(),
    ));
    let warm = model.clone();
    match tokio::task::spawn_blocking(move || warm.warm_up()).await? {
        Ok(labels) => log::info!(
            "✅ Classifier {} loaded with {} labels",
            config.classifier.model_id,
            labels
        ),
        Err(e) => log::error!("❌ Classifier {} unavailable: {}", config.classifier.model_id, e),
    }
    let classifier: Arc<dyn FoodClassifier> = Arc::new(OnnxFoodClassifier::new(model));

    let enricher: Arc<dyn NutritionEnricher> = Arc::new(MistralService::new(&config.llm)?);
    log::info!("✅ Mistral service initialized with model: {}", config.llm.model);

    let relay = match &config.relay_url {
        Some(url) => {
            let client = RelayClient::new(url.clone(), config.relay_timeout)?;
            log::info!("✅ Relaying nutrition records to {}", client.url());
            Some(Arc::new(client))
        }
        None => {
            log::info!("ℹ️ Relay disabled");
            None
        }
    };

    let (slot, jobs) = TransientSlot::new(config.spool_path.clone(), config.slot_policy);
    let handler = Arc::new(ScanHandler::new(classifier, enricher, relay));
    tokio::spawn(handler.run(jobs));
    log::info!(
        "✅ Scan worker started (spool: {}, policy: {:?})",
        config.spool_path.display(),
        config.slot_policy
    );

    if let Some(addr) = &config.packet_addr {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tokio::spawn(run_packet_listener(listener, slot.clone(), config.max_body_bytes));
    }

    let app = create_scan_router(slot.clone(), config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    log::info!("🌐 HTTP server starting on {}", config.http_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("❌ HTTP server stopped: {}", e);
        }
    });

    log::info!("🎉 Server is ready!");
    println!("\n📸 POST an image to http://{}/", config.http_addr);
    if let Some(addr) = &config.packet_addr {
        println!("📡 Raw image packets: {}", addr);
    }
    println!("\n🛑 Press Ctrl+C to stop\n");

    // Keep running
    tokio::signal::ctrl_c().await?;

    log::info!("🛑 Shutting down...");
    slot.shutdown().await;

    Ok(())
}
