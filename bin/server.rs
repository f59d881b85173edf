// School Fee Portal - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use fee_portal::api::{build_router, AppState};
use fee_portal::config::{init_tracing, PortalConfig};
use fee_portal::{fees, setup_database};
use rusqlite::Connection;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = PortalConfig::from_env();
    init_tracing(config.log_json);

    println!("🌐 School Fee Portal - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open database at {}", config.db_path))?;
    setup_database(&conn)?;
    let seeded = fees::seed_school_fees(&conn)?;
    info!(db = %config.db_path, seeded, "database ready");
    println!("✓ Database opened: {}", config.db_path);

    let addr = config.bind_addr.clone();
    let app = build_router(AppState::new(conn, config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/health", addr);
    println!("\n   Press Ctrl+C to stop\n");
    info!(%addr, "server listening");

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;
    Ok(())
}
