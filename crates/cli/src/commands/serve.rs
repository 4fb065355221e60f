//! `voxline serve`: start the call WebSocket server.

use voxline_config::AppConfig;

pub async fn run(mut config: AppConfig, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("voxline gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Calls:     ws://{}:{}/llm-websocket/<call_id>", config.gateway.host, config.gateway.port);
    println!("   Records:   {}", config.records.backend);

    voxline_gateway::start(config).await?;

    Ok(())
}
