use clap::Parser;
use personalization_api::{PersonalizationServer, ServerArgs, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("p13n=info")).init();

    let config = ServerConfig::from(ServerArgs::parse());
    log::info!(target: "p13n", version = env!("CARGO_PKG_VERSION"), addr = config.bind_addr.to_string().as_str(); "starting personalization API");

    let server = PersonalizationServer::start(config).await?;
    server.run().await?;

    Ok(())
}
