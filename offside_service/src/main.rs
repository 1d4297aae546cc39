use offside_service::{config, logging::setup_logging, start_app};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration()?;
    setup_logging(&config.log_level);

    start_app(config).await?;

    Ok(())
}
