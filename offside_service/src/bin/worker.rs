use offside_service::{config, logging::setup_worker_logging, worker};
use std::path::PathBuf;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let image_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .ok_or("usage: offside-worker <image-path>")?;

    let config = config::get_configuration()?;
    setup_worker_logging(&config.log_level);

    worker::run(config, &image_path).await?;

    Ok(())
}
