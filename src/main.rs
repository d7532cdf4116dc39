use clap::Parser;

use rtsp_simple_server::server::config::DEFAULT_CONF_PATH;
use rtsp_simple_server::{Config, Server};

#[derive(Parser)]
#[command(
    name = "rtsp-simple-server",
    version,
    about = "RTSP server that routes RTP/RTCP media from publishers to receivers"
)]
struct Args {
    /// Path to the configuration file. Use 'stdin' to read YAML from
    /// standard input.
    #[arg(default_value = DEFAULT_CONF_PATH)]
    confpath: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!("rtsp-simple-server {}", env!("CARGO_PKG_VERSION"));

    let config = match Config::load(&args.confpath) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{}", err);
            std::process::exit(1);
        }
    };

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("{}", err);
            std::process::exit(1);
        }
    };

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            handle.terminate().await;
        }
    });

    server.run().await;
}
