use std::error::Error;
use std::time::Duration;

use clap::Parser;
use strand_http::connection::ConnectionConfig;
use strand_web::{Server, cgi};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "strand-server", version, about = "HTTP/1.1 server with CGI-style scripts and WebSocket endpoints")]
struct Args {
    /// Port to listen on, same as `--port`.
    #[arg(value_name = "PORT", conflicts_with = "port")]
    positional_port: Option<u16>,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// One of trace, debug, info, warn, error.
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Treat a request body stalled for this many milliseconds as ended.
    #[arg(long)]
    body_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder().with_writer(std::io::stderr).with_max_level(args.log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = ConnectionConfig::default();
    if let Some(millis) = args.body_timeout_ms {
        config = config.with_body_read_timeout(Duration::from_millis(millis));
    }

    let port = args.positional_port.unwrap_or(args.port);
    let server = Server::builder().router(cgi::routes()?).address((args.host.as_str(), port)).config(config).build()?;

    server.start().await?;
    Ok(())
}
