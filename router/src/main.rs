use anyhow::{Context, Result};
use axum::http::HeaderValue;
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tower_http::cors::AllowOrigin;

/// App Configuration
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// The IP address to listen on
    #[clap(default_value = "0.0.0.0", long, env)]
    hostname: String,

    /// The port to listen on.
    #[clap(default_value = "5000", long, short, env)]
    port: u16,

    /// Payload size limit in bytes
    ///
    /// Default is 2MB
    #[clap(default_value = "2000000", long, env)]
    payload_limit: usize,

    /// Allowed CORS origins. Defaults to allowing every origin, which
    /// matches a browser client served from an arbitrary dev host.
    #[clap(long, env)]
    cors_allow_origin: Option<Vec<String>>,

    /// Outputs the logs in JSON format (useful for telemetry)
    #[clap(long, env)]
    json_output: bool,

    // Whether or not to include the log trace through spans
    #[clap(long, env)]
    disable_spans: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pattern match configuration
    let args: Args = Args::parse();

    // Initialize logging
    pairrank_router::logging::init_logging(args.json_output, args.disable_spans);

    tracing::info!("{args:?}");

    let allow_origin = args
        .cors_allow_origin
        .map(|origins| {
            let origins = origins
                .into_iter()
                .map(|origin| {
                    origin
                        .parse::<HeaderValue>()
                        .with_context(|| format!("invalid CORS origin `{origin}`"))
                })
                .collect::<Result<Vec<HeaderValue>>>()?;
            Ok::<AllowOrigin, anyhow::Error>(AllowOrigin::list(origins))
        })
        .transpose()?;

    let addr = match format!("{}:{}", args.hostname, args.port).parse() {
        Ok(addr) => addr,
        Err(_) => {
            tracing::warn!("Invalid hostname, defaulting to 0.0.0.0");
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), args.port)
        }
    };

    pairrank_router::run(addr, args.payload_limit, allow_origin)
        .await
        .map_err(|err| anyhow::anyhow!(err))?;

    Ok(())
}
