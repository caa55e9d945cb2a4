use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::time::Instant;

pub const PORT: u16 = 8090;

static INIT: Once = Once::new();

/// Start one server for the whole test binary and wait until it answers
/// health checks. The server runs on its own runtime thread so it
/// outlives any individual test's runtime.
pub async fn start_server() -> Result<()> {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let runtime = tokio::runtime::Runtime::new().expect("failed to build test runtime");
            let addr = SocketAddr::from(([127, 0, 0, 1], PORT));
            runtime
                .block_on(pairrank_router::run(addr, 2_000_000, None))
                .expect("server exited");
        });
    });

    check_health(PORT, Duration::from_secs(30)).await
}

async fn check_health(port: u16, timeout: Duration) -> Result<()> {
    let addr = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::ClientBuilder::new()
        .timeout(timeout)
        .build()
        .unwrap();

    let start = Instant::now();
    loop {
        if client.get(&addr).send().await.is_ok() {
            return Ok(());
        }
        if start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        } else {
            anyhow::bail!("Server is not healthy");
        }
    }
}

pub fn url(path: &str) -> String {
    format!("http://127.0.0.1:{PORT}{path}")
}

/// POST a file as multipart/form-data under the `file` field.
pub async fn post_file(
    client: &reqwest::Client,
    path: &str,
    data: Vec<u8>,
) -> Result<reqwest::Response> {
    let part = reqwest::multipart::Part::bytes(data).file_name("items.csv");
    let form = reqwest::multipart::Form::new().part("file", part);
    Ok(client.post(url(path)).multipart(form).send().await?)
}
