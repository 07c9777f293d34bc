//! Black-box test fixture. Each test binary boots one real server
//! process and shares it across its #[tokio::test] functions; readiness
//! is keyed to the listen socket, which the server only opens after
//! migrations, role bootstrap and seeding have finished.

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};

const BOOT_TIMEOUT: Duration = Duration::from_secs(15);
const BOOT_POLL: Duration = Duration::from_millis(100);

pub struct Harness {
    base_url: String,
    _server: Child,
}

impl Harness {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

static HARNESS: OnceLock<Harness> = OnceLock::new();

pub async fn server() -> Result<&'static Harness> {
    let harness = HARNESS.get_or_init(|| boot().expect("could not launch the API binary"));
    await_listening(harness).await?;
    Ok(harness)
}

fn boot() -> Result<Harness> {
    let port = free_port()?;

    // Cargo exports the path of the compiled binary to integration tests;
    // everything else (DATABASE_URL, JWT_SECRET, ...) comes from the
    // inherited environment / .env, same as a real deployment.
    let server = Command::new(env!("CARGO_BIN_EXE_dispatch-api-rust"))
        .env("DISPATCH_API_PORT", port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .context("spawning the server binary")?;

    Ok(Harness {
        base_url: format!("http://127.0.0.1:{}", port),
        _server: server,
    })
}

/// Ask the OS for an ephemeral port, then hand it to the server.
fn free_port() -> Result<u16> {
    let probe = TcpListener::bind("127.0.0.1:0").context("no free port available")?;
    Ok(probe.local_addr()?.port())
}

async fn await_listening(harness: &Harness) -> Result<()> {
    let client = reqwest::Client::new();
    let started = Instant::now();

    while started.elapsed() < BOOT_TIMEOUT {
        if let Ok(response) = client.get(harness.url("/")).send().await {
            if response.status().is_success() {
                return Ok(());
            }
        }
        tokio::time::sleep(BOOT_POLL).await;
    }
    bail!(
        "server did not come up on {} within {:?}",
        harness.base_url,
        BOOT_TIMEOUT
    )
}

/// Tag usernames and company names so repeated and parallel runs never
/// collide on the unique columns.
#[allow(dead_code)]
pub fn tag(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    format!("{}-{:x}", prefix, nanos)
}
