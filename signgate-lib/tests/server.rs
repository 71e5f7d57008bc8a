mod common;

use common::TestResult;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use signgate_lib::background::{BackgroundDispatcher, DispatcherHandle};
use signgate_lib::clock::SystemClock;
use signgate_lib::config::load_from_str;
use signgate_lib::identity::hash_credential;
use signgate_lib::server::{serve, ServeOptions, ServerState, SignerClient};
use signgate_lib::store::{MemoryStore, StoreHandles};
use signgate_lib::telemetry::metrics::noop_metrics;
use signgate_lib::Gateway;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Signer double: echoes the scope it was handed, `/fail` answers 500
async fn stub_signer(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.uri().path() == "/fail" {
        let mut resp = Response::new(Full::new(Bytes::from_static(b"boom")));
        *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(resp);
    }
    let scope = req
        .headers()
        .get("x-signgate-scope")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_string();
    Ok(Response::new(Full::new(Bytes::from(format!("signed for {scope}")))))
}

async fn spawn_stub_signer() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(stub_signer))
                    .await;
            });
        }
    });
    Ok(addr)
}

/// Address nothing listens on
async fn closed_port() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    listener.local_addr()
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<signgate_lib::Result<()>>,
    _background: DispatcherHandle,
}

async fn start_gateway(signer: SocketAddr) -> Result<Running, Box<dyn std::error::Error + Send + Sync>> {
    let cfg = load_from_str(&format!(
        r#"
listen = "127.0.0.1:0"

[signer]
address = "{signer}"
timeout_ms = 2000

[tiers.free]
daily = 1000
hourly = 1000
burst = 2
burst_window_secs = 60

[[credentials]]
key_sha256 = "{key}"
credential_id = "key-1"
account_id = "acme"
"#,
        key = hash_credential("sk_test_server"),
    ))?;

    let metrics = Some(noop_metrics());
    let (dispatcher, background) = BackgroundDispatcher::spawn("test", 64, 1, metrics.clone());
    let gateway = Gateway::from_config(
        &cfg,
        &StoreHandles::new(Arc::new(MemoryStore::new(100))),
        dispatcher,
        Arc::new(SystemClock),
        metrics.clone(),
    );
    let state = Arc::new(ServerState {
        gateway: Arc::new(gateway),
        signer: SignerClient::new(&cfg.signer, &cfg.timeout, metrics.clone()),
        metrics,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let options = ServeOptions {
        max_connections: 16,
        connection_timeout: Duration::from_secs(10),
        shutdown_timeout: Duration::from_secs(2),
    };
    let server = tokio::spawn(serve(listener, state, options, shutdown.clone()));

    Ok(Running { addr, shutdown, server, _background: background })
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(self) -> TestResult {
        self.shutdown.cancel();
        self.server.await??;
        Ok(())
    }
}

#[tokio::test]
async fn admitted_request_reaches_signer_with_limit_headers() -> TestResult {
    let gw = start_gateway(spawn_stub_signer().await?).await?;

    let resp = reqwest::get(gw.url("/sign")).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers().get("x-ratelimit-limit").map(|v| v.as_bytes()), Some(&b"2"[..]));
    assert_eq!(resp.headers().get("x-ratelimit-window").map(|v| v.as_bytes()), Some(&b"burst"[..]));
    assert_eq!(resp.text().await?, "signed for ip:127.0.0.1");

    gw.stop().await
}

#[tokio::test]
async fn exhausted_burst_answers_429_with_json_body() -> TestResult {
    let gw = start_gateway(spawn_stub_signer().await?).await?;
    let client = reqwest::Client::new();

    let mut denied = None;
    for _ in 0..20 {
        let resp = client.get(gw.url("/sign")).send().await?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            denied = Some(resp);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let resp = denied.ok_or("burst limit never enforced")?;

    assert!(resp.headers().contains_key("retry-after"));
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"], "rate limit exceeded");
    assert_eq!(body["window"], "burst");
    assert!(body["retry_after_secs"].as_i64().is_some_and(|s| (0..=60).contains(&s)));

    gw.stop().await
}

#[tokio::test]
async fn account_credential_bypasses_anonymous_limits() -> TestResult {
    let gw = start_gateway(spawn_stub_signer().await?).await?;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let resp = client.get(gw.url("/sign")).header("x-api-key", "sk_test_server").send().await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await?, "signed for account:acme");
    }

    gw.stop().await
}

#[tokio::test]
async fn unknown_credential_is_401_without_detail() -> TestResult {
    let gw = start_gateway(spawn_stub_signer().await?).await?;

    let resp = reqwest::Client::new()
        .get(gw.url("/sign"))
        .header("x-api-key", "sk_nope")
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"], "invalid credential");

    gw.stop().await
}

#[tokio::test]
async fn signer_errors_pass_through() -> TestResult {
    let gw = start_gateway(spawn_stub_signer().await?).await?;
    let resp = reqwest::get(gw.url("/fail")).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    gw.stop().await
}

#[tokio::test]
async fn unreachable_signer_is_502() -> TestResult {
    let gw = start_gateway(closed_port().await?).await?;

    let resp = reqwest::get(gw.url("/sign")).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"], "signing backend unavailable");

    gw.stop().await
}
