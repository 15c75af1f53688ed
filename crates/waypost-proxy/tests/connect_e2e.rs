//! A control server, a proxy and an echo target on real loopback listeners.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use waypost_auth::{AuthorityConfig, RevocationRegistry, TokenAuthority, UnverifiedToken};
use waypost_control::{ControlServer, ControlServerConfig};
use waypost_fleet::MemoryFleetDirectory;
use waypost_proxy::{ControlClient, ControlConfig, ProxyConfig, ProxyError, ProxyService};

const ADMIN_SECRET: &str = "e2e-admin";

async fn spawn_control() -> String {
    let fleet = Arc::new(MemoryFleetDirectory::new());
    let authority = Arc::new(TokenAuthority::new(AuthorityConfig::default(), fleet.clone()));
    let server = ControlServer::new(
        ControlServerConfig {
            admin_secret: Some(ADMIN_SECRET.to_string()),
            ..ControlServerConfig::default()
        },
        authority,
        fleet,
        Arc::new(RevocationRegistry::new()),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    format!("http://{}", addr)
}

async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

struct Harness {
    control_url: String,
    control: ControlClient,
    proxy: SocketAddr,
    service: Arc<ProxyService>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), ProxyError>>,
}

async fn harness() -> Harness {
    let control_url = spawn_control().await;
    let mut config = ProxyConfig {
        control: Some(ControlConfig {
            url: control_url.clone(),
            shared_secret: ADMIN_SECRET.to_string(),
        }),
        insecure: true,
        revocation_sync_interval: Duration::from_secs(3600),
        ..ProxyConfig::default()
    };
    config.server.proxy_url = "https://proxy.e2e.test:8443".to_string();
    config.server.city = "Berlin".to_string();
    config.server.country = "DE".to_string();

    let service = Arc::new(ProxyService::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(service.clone().run(listener, shutdown.clone()));

    let control = ControlClient::new(control_url.clone(), ADMIN_SECRET).unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while control.servers().await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("proxy never registered");

    Harness {
        control_url,
        control,
        proxy,
        service,
        shutdown,
        handle,
    }
}

async fn fetch_token(control_url: &str) -> String {
    let body: Value = reqwest::get(format!("{}/api/v1/token", control_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["token"].as_str().unwrap().to_string()
}

/// Send a CONNECT and return the status line plus the stream positioned
/// after the response head.
async fn connect(
    proxy: SocketAddr,
    target: &str,
    token: Option<&str>,
) -> (String, BufReader<TcpStream>) {
    let stream = TcpStream::connect(proxy).await.unwrap();
    let mut stream = BufReader::new(stream);

    let auth = token
        .map(|token| format!("Proxy-Authorization: Bearer {token}\r\n"))
        .unwrap_or_default();
    stream
        .get_mut()
        .write_all(format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n{auth}\r\n").as_bytes())
        .await
        .unwrap();

    let mut status = String::new();
    stream.read_line(&mut status).await.unwrap();
    loop {
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        if line == "\r\n" || line.is_empty() {
            break;
        }
    }
    (status, stream)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_through_authorized_tunnel() {
    let harness = harness().await;
    let echo = spawn_echo().await;
    let token = fetch_token(&harness.control_url).await;

    let (status, mut stream) = connect(harness.proxy, &echo.to_string(), Some(&token)).await;
    assert!(status.starts_with("HTTP/1.1 200"), "status: {status}");

    stream.get_mut().write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_token_rejected() {
    let harness = harness().await;
    let echo = spawn_echo().await;

    let (status, _) = connect(harness.proxy, &echo.to_string(), None).await;
    assert!(status.starts_with("HTTP/1.1 401"), "status: {status}");
    assert_eq!(harness.service.engine().active_tunnels(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_revoked_token_rejected_after_sync() {
    let harness = harness().await;
    let echo = spawn_echo().await;
    let token = fetch_token(&harness.control_url).await;
    let jti = UnverifiedToken::parse(&token)
        .unwrap()
        .claims()
        .unwrap()
        .jti
        .unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/revoke", harness.control_url))
        .bearer_auth(ADMIN_SECRET)
        .json(&json!({ "jti": jti }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Not yet mirrored locally
    let (status, _) = connect(harness.proxy, &echo.to_string(), Some(&token)).await;
    assert!(status.starts_with("HTTP/1.1 200"), "status: {status}");

    assert_eq!(harness.service.sync_revocations().await.unwrap(), 1);
    assert!(harness.service.revocations().is_revoked(&jti));

    let (status, _) = connect(harness.proxy, &echo.to_string(), Some(&token)).await;
    assert!(status.starts_with("HTTP/1.1 401"), "status: {status}");

    // Already known, nothing new
    assert_eq!(harness.service.sync_revocations().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_target_is_bad_gateway() {
    let harness = harness().await;
    let token = fetch_token(&harness.control_url).await;

    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = closed.local_addr().unwrap();
    drop(closed);

    let (status, _) = connect(harness.proxy, &target.to_string(), Some(&token)).await;
    assert!(status.starts_with("HTTP/1.1 502"), "status: {status}");
    assert_eq!(harness.service.engine().active_tunnels(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_deregisters() {
    let harness = harness().await;
    let servers = harness.control.servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].proxy_url, "https://proxy.e2e.test:8443");

    harness.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), harness.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(harness.control.servers().await.unwrap().is_empty());
    assert!(harness.control.alive().await);
}
