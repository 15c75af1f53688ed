//! Waypost CLI
//!
//! Runs either a control server (key rotation, token issuance, fleet registry,
//! revocation) or a proxy node (token-gated CONNECT tunnels).

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use waypost_auth::{
    encode_unsigned, AuthorityConfig, Capability, RevocationRegistry, SigningKey, TokenAuthority,
    TokenClaims, TokenId,
};
use waypost_control::{ControlServer, ControlServerConfig};
use waypost_fleet::MemoryFleetDirectory;
use waypost_proxy::{ControlConfig, ProxyConfig, ProxyService};

/// Waypost - token-gated CONNECT proxies and their control server
#[derive(Parser, Debug)]
#[command(name = "waypost")]
#[command(about = "Waypost - token-gated CONNECT proxies and their control server")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control server
    #[command(long_about = r#"
Run the control server: rotates the signing key, issues capability tokens,
keeps the proxy fleet registry and the revocation list.

EXAMPLES:
  waypost control --bind 0.0.0.0:8080 --admin-secret $SECRET

ENVIRONMENT VARIABLES:
  WAYPOST_CONTROL_BIND        Address to bind
  WAYPOST_ADMIN_SECRET        Shared secret for admin routes
  WAYPOST_TOKEN_VALIDITY      Token lifetime in seconds
  WAYPOST_TOKEN_CAPABILITIES  Comma-separated capabilities granted
    "#)]
    Control {
        /// Address to bind
        #[arg(long, env = "WAYPOST_CONTROL_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Shared secret for admin routes (admin routes are open without it)
        #[arg(long, env = "WAYPOST_ADMIN_SECRET")]
        admin_secret: Option<String>,

        /// `iss` claim of issued tokens
        #[arg(long, env = "WAYPOST_ISSUER", default_value = "waypost-control")]
        issuer: String,

        /// Token lifetime in seconds
        #[arg(long, env = "WAYPOST_TOKEN_VALIDITY", default_value = "3600")]
        token_validity: i64,

        /// Capabilities granted by issued tokens
        #[arg(
            long,
            env = "WAYPOST_TOKEN_CAPABILITIES",
            value_delimiter = ',',
            default_value = "connect-tcp"
        )]
        token_capabilities: Vec<Capability>,

        /// Signing key lifetime in hours
        #[arg(long, env = "WAYPOST_KEY_VALIDITY_HOURS", default_value = "24")]
        key_validity_hours: i64,

        /// Hours a retired key stays published
        #[arg(long, env = "WAYPOST_KEY_GRACE_HOURS", default_value = "25")]
        key_grace_hours: i64,

        /// Seconds before an unrenewed server registration expires
        #[arg(long, env = "WAYPOST_SERVER_TTL")]
        server_ttl: Option<i64>,
    },

    /// Run a proxy node
    #[command(long_about = r#"
Run a proxy node accepting CONNECT requests authorized by capability tokens.

EXAMPLES:
  # Register with a control server
  waypost proxy --listen 0.0.0.0:8443 \
    --control-url https://control.example.com \
    --shared-secret $SECRET \
    --proxy-url https://proxy.example.com:8443 \
    --city Berlin --country DE --latitude 52.52 --longitude 13.405

ENVIRONMENT VARIABLES:
  WAYPOST_LISTEN               Address to bind
  WAYPOST_CONTROL_URL          Control server base URL
  WAYPOST_CONTROL_SECRET       Control server shared secret
  WAYPOST_PROXY_URL            URL published in the fleet listing
  WAYPOST_ADMIN_ADDR           Local admin listener address
  WAYPOST_ADMIN_SECRET         Local admin listener secret
  WAYPOST_INSECURE             Allow plain-http control server
    "#)]
    Proxy {
        /// Address to bind
        #[arg(long, env = "WAYPOST_LISTEN", default_value = "0.0.0.0:8443")]
        listen: SocketAddr,

        /// Control server base URL
        #[arg(long, env = "WAYPOST_CONTROL_URL")]
        control_url: Option<String>,

        /// Control server shared secret
        #[arg(long, env = "WAYPOST_CONTROL_SECRET", default_value = "")]
        shared_secret: String,

        /// URL of this proxy as published in the fleet listing
        #[arg(long, env = "WAYPOST_PROXY_URL", default_value = "https://proxy.example.com")]
        proxy_url: String,

        #[arg(long, env = "WAYPOST_LATITUDE", default_value = "0", allow_hyphen_values = true)]
        latitude: f64,

        #[arg(long, env = "WAYPOST_LONGITUDE", default_value = "0", allow_hyphen_values = true)]
        longitude: f64,

        #[arg(long, env = "WAYPOST_CITY", default_value = "Unknown")]
        city: String,

        #[arg(long, env = "WAYPOST_COUNTRY", default_value = "Unknown")]
        country: String,

        #[arg(long, env = "WAYPOST_SUPPORTS_CONNECT_TCP", default_value_t = true, action = ArgAction::Set)]
        supports_connect_tcp: bool,

        #[arg(long, env = "WAYPOST_SUPPORTS_CONNECT_UDP", default_value_t = false, action = ArgAction::Set)]
        supports_connect_udp: bool,

        #[arg(long, env = "WAYPOST_SUPPORTS_CONNECT_IP", default_value_t = false, action = ArgAction::Set)]
        supports_connect_ip: bool,

        /// Capabilities every tunnel request must carry
        #[arg(
            long,
            env = "WAYPOST_REQUIRED_CAPABILITIES",
            value_delimiter = ',',
            default_value = "connect-tcp"
        )]
        required_capabilities: Vec<Capability>,

        /// Local admin listener exposing POST /revoke
        #[arg(long, env = "WAYPOST_ADMIN_ADDR")]
        admin_addr: Option<SocketAddr>,

        /// Local admin listener secret
        #[arg(long, env = "WAYPOST_ADMIN_SECRET")]
        admin_secret: Option<String>,

        /// Allow a plain-http control server and an open admin listener
        #[arg(long, env = "WAYPOST_INSECURE")]
        insecure: bool,

        /// Accept unsigned (alg: none) tokens. Development only.
        #[arg(long, env = "WAYPOST_ALLOW_UNSIGNED")]
        allow_unsigned: bool,

        /// Seconds between revocation list pulls
        #[arg(long, env = "WAYPOST_REVOCATION_SYNC", default_value = "1800")]
        revocation_sync: u64,

        /// Seconds allowed for dialing a tunnel target
        #[arg(long, env = "WAYPOST_DIAL_TIMEOUT", default_value = "10")]
        dial_timeout: u64,
    },

    /// Mint a development token
    #[command(long_about = r#"
Mint a development token without a control server.

With --insecure the token is unsigned (alg: none) and is accepted only by a
proxy started with --allow-unsigned. Otherwise a fresh RSA keypair is
generated, the public key is printed as PEM (or written to --output) and the
token is signed with it.

EXAMPLES:
  waypost token --insecure --capabilities connect-tcp,connect-udp
  waypost token --output dev-key.pem --hours 1
    "#)]
    Token {
        /// Emit an unsigned (alg: none) token
        #[arg(long)]
        insecure: bool,

        /// Capabilities granted by the token
        #[arg(long, value_delimiter = ',', default_value = "connect-tcp")]
        capabilities: Vec<Capability>,

        /// Token validity in hours
        #[arg(long, default_value = "24")]
        hours: i64,

        /// `iss` claim
        #[arg(long, default_value = "waypost-dev")]
        issuer: String,

        /// Token id (random if not specified)
        #[arg(long)]
        jti: Option<String>,

        /// Write the public key PEM here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output only the token (useful for scripts)
        #[arg(long)]
        token_only: bool,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[allow(clippy::too_many_arguments)]
async fn run_control(
    bind: SocketAddr,
    admin_secret: Option<String>,
    issuer: String,
    token_validity: i64,
    token_capabilities: Vec<Capability>,
    key_validity_hours: i64,
    key_grace_hours: i64,
    server_ttl: Option<i64>,
) -> Result<()> {
    let authority_config = AuthorityConfig {
        issuer,
        key_validity: chrono::Duration::try_hours(key_validity_hours)
            .context("Key validity is out of range")?,
        grace_period: chrono::Duration::try_hours(key_grace_hours)
            .context("Key grace period is out of range")?,
    };
    let config = ControlServerConfig {
        bind_addr: bind,
        admin_secret,
        token_validity: chrono::Duration::try_seconds(token_validity)
            .context("Token validity is out of range")?,
        token_capabilities,
        server_ttl: server_ttl
            .map(|ttl| chrono::Duration::try_seconds(ttl).context("Server TTL is out of range"))
            .transpose()?,
    };
    config
        .validate(&authority_config)
        .context("Invalid control server configuration")?;

    let fleet = Arc::new(MemoryFleetDirectory::new());
    let authority = Arc::new(TokenAuthority::new(authority_config, fleet.clone()));
    let server = ControlServer::new(config, authority, fleet, Arc::new(RevocationRegistry::new()));

    tokio::select! {
        result = server.start() => result.context("Control server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    }
}

/// Claims for a development token
fn dev_claims(
    issuer: String,
    hours: i64,
    capabilities: &[Capability],
    jti: Option<String>,
) -> Result<TokenClaims> {
    let validity = chrono::Duration::try_hours(hours)
        .filter(|validity| *validity > chrono::Duration::zero())
        .context("Token validity must be a positive number of hours")?;
    chrono::Utc::now()
        .checked_add_signed(validity)
        .context("Token validity is out of range")?;

    let claims = TokenClaims::new(issuer, validity).with_capabilities(capabilities);
    Ok(match jti {
        Some(jti) => claims.with_token_id(Some(TokenId::from(jti))),
        None => claims,
    })
}

async fn handle_token_command(
    insecure: bool,
    capabilities: Vec<Capability>,
    hours: i64,
    issuer: String,
    jti: Option<String>,
    output: Option<PathBuf>,
    token_only: bool,
) -> Result<()> {
    let claims = dev_claims(issuer, hours, &capabilities, jti)?;
    let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0);

    let token = if insecure {
        encode_unsigned(&claims).context("Failed to encode token")?
    } else {
        let validity = chrono::Duration::hours(hours);
        let key = SigningKey::generate(validity)
            .await
            .context("Failed to generate signing key")?;
        let pem = key.public_key_pem().context("Failed to encode public key")?;

        match &output {
            Some(path) => {
                std::fs::write(path, &pem)
                    .with_context(|| format!("Failed to write public key to {}", path.display()))?;
                if !token_only {
                    println!("Public key written to {}", path.display());
                }
            }
            None if !token_only => println!("Public key (kid {}):\n{}", key.kid(), pem),
            None => {}
        }

        key.sign(claims.clone()).context("Failed to sign token")?
    };

    if token_only {
        println!("{}", token);
        return Ok(());
    }

    println!();
    if insecure {
        println!("Unsigned token (alg: none), accepted only with --allow-unsigned:");
    } else {
        println!("Signed token (RS256):");
    }
    println!("{}", token);
    println!();
    println!("Token details:");
    if let Some(jti) = &claims.jti {
        println!("  - jti: {}", jti);
    }
    match expires_at {
        Some(at) => println!("  - Expires at: {}", at),
        None => println!("  - Expires at: {}", claims.exp),
    }
    println!(
        "  - Capabilities: {}",
        capabilities
            .iter()
            .map(Capability::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    let result = match cli.command {
        Commands::Control {
            bind,
            admin_secret,
            issuer,
            token_validity,
            token_capabilities,
            key_validity_hours,
            key_grace_hours,
            server_ttl,
        } => {
            info!("Waypost control server starting...");
            run_control(
                bind,
                admin_secret,
                issuer,
                token_validity,
                token_capabilities,
                key_validity_hours,
                key_grace_hours,
                server_ttl,
            )
            .await
        }
        Commands::Proxy {
            listen,
            control_url,
            shared_secret,
            proxy_url,
            latitude,
            longitude,
            city,
            country,
            supports_connect_tcp,
            supports_connect_udp,
            supports_connect_ip,
            required_capabilities,
            admin_addr,
            admin_secret,
            insecure,
            allow_unsigned,
            revocation_sync,
            dial_timeout,
        } => {
            info!("Waypost proxy starting...");

            let mut config = ProxyConfig {
                listen_addr: listen,
                control: control_url.map(|url| ControlConfig {
                    url,
                    shared_secret,
                }),
                admin_addr,
                admin_secret,
                insecure,
                allow_unsigned_tokens: allow_unsigned,
                required_capabilities,
                revocation_sync_interval: Duration::from_secs(revocation_sync),
                ..ProxyConfig::default()
            };
            config.server.proxy_url = proxy_url;
            config.server.latitude = latitude;
            config.server.longitude = longitude;
            config.server.city = city;
            config.server.country = country;
            config.server.supports_connect_tcp = supports_connect_tcp;
            config.server.supports_connect_udp = supports_connect_udp;
            config.server.supports_connect_ip = supports_connect_ip;
            config.tunnel.dial_timeout = Duration::from_secs(dial_timeout);

            let service = ProxyService::new(config).context("Invalid proxy configuration")?;
            service.start().await.context("Proxy failed")
        }
        Commands::Token {
            insecure,
            capabilities,
            hours,
            issuer,
            jti,
            output,
            token_only,
        } => handle_token_command(insecure, capabilities, hours, issuer, jti, output, token_only).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
