//! Command-line entry point: `client`, `server`, `cert`, and `benchmark`
//! subcommands wired onto `wavesocks-core`.

mod tls;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_rustls::TlsAcceptor;
use tracing::info;
use wavesocks_core::hash::HashAlgo;
use wavesocks_core::pool::{ReconnectFn, TransportPool};
use wavesocks_core::registry::CircuitRegistry;
use wavesocks_core::stream::MaybeTlsStream;
use wavesocks_core::transport::{self, Transport};
use wavesocks_core::ws::Role;
use wavesocks_core::{otp, stats};

#[derive(Parser)]
#[command(name = "wavesocks", version, about = "SOCKS5 proxy tunneled over WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// start the local SOCKS5 listener that tunnels out over WebSocket
    #[command(alias = "c")]
    Client(ClientArgs),
    /// start the WebSocket endpoint that dials targets on the client's behalf
    #[command(alias = "s")]
    Server(ServerArgs),
    /// generate a self-signed ECDSA certificate and key
    Cert(CertArgs),
    /// drive LOOP frames through the tunnel to measure throughput
    #[command(alias = "b")]
    Benchmark(BenchmarkArgs),
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// key for authentication, leave blank to disable
    #[arg(long, default_value = "Mikubill-wSocks")]
    auth: String,
    /// log debug messages
    #[arg(long)]
    debug: bool,
    /// log connection stats every 5 seconds
    #[arg(long)]
    stats: bool,
}

#[derive(Args)]
struct ClientArgs {
    #[command(flatten)]
    global: GlobalArgs,
    /// algorithm for hash: auto, memHash, xxHash, murHash, crcHash, adlerHash
    #[arg(long, default_value = "auto")]
    hash: String,
    /// websocket server link, e.g. wss://example.com/ws
    #[arg(long, short = 's')]
    server: String,
    /// local SOCKS5 listening address
    #[arg(long, short = 'l', default_value = "127.0.0.1:2333")]
    listen: String,
    /// allow insecure (unverified) TLS connections
    #[arg(long)]
    insecure: bool,
    /// server name indication override, leave blank to use the server host
    #[arg(long, default_value = "")]
    sni: String,
    /// total websocket connection count in the pool
    #[arg(long, default_value_t = 4)]
    conn: usize,
}

#[derive(Args)]
struct ServerArgs {
    #[command(flatten)]
    global: GlobalArgs,
    /// websocket listen link, e.g. ws://0.0.0.0:2233/ws or wss://...
    #[arg(long, short = 'l', default_value = "ws://127.0.0.1:2233/ws")]
    listen: String,
    /// tls cert path, generated alongside `key` if missing
    #[arg(long, default_value = "root.pem")]
    cert: String,
    /// tls key path, generated alongside `cert` if missing
    #[arg(long, default_value = "root.key")]
    key: String,
    /// reverse proxy target for non-upgrade requests, leave blank to disable
    #[arg(long, short = 'r', default_value = "")]
    reverse: String,
    /// optional JSON settings file; explicit flags above still win
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct CertArgs {
    /// certificate hosts (repeat for multiple)
    #[arg(long)]
    hosts: Vec<String>,
    /// output file prefix, producing `<out>.pem` and `<out>.key`
    #[arg(long, default_value = "root")]
    out: String,
}

#[derive(Args)]
struct BenchmarkArgs {
    /// websocket server link
    #[arg(long, short = 's')]
    server: String,
    /// log debug messages
    #[arg(long)]
    debug: bool,
    /// server name indication override
    #[arg(long, default_value = "")]
    sni: String,
    /// allow insecure TLS connections
    #[arg(long)]
    insecure: bool,
    /// bytes per LOOP frame
    #[arg(long, default_value_t = 30000)]
    block: usize,
    /// total websocket connection count
    #[arg(long, default_value_t = 2)]
    conn: usize,
    /// key for authentication
    #[arg(long, default_value = "Mikubill-wSocks")]
    auth: String,
}

fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();
}

fn resolve_hash(name: &str) -> Result<HashAlgo> {
    if name == "auto" {
        Ok(HashAlgo::detect_default())
    } else {
        HashAlgo::from_name(name).with_context(|| format!("unknown hash algorithm {name:?}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let cli = Cli::parse();
    match cli.command {
        Command::Client(args) => run_client(args).await,
        Command::Server(args) => run_server(args).await,
        Command::Cert(args) => run_cert(args),
        Command::Benchmark(args) => run_benchmark(args).await,
    }
}

struct DialTarget {
    host: String,
    port: u16,
    path: String,
    tls: bool,
}

fn parse_ws_url(raw: &str) -> Result<DialTarget> {
    let url = url::Url::parse(raw).with_context(|| format!("invalid websocket url {raw:?}"))?;
    let tls = match url.scheme() {
        "ws" => false,
        "wss" => true,
        other => bail!("unsupported scheme {other:?}, expected ws or wss"),
    };
    let host = url.host_str().context("websocket url missing host")?.to_string();
    let port = url.port().unwrap_or(if tls { 443 } else { 80 });
    let path = if url.path().is_empty() { "/".to_string() } else { url.path().to_string() };
    Ok(DialTarget { host, port, path, tls })
}

async fn dial_transport(
    target_raw: String,
    secret: Vec<u8>,
    algo: HashAlgo,
    insecure: bool,
    sni: String,
    registry: Arc<CircuitRegistry>,
) -> Option<Arc<Transport>> {
    match dial_transport_inner(&target_raw, &secret, algo, insecure, &sni, &registry).await {
        Ok(transport) => Some(transport),
        Err(err) => {
            tracing::warn!("websocket connection failed to start: {err}");
            None
        }
    }
}

async fn dial_transport_inner(
    target_raw: &str,
    secret: &[u8],
    algo: HashAlgo,
    insecure: bool,
    sni: &str,
    registry: &Arc<CircuitRegistry>,
) -> Result<Arc<Transport>> {
    let target = parse_ws_url(target_raw)?;
    let tcp = tokio::net::TcpStream::connect((target.host.as_str(), target.port)).await?;

    let mut stream = if target.tls {
        let server_name = if sni.is_empty() { target.host.clone() } else { sni.to_string() };
        let connector = tls::client_connector(insecure);
        let tls_stream = connector.connect(tls::server_name(&server_name)?, tcp).await?;
        MaybeTlsStream::Client(tls_stream)
    } else {
        MaybeTlsStream::Plain(tcp)
    };

    let auth_tag = otp::generate_hex(algo);
    wavesocks_core::ws::client_handshake(
        &mut stream,
        &target.host,
        &target.path,
        &[("Auth", &auth_tag), ("via", algo.name())],
    )
    .await?;

    let (transport, reader) = Transport::new(stream, Role::Client, secret.to_vec(), algo);
    tokio::spawn(transport::run_read_loop(transport.clone(), reader, registry.clone(), None));
    Ok(transport)
}

async fn run_client(args: ClientArgs) -> Result<()> {
    init_logging(args.global.debug);
    let algo = resolve_hash(&args.hash)?;
    let secret = otp::canonicalize_secret(args.global.auth.as_bytes());
    otp::refresh_cached_seed(&secret);
    tokio::spawn(otp::refresh_task(secret.clone()));

    let registry = Arc::new(CircuitRegistry::new());

    let mut initial = Vec::with_capacity(args.conn);
    for _ in 0..args.conn {
        if let Some(transport) =
            dial_transport(args.server.clone(), secret.clone(), algo, args.insecure, args.sni.clone(), registry.clone())
                .await
        {
            initial.push(transport);
        }
    }
    if initial.is_empty() {
        bail!("failed to establish any websocket connection to {}", args.server);
    }

    let reconnect: ReconnectFn = {
        let server = args.server.clone();
        let secret = secret.clone();
        let sni = args.sni.clone();
        let insecure = args.insecure;
        let registry = registry.clone();
        Arc::new(move || -> Pin<Box<dyn Future<Output = Option<Arc<Transport>>> + Send>> {
            let server = server.clone();
            let secret = secret.clone();
            let sni = sni.clone();
            let registry = registry.clone();
            Box::pin(dial_transport(server, secret, algo, insecure, sni, registry))
        })
    };
    let pool = Arc::new(TransportPool::new(initial, reconnect));

    if args.global.stats {
        tokio::spawn(stats::report_task());
    }

    wavesocks_core::client_endpoint::listen(&args.listen, pool, registry).await?;
    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let mut settings = if let Some(path) = &args.config {
        wavesocks_core::config::ServerSettings::load(std::path::Path::new(path))
            .with_context(|| format!("loading config {path}"))?
    } else {
        wavesocks_core::config::ServerSettings::default()
    };
    // CLI flags win over the config file whenever they differ from their
    // own defaults — a config file is a base, not a override source.
    if args.listen != "ws://127.0.0.1:2233/ws" {
        settings.listen = args.listen.clone();
    }
    if args.cert != "root.pem" {
        settings.cert = args.cert.clone();
    }
    if args.key != "root.key" {
        settings.key = args.key.clone();
    }
    if !args.reverse.is_empty() {
        settings.reverse = Some(args.reverse.clone());
    }
    if args.global.auth != "Mikubill-wSocks" {
        settings.auth = args.global.auth.clone();
    }
    settings.debug |= args.global.debug;
    settings.stats |= args.global.stats;

    init_logging(settings.debug);

    let target = parse_ws_url(&settings.listen)?;
    let bind_addr = format!("{}:{}", target.host, target.port);

    let acceptor = if target.tls {
        Some(build_acceptor(&settings.cert, &settings.key, &target.host)?)
    } else {
        None
    };

    let secret = otp::canonicalize_secret(settings.auth.as_bytes());
    otp::refresh_cached_seed(&secret);
    tokio::spawn(otp::refresh_task(secret.clone()));
    if settings.stats {
        tokio::spawn(stats::report_task());
    }

    let config = Arc::new(wavesocks_core::server_endpoint::ServerConfig {
        listen_addr: bind_addr,
        acceptor,
        secret,
        reverse: settings.reverse.clone(),
    });
    let registry = Arc::new(CircuitRegistry::new());
    wavesocks_core::server_endpoint::listen(config, registry).await?;
    Ok(())
}

fn build_acceptor(cert_path: &str, key_path: &str, host: &str) -> Result<TlsAcceptor> {
    let cert_pem_path = std::path::Path::new(cert_path);
    let key_pem_path = std::path::Path::new(key_path);

    let generated;
    let (cert_pem, key_pem) = if cert_pem_path.exists() && key_pem_path.exists() {
        (std::fs::read_to_string(cert_pem_path)?, std::fs::read_to_string(key_pem_path)?)
    } else {
        generated = wavesocks_core::cert::generate(&[host.to_string()], "Mikubill-wSocks")?;
        std::fs::write(cert_pem_path, &generated.cert_pem)?;
        std::fs::write(key_pem_path, &generated.key_pem)?;
        (generated.cert_pem.clone(), generated.key_pem.clone())
    };

    tls::server_acceptor(&cert_pem, &key_pem)
}

fn run_cert(args: CertArgs) -> Result<()> {
    init_logging(false);
    let cert = wavesocks_core::cert::generate(&args.hosts, "Acme Co")?;
    let cert_path = format!("{}.pem", args.out);
    let key_path = format!("{}.key", args.out);
    std::fs::write(&cert_path, &cert.cert_pem)?;
    std::fs::write(&key_path, &cert.key_pem)?;
    info!("wrote {cert_path} and {key_path}");
    Ok(())
}

async fn run_benchmark(args: BenchmarkArgs) -> Result<()> {
    init_logging(args.debug);
    let algo = HashAlgo::detect_default();
    let secret = otp::canonicalize_secret(args.auth.as_bytes());
    otp::refresh_cached_seed(&secret);
    tokio::spawn(otp::refresh_task(secret.clone()));

    let registry = Arc::new(CircuitRegistry::new());
    let mut initial = Vec::with_capacity(args.conn);
    for _ in 0..args.conn {
        if let Some(transport) =
            dial_transport(args.server.clone(), secret.clone(), algo, args.insecure, args.sni.clone(), registry.clone())
                .await
        {
            initial.push(transport);
        }
    }
    if initial.is_empty() {
        bail!("failed to establish any websocket connection to {}", args.server);
    }

    let reconnect: ReconnectFn = {
        let server = args.server.clone();
        let secret = secret.clone();
        let sni = args.sni.clone();
        let insecure = args.insecure;
        let registry = registry.clone();
        Arc::new(move || -> Pin<Box<dyn Future<Output = Option<Arc<Transport>>> + Send>> {
            let server = server.clone();
            let secret = secret.clone();
            let sni = sni.clone();
            let registry = registry.clone();
            Box::pin(dial_transport(server, secret, algo, insecure, sni, registry))
        })
    };
    let pool = Arc::new(TransportPool::new(initial, reconnect));
    tokio::spawn(stats::report_task_benchmark());
    wavesocks_core::bench::run(pool, registry, args.block).await;
    Ok(())
}
