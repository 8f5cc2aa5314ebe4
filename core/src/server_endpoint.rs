//! The server-side TLS listener: validates the upgrade handshake's
//! `Auth`/`via` headers, completes the WebSocket upgrade, and dials out to
//! whatever host each circuit's DIAL frame names.
//!
//! Connections that don't carry a valid upgrade fall through to an
//! optional reverse-proxy passthrough rather than a bare 404, so a probe
//! against the listener sees an ordinary web server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::circuit::Circuit;
use crate::hash::HashAlgo;
use crate::otp;
use crate::pipe::PipeReader;
use crate::registry::CircuitRegistry;
use crate::stream::MaybeTlsStream;
use crate::transport::{self, DialFn, Transport};
use crate::ws::{self, Role};

const READ_CHUNK: usize = 32 * 1024;

pub struct ServerConfig {
    pub listen_addr: String,
    pub acceptor: Option<TlsAcceptor>,
    pub secret: Vec<u8>,
    /// Reverse-proxy target for any request that isn't a tunnel upgrade.
    pub reverse: Option<String>,
}

pub async fn listen(config: Arc<ServerConfig>, registry: Arc<CircuitRegistry>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("listening at {}", config.listen_addr);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("accept error: {err}");
                continue;
            }
        };
        let config = config.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_conn(stream, peer, config, registry).await {
                debug!("connection {peer} ended: {err}");
            }
        });
    }
}

async fn handle_conn(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    registry: Arc<CircuitRegistry>,
) -> std::io::Result<()> {
    let mut stream: MaybeTlsStream = match &config.acceptor {
        Some(acceptor) => MaybeTlsStream::Server(acceptor.accept(stream).await?),
        None => MaybeTlsStream::Plain(stream),
    };

    let request = match ws::read_request(&mut stream).await {
        Ok(request) => request,
        Err(_) => return Ok(()),
    };

    let algo = request.header("via").and_then(HashAlgo::from_name);
    let auth_ok = algo
        .map(|algo| {
            request
                .header("auth")
                .map(|tag| otp::validate_hex(&config.secret, tag, algo))
                .unwrap_or(false)
        })
        .unwrap_or(false);

    if !request.is_upgrade() || !auth_ok {
        warn!("auth invalid from {peer}");
        if let Some(reverse) = &config.reverse {
            return passthrough(stream, &request.raw, reverse).await;
        }
        ws::reject_not_found(&mut stream).await.map_err(to_io)?;
        return Ok(());
    }
    let algo = algo.expect("checked by auth_ok");

    let key = request.header("sec-websocket-key").unwrap_or_default().to_string();
    ws::accept_upgrade(&mut stream, &key).await.map_err(to_io)?;

    let (transport, reader) = Transport::new(stream, Role::Server, config.secret.clone(), algo);
    let dial: DialFn = Arc::new(move |circuit, pipe_reader, host| {
        tokio::spawn(dial_and_splice(circuit, pipe_reader, host));
    });
    transport::run_read_loop(transport, reader, registry, Some(dial)).await;
    Ok(())
}

async fn dial_and_splice(circuit: Arc<Circuit>, pipe_reader: PipeReader, host: String) {
    debug!("circuit {:x?}, dial {host}", circuit.id);
    let target = match TcpStream::connect(&host).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("dial error: {err}");
            circuit.teardown_remote().await;
            return;
        }
    };

    let (mut read_half, mut write_half) = target.into_split();

    let upload_circuit = circuit.clone();
    let upload = tokio::spawn(async move {
        loop {
            match pipe_reader.read_available(READ_CHUNK).await {
                Ok(Some(chunk)) => {
                    if write_half.write_all(&chunk).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    let download = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if !upload_circuit.send(&buf[..n]).await {
                        break;
                    }
                }
            }
        }
        upload_circuit.teardown_remote().await;
    });

    let _ = tokio::join!(upload, download);
}

/// Forward a non-upgrade request byte-for-byte to `reverse` and splice the
/// rest of the connection raw. This is not a full HTTP reverse proxy (no
/// rewriting of `Host`/forwarded headers) — it's transparent TCP
/// passthrough seeded with the request head already read off the wire.
async fn passthrough(mut client: MaybeTlsStream, request_head: &[u8], reverse: &str) -> std::io::Result<()> {
    let mut upstream = TcpStream::connect(reverse).await?;
    upstream.write_all(request_head).await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

fn to_io(err: crate::error::WsError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}
