//! The client-side TCP listener: accepts local SOCKS5 connections, dials a
//! circuit out over the transport pool, and splices bytes both ways.
//!
//! Per connection: disable TCP lingering so a dropped peer doesn't sit in
//! `TIME_WAIT`, run the SOCKS5 handshake, open a circuit, send the DIAL
//! frame, then copy in both directions until either side closes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::circuit::{Circuit, Outbound};
use crate::pipe;
use crate::pool::TransportPool;
use crate::registry::CircuitRegistry;

const READ_CHUNK: usize = 32 * 1024;

pub async fn listen(
    listen_addr: &str,
    pool: Arc<TransportPool>,
    registry: Arc<CircuitRegistry>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening at {listen_addr}");
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("socks conn ends with error: {err}");
                continue;
            }
        };
        debug!("accepted {peer}");
        let pool = pool.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_conn(stream, pool, registry).await {
                debug!("connection {peer} ended: {err}");
            }
        });
    }
}

async fn handle_conn(
    mut stream: TcpStream,
    pool: Arc<TransportPool>,
    registry: Arc<CircuitRegistry>,
) -> std::io::Result<()> {
    stream.set_linger(Some(Duration::ZERO))?;

    let host = match crate::socks5::handshake(&mut stream).await {
        Ok(host) => host,
        Err(err) => {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, err));
        }
    };

    let circuit_id: [u8; 4] = std::array::from_fn(|_| fastrand::u8(..));
    let (to_local_reader, to_local_writer) = pipe::pipe();
    let outbound = Outbound::pinned(pool).await;
    let circuit = Arc::new(Circuit::new(circuit_id, to_local_writer, outbound));
    registry.insert(circuit.clone());

    if !circuit.send_dial(host.as_bytes()).await {
        registry.remove_with(&circuit_id, |_| {});
        return Err(std::io::Error::new(std::io::ErrorKind::Other, "dial frame send failed"));
    }

    let (mut read_half, mut write_half) = stream.into_split();

    let up_circuit = circuit.clone();
    let upload = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if !up_circuit.send(&buf[..n]).await {
                        break;
                    }
                }
            }
        }
        up_circuit.teardown_remote().await;
    });

    let download = tokio::spawn(async move {
        loop {
            match to_local_reader.read_available(READ_CHUNK).await {
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

    let _ = tokio::join!(upload, download);
    registry.remove_with(&circuit_id, |c| c.teardown_local());
    Ok(())
}
