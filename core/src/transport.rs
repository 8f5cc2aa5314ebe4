//! A single authenticated WebSocket connection carrying many multiplexed
//! circuits: one background read loop dispatching frames by flag, and a
//! mutex-serialized writer shared by every circuit that uses this
//! transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::circuit::{Circuit, Outbound};
use crate::error::TransportError;
use crate::frame::{Flag, Frame};
use crate::hash::HashAlgo;
use crate::pipe::{self, PipeReader};
use crate::registry::CircuitRegistry;
use crate::stats;
use crate::stream::MaybeTlsStream;
use crate::ws::{Role, WsReader, WsStream, WsWriter};

pub type DialFn = Arc<dyn Fn(Arc<Circuit>, PipeReader, String) + Send + Sync>;

pub struct Transport {
    pub id: [u8; 8],
    writer: AsyncMutex<WsWriter<WriteHalf<MaybeTlsStream>>>,
    secret: Vec<u8>,
    algo: HashAlgo,
    closed: AtomicBool,
}

impl Transport {
    /// Wrap an already-upgraded stream, returning the shared handle plus
    /// the reader half the caller should pass to [`run_read_loop`].
    pub fn new(
        stream: MaybeTlsStream,
        role: Role,
        secret: Vec<u8>,
        algo: HashAlgo,
    ) -> (Arc<Self>, WsReader<ReadHalf<MaybeTlsStream>>) {
        let (reader, writer) = WsStream::new(stream, role).split();
        let id: [u8; 8] = std::array::from_fn(|_| fastrand::u8(..));
        let transport = Arc::new(Self {
            id,
            writer: AsyncMutex::new(writer),
            secret,
            algo,
            closed: AtomicBool::new(false),
        });
        (transport, reader)
    }

    pub async fn write_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        let wire = frame.encode(self.algo);
        let len = wire.len();
        let mut writer = self.writer.lock().await;
        match writer.write_message(&wire).await {
            Ok(()) => {
                stats::add_uploaded(len);
                Ok(())
            }
            Err(err) => {
                self.closed.store(true, Ordering::Relaxed);
                Err(TransportError::Ws(err))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Drive one transport's inbound traffic until it closes, dispatching each
/// decoded frame by flag. `dial` is `Some` on the server (where DIAL frames
/// originate local connections); the client passes `None` since it never
/// receives one.
pub async fn run_read_loop(
    transport: Arc<Transport>,
    mut reader: WsReader<ReadHalf<MaybeTlsStream>>,
    registry: Arc<CircuitRegistry>,
    dial: Option<DialFn>,
) {
    loop {
        let msg = match reader.read_message().await {
            Ok(msg) => msg,
            Err(_) => break,
        };
        stats::add_downloaded(msg.len());

        let frame = match Frame::decode(&msg, &transport.secret, transport.algo) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("dropping transport {:x?}: {err}", transport.id);
                break;
            }
        };

        match frame.flag {
            Flag::Data => {
                if let Some(circuit) = registry.get(&frame.circuit_id) {
                    debug!("data frame {:x?} accepted", frame.circuit_id);
                    circuit.deliver(&frame.payload);
                } else {
                    debug!("data frame {:x?} accepted, but circuit not found", frame.circuit_id);
                    let close = Frame::new(frame.circuit_id, Flag::Close, Vec::new());
                    let _ = transport.write_frame(&close).await;
                }
            }
            Flag::Dial => {
                let Some(dial) = &dial else {
                    warn!("dial frame on a transport with no dial handler, ignoring");
                    continue;
                };
                let host = String::from_utf8_lossy(&frame.payload).to_string();
                debug!("dial frame {:x?} accepted: {host}", frame.circuit_id);
                let (to_local_reader, to_local_writer) = pipe::pipe();
                let circuit = Arc::new(Circuit::new(
                    frame.circuit_id,
                    to_local_writer,
                    Outbound::Single(transport.clone()),
                ));
                registry.insert(circuit.clone());
                dial(circuit, to_local_reader, host);
            }
            Flag::Close => {
                registry.remove_with(&frame.circuit_id, |circuit| {
                    debug!("close frame {:x?} accepted", frame.circuit_id);
                    circuit.teardown_local();
                });
            }
            Flag::Loop => {
                let echo = Frame::new(frame.circuit_id, Flag::Close, frame.payload);
                let _ = transport.write_frame(&echo).await;
            }
        }
    }
    transport.mark_closed();
}
