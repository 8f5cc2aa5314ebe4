//! A single multiplexed stream: one local TCP connection's worth of bytes,
//! tagged with a 4-byte id and carried inside DATA frames on a transport.
//!
//! A circuit is just a pipe feeding the local connection plus a reference
//! to where outbound frames go; teardown is idempotent and always closes
//! both ends, whichever side triggers it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::frame::{CircuitId, Flag, Frame};
use crate::pipe::PipeWriter;
use crate::pool::TransportPool;
use crate::transport::Transport;

/// Where a circuit's outbound frames are written. A server-side circuit is
/// born on a specific transport and stays pinned to it for its lifetime. A
/// client-side circuit picks one transport from the pool when it is
/// created and stays pinned to that same transport for every frame it
/// sends, re-selecting only if a write to it fails — never per frame.
pub enum Outbound {
    Single(Arc<Transport>),
    Pool {
        pool: Arc<TransportPool>,
        current: RwLock<Arc<Transport>>,
    },
    /// Used only for circuits that are already torn down (tests, or a
    /// circuit whose transport died before teardown could run).
    None,
}

impl Outbound {
    /// Pick one transport from `pool` and pin the circuit to it for its
    /// lifetime; later writes only fall back to the pool on failure.
    pub async fn pinned(pool: Arc<TransportPool>) -> Self {
        let current = pool.get_any().await;
        Outbound::Pool { pool, current: RwLock::new(current) }
    }
}

pub struct Circuit {
    pub id: CircuitId,
    to_local: PipeWriter,
    outbound: Outbound,
    closed: AtomicBool,
}

impl Circuit {
    pub fn new(id: CircuitId, to_local: PipeWriter, outbound: Outbound) -> Self {
        Self { id, to_local, outbound, closed: AtomicBool::new(false) }
    }

    /// Deliver bytes read off the transport into the local connection's
    /// pipe. Closes the circuit's local side if the pipe has no reader left.
    pub fn deliver(&self, payload: &[u8]) {
        if self.to_local.write(payload).is_err() {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    /// Send a DATA frame carrying `payload` to the remote peer, retrying
    /// against another pool transport if the current one is dead (client
    /// side only — a pinned single transport has nowhere else to retry to).
    pub async fn send(&self, payload: &[u8]) -> bool {
        self.send_frame(Flag::Data, payload.to_vec()).await
    }

    /// Send the initial DIAL frame naming the target `host:port`. Client
    /// side only — a circuit is born on the server from an inbound DIAL,
    /// never sends one itself.
    pub async fn send_dial(&self, host: &[u8]) -> bool {
        self.send_frame(Flag::Dial, host.to_vec()).await
    }

    /// Send a LOOP frame, used only by the benchmark driver: the peer
    /// echoes the payload straight back as a CLOSE frame.
    pub async fn send_loop(&self, payload: &[u8]) -> bool {
        self.send_frame(Flag::Loop, payload.to_vec()).await
    }

    async fn send_frame(&self, flag: Flag, payload: Vec<u8>) -> bool {
        let frame = Frame::new(self.id, flag, payload);
        match &self.outbound {
            Outbound::Single(transport) => transport.write_frame(&frame).await.is_ok(),
            Outbound::Pool { pool, current } => {
                let pinned = current.read().clone();
                if pinned.write_frame(&frame).await.is_ok() {
                    return true;
                }
                // The pinned transport died; re-select and pin the
                // replacement so later frames on this circuit stay on it.
                for _ in 0..3 {
                    let transport = pool.get_any().await;
                    let ok = transport.write_frame(&frame).await.is_ok();
                    *current.write() = transport;
                    if ok {
                        return true;
                    }
                }
                false
            }
            Outbound::None => false,
        }
    }

    async fn send_close(&self) {
        self.send_frame(Flag::Close, Vec::new()).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Tear down the local side only (pipe + mark closed). Called when a
    /// CLOSE frame arrives from the peer — the remote already knows, so no
    /// frame is sent back.
    pub fn teardown_local(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.to_local.close();
    }

    /// Tear down and notify the peer with a best-effort CLOSE frame. Called
    /// when the local connection ends first.
    pub async fn teardown_remote(&self) {
        self.teardown_local();
        self.send_close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe;

    #[test]
    fn deliver_after_local_reader_gone_marks_closed() {
        let (reader, writer) = pipe::pipe();
        reader.close();
        let circuit = Circuit::new([1, 1, 1, 1], writer, Outbound::None);
        circuit.deliver(b"data");
        assert!(circuit.is_closed());
    }

    #[tokio::test]
    async fn send_with_no_outbound_fails() {
        let (_reader, writer) = pipe::pipe();
        let circuit = Circuit::new([2, 2, 2, 2], writer, Outbound::None);
        assert!(!circuit.send(b"x").await);
    }
}
