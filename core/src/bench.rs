//! The benchmark driver: repeatedly opens a circuit against the transport
//! pool and sends LOOP frames of a fixed size, measuring round trips via
//! the shared upload/download counters and [`stats::report_task_benchmark`].
//!
//! Each iteration is fire-and-forget: the circuit's local pipe is closed
//! before the frame is even sent, so the echoed CLOSE reply is simply
//! discarded by the read loop rather than awaited here.

use std::sync::Arc;

use crate::circuit::{Circuit, Outbound};
use crate::pipe;
use crate::pool::TransportPool;
use crate::registry::CircuitRegistry;

/// Run forever, opening one circuit after another and looping `block`
/// random bytes through each before tearing it down.
pub async fn run(pool: Arc<TransportPool>, registry: Arc<CircuitRegistry>, block: usize) {
    let payload: Vec<u8> = (0..block).map(|_| fastrand::u8(..)).collect();
    loop {
        let id: [u8; 4] = std::array::from_fn(|_| fastrand::u8(..));
        let (reader, writer) = pipe::pipe();
        reader.close();
        let outbound = Outbound::pinned(pool.clone()).await;
        let circuit = Arc::new(Circuit::new(id, writer, outbound));
        registry.insert(circuit.clone());

        if !circuit.send_loop(&payload).await {
            tracing::warn!("benchmark loop frame failed for circuit {id:x?}");
        }
        registry.remove_with(&id, |c| c.teardown_local());
    }
}
