//! Client-side pool of pre-dialed transports: pick a slot at random, and
//! if it turns out to be dead, reconnect it lazily instead of pre-emptively
//! health-checking every slot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::transport::Transport;

type ReconnectFuture = Pin<Box<dyn Future<Output = Option<Arc<Transport>>> + Send>>;
pub type ReconnectFn = Arc<dyn Fn() -> ReconnectFuture + Send + Sync>;

pub struct TransportPool {
    slots: RwLock<Vec<Arc<Transport>>>,
    reconnect: ReconnectFn,
}

impl TransportPool {
    pub fn new(initial: Vec<Arc<Transport>>, reconnect: ReconnectFn) -> Self {
        Self { slots: RwLock::new(initial), reconnect }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a uniformly random live transport, reconnecting any dead slot
    /// it happens to land on before retrying.
    pub async fn get_any(&self) -> Arc<Transport> {
        loop {
            let candidate = {
                let slots = self.slots.read();
                if slots.is_empty() {
                    None
                } else {
                    let idx = fastrand::usize(..slots.len());
                    Some((idx, slots[idx].clone()))
                }
            };

            match candidate {
                Some((_, transport)) if !transport.is_closed() => return transport,
                Some((idx, dead)) => self.replace_slot(idx, &dead).await,
                None => tokio::task::yield_now().await,
            }
        }
    }

    async fn replace_slot(&self, idx: usize, dead: &Arc<Transport>) {
        let Some(fresh) = (self.reconnect)().await else {
            warn!("reconnect failed, retrying later");
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            return;
        };
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(idx) {
            if Arc::ptr_eq(slot, dead) {
                *slot = fresh;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_reports_empty() {
        let pool = TransportPool::new(Vec::new(), Arc::new(|| Box::pin(async { None })));
        assert!(pool.is_empty());
    }
}
