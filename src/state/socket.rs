//! Per-socket plumbing: the outbound queue handle and the ambient state a
//! connection task owns for its socket.

use crate::auth::Principal;
use nexus_proto::ServerEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};

/// Outbound queue high-water mark. A socket whose queue is full when a
/// delivery arrives is terminated as unhealthy rather than allowed to stall
/// fan-out for everyone else.
pub const OUTBOUND_HIGH_WATER: usize = 256;

/// Cloneable handle to one socket's outbound queue.
#[derive(Clone)]
pub struct SocketHandle {
    pub socket_id: String,
    tx: mpsc::Sender<Arc<ServerEvent>>,
    kill: Arc<Notify>,
    unhealthy: Arc<AtomicBool>,
}

impl SocketHandle {
    pub fn new(socket_id: String) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_HIGH_WATER);
        (
            Self {
                socket_id,
                tx,
                kill: Arc::new(Notify::new()),
                unhealthy: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Queue an event for delivery. A full queue trips the high-water mark:
    /// the socket is flagged unhealthy and told to shut down.
    pub fn deliver(&self, event: Arc<ServerEvent>) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                if !self.unhealthy.swap(true, Ordering::Relaxed) {
                    crate::metrics::SLOW_SOCKETS_DROPPED.inc();
                    tracing::warn!(socket = %self.socket_id, "outbound queue full, terminating socket");
                }
                self.kill.notify_one();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the owning connection task to close this socket.
    pub fn terminate(&self) {
        self.kill.notify_one();
    }

    /// Future that resolves when termination was requested.
    pub async fn terminated(&self) {
        self.kill.notified().await;
    }

    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::Relaxed)
    }
}

/// Ambient state a connection task keeps for its socket. Nothing here is
/// shared; the dispatcher mutates it between events.
#[derive(Default)]
pub struct SocketState {
    pub principal: Option<Principal>,
}

impl SocketState {
    pub fn user_id(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.user_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn high_water_terminates_socket() {
        let (handle, _rx) = SocketHandle::new("sock-1".into());
        let event = Arc::new(ServerEvent::Error {
            message: "x".into(),
            kind: "internal".into(),
        });
        for _ in 0..OUTBOUND_HIGH_WATER {
            assert!(handle.deliver(Arc::clone(&event)));
        }
        // Queue full now: delivery fails and the kill signal fires.
        assert!(!handle.deliver(Arc::clone(&event)));
        assert!(handle.is_unhealthy());
        handle.terminated().await;
    }
}
