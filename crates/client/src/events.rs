use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use glam::{Quat, Vec3};
use tokio::sync::mpsc;
use uuid::Uuid;

use sim_proto::messages::{
    AnimationEntry, ObjectPropertiesBlock, ObjectPropertiesFamily, PhysicsShapeBlock,
};

use crate::error::DisconnectReason;
use crate::world::{Avatar, Primitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    ConnectingToLogin,
    ReadingResponse,
    Redirecting,
    ConnectingToSim,
    Success,
    Failed,
}

/// Everything the client surfaces to higher layers. Background tasks never
/// panic; failures arrive here as typed events.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    LoginProgress {
        status: LoginStatus,
        message: String,
        reason: Option<String>,
    },
    SimConnected {
        address: SocketAddr,
        region_handle: u64,
    },
    SimDisconnected {
        address: SocketAddr,
        reason: DisconnectReason,
    },
    Disconnected {
        reason: DisconnectReason,
        message: String,
    },

    /// Raw update block, emitted before the world store commits it.
    ObjectDataBlockUpdate {
        local_id: u32,
        full_id: Uuid,
        position: Vec3,
        rotation: Quat,
    },
    ObjectUpdate {
        prim: Arc<Primitive>,
        new: bool,
        attachment: bool,
    },
    AvatarUpdate {
        avatar: Arc<Avatar>,
        new: bool,
    },
    TerseObjectUpdate {
        local_id: u32,
        avatar: bool,
        position: Vec3,
        rotation: Quat,
    },
    KillObject {
        local_id: u32,
    },
    KillObjects {
        local_ids: Vec<u32>,
    },
    ObjectProperties {
        properties: Arc<ObjectPropertiesBlock>,
    },
    ObjectPropertiesFamily {
        properties: Arc<ObjectPropertiesFamily>,
    },
    AvatarSitChanged {
        avatar_id: Uuid,
        sitting_on: u32,
        old_seat: u32,
    },
    PayPriceReply {
        object_id: Uuid,
        default_price: i32,
        buttons: Vec<i32>,
    },
    PhysicsProperties {
        block: PhysicsShapeBlock,
    },
    ObjectAnimation {
        sender: Uuid,
        animations: Vec<AnimationEntry>,
    },
    ParticleUpdate {
        local_id: u32,
        particles: Vec<u8>,
    },
}

/// Fan-out of [`ClientEvent`]s to any number of subscribers. The
/// subscription list is guarded by a mutex; delivery goes through
/// unbounded channels so no handler code runs under the lock.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn has_subscribers(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn emit(&self, event: ClientEvent) {
        let mut subs = self.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<ClientEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned() {
        let events = EventBroadcaster::new();
        let rx = events.subscribe();
        drop(rx);
        events.emit(ClientEvent::KillObject { local_id: 1 });
        assert!(!events.has_subscribers());
    }

    #[tokio::test]
    async fn events_reach_all_subscribers() {
        let events = EventBroadcaster::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();
        events.emit(ClientEvent::KillObject { local_id: 9 });

        assert!(matches!(
            a.recv().await,
            Some(ClientEvent::KillObject { local_id: 9 })
        ));
        assert!(matches!(
            b.recv().await,
            Some(ClientEvent::KillObject { local_id: 9 })
        ));
    }
}
