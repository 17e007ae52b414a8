//! Inbound and outbound packet plumbing: unbounded channels drained by two
//! long-lived tasks, per-message-id handler dispatch, and the login-time
//! blacklist.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use sim_proto::messages::{Message, MessageId};

use crate::circuit::{Circuit, DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RESENDS};

/// Minimum spacing between outbound sends; rough rate limiting under the
/// negotiated throttle.
const SEND_SPACING: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct IncomingPacket {
    pub circuit: Circuit,
    pub sequence: u32,
    pub message: Arc<Message>,
}

pub struct OutgoingPacket {
    pub circuit: Circuit,
    pub message: Message,
    pub reliable: bool,
}

pub type PacketHandler = Arc<dyn Fn(&IncomingPacket) + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
    token: u64,
    handler: PacketHandler,
    asynchronous: bool,
}

/// Handle returned by `register`, used to unregister later. Unregistering
/// during dispatch is allowed; an already-running handler completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerToken(u64);

struct PipelineShared {
    handlers: Mutex<HashMap<MessageId, Vec<HandlerEntry>>>,
    default_handlers: Mutex<Vec<HandlerEntry>>,
    blacklist: Mutex<HashSet<MessageId>>,
    next_token: AtomicU64,
    inbox_tx: mpsc::UnboundedSender<IncomingPacket>,
    outbox_tx: mpsc::UnboundedSender<OutgoingPacket>,
}

#[derive(Clone)]
pub struct PacketPipeline {
    inner: Arc<PipelineShared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PacketPipeline {
    pub(crate) fn new() -> (
        Self,
        mpsc::UnboundedReceiver<IncomingPacket>,
        mpsc::UnboundedReceiver<OutgoingPacket>,
    ) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(PipelineShared {
                    handlers: Mutex::new(HashMap::new()),
                    default_handlers: Mutex::new(Vec::new()),
                    blacklist: Mutex::new(HashSet::new()),
                    next_token: AtomicU64::new(1),
                    inbox_tx,
                    outbox_tx,
                }),
            },
            inbox_rx,
            outbox_rx,
        )
    }

    pub(crate) fn inbox_sender(&self) -> mpsc::UnboundedSender<IncomingPacket> {
        self.inner.inbox_tx.clone()
    }

    /// Register a handler for one message id. Registering any asynchronous
    /// handler promotes every handler of that id to worker dispatch.
    pub fn register(
        &self,
        id: MessageId,
        asynchronous: bool,
        handler: PacketHandler,
    ) -> HandlerToken {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.handlers)
            .entry(id)
            .or_default()
            .push(HandlerEntry {
                token,
                handler,
                asynchronous,
            });
        HandlerToken(token)
    }

    pub fn unregister(&self, id: MessageId, token: HandlerToken) {
        if let Some(entries) = lock(&self.inner.handlers).get_mut(&id) {
            entries.retain(|e| e.token != token.0);
        }
    }

    /// Sink for message ids nothing registered for.
    pub fn register_default(&self, handler: PacketHandler) -> HandlerToken {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.default_handlers).push(HandlerEntry {
            token,
            handler,
            asynchronous: false,
        });
        HandlerToken(token)
    }

    /// Install the login-provided UDP blacklist. Names that do not map to a
    /// cataloged message are ignored; unrecognized inbound ids never reach
    /// handlers anyway.
    pub fn set_blacklist(&self, names: &[String]) {
        let mut blacklist = lock(&self.inner.blacklist);
        blacklist.clear();
        for name in names {
            if let Some(id) = id_by_name(name) {
                blacklist.insert(id);
            } else {
                log::debug!("udp blacklist entry {name:?} is not in the catalog");
            }
        }
        if !blacklist.is_empty() {
            log::info!("udp blacklist installed ({} messages)", blacklist.len());
        }
    }

    pub fn is_blacklisted(&self, id: MessageId) -> bool {
        lock(&self.inner.blacklist).contains(&id)
    }

    /// Queue a message for paced outbound delivery.
    pub fn queue(&self, circuit: Circuit, message: Message, reliable: bool) {
        let _ = self.inner.outbox_tx.send(OutgoingPacket {
            circuit,
            message,
            reliable,
        });
    }

    pub(crate) fn spawn_drainers(
        &self,
        inbox_rx: mpsc::UnboundedReceiver<IncomingPacket>,
        outbox_rx: mpsc::UnboundedReceiver<OutgoingPacket>,
        shutdown: watch::Receiver<bool>,
    ) {
        tokio::spawn(inbound_loop(self.clone(), inbox_rx, shutdown.clone()));
        tokio::spawn(outbound_loop(outbox_rx, shutdown));
    }

    fn dispatch(&self, packet: &IncomingPacket) {
        let id = packet.message.id();
        if self.is_blacklisted(id) {
            log::trace!("blacklisted {} dropped", packet.message.name());
            return;
        }

        let entries: Vec<HandlerEntry> = lock(&self.inner.handlers)
            .get(&id)
            .cloned()
            .unwrap_or_default();

        if entries.is_empty() {
            let defaults: Vec<HandlerEntry> = lock(&self.inner.default_handlers).clone();
            if defaults.is_empty() {
                log::debug!("no handler for {} ({id})", packet.message.name());
            } else {
                for entry in defaults {
                    (entry.handler)(packet);
                }
            }
            return;
        }

        if entries.iter().any(|e| e.asynchronous) {
            for entry in entries {
                let packet = packet.clone();
                tokio::spawn(async move {
                    (entry.handler)(&packet);
                });
            }
        } else {
            for entry in entries {
                (entry.handler)(packet);
            }
        }
    }
}

async fn inbound_loop(
    pipeline: PacketPipeline,
    mut inbox: mpsc::UnboundedReceiver<IncomingPacket>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            packet = inbox.recv() => {
                let Some(packet) = packet else { break };
                pipeline.dispatch(&packet);
            }
        }
    }
    log::trace!("inbound drainer exited");
}

async fn outbound_loop(
    mut outbox: mpsc::UnboundedReceiver<OutgoingPacket>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            packet = outbox.recv() => {
                let Some(packet) = packet else { break };
                let result = if packet.reliable {
                    packet
                        .circuit
                        .send_reliable(&packet.message, DEFAULT_MAX_RESENDS, DEFAULT_ACK_TIMEOUT)
                        .await
                        .map(|_| ())
                } else {
                    packet.circuit.send(&packet.message).await
                };
                if let Err(e) = result {
                    log::warn!(
                        "outbound {} to {} failed: {e}",
                        packet.message.name(),
                        packet.circuit.address()
                    );
                }
                tokio::time::sleep(SEND_SPACING).await;
            }
        }
    }
    log::trace!("outbound drainer exited");
}

/// Name-to-id mapping for the cataloged messages; the login blacklist
/// arrives as a CSV of message names.
pub fn id_by_name(name: &str) -> Option<MessageId> {
    use sim_proto::messages::ids;
    Some(match name {
        "UseCircuitCode" => ids::USE_CIRCUIT_CODE,
        "PacketAck" => ids::PACKET_ACK,
        "OpenCircuit" => ids::OPEN_CIRCUIT,
        "CloseCircuit" => ids::CLOSE_CIRCUIT,
        "StartPingCheck" => ids::START_PING_CHECK,
        "CompletePingCheck" => ids::COMPLETE_PING_CHECK,
        "RegionHandshake" => ids::REGION_HANDSHAKE,
        "RegionHandshakeReply" => ids::REGION_HANDSHAKE_REPLY,
        "CompleteAgentMovement" => ids::COMPLETE_AGENT_MOVEMENT,
        "AgentMovementComplete" => ids::AGENT_MOVEMENT_COMPLETE,
        "AgentThrottle" => ids::AGENT_THROTTLE,
        "AgentUpdate" => ids::AGENT_UPDATE,
        "LogoutRequest" => ids::LOGOUT_REQUEST,
        "LogoutReply" => ids::LOGOUT_REPLY,
        "KickUser" => ids::KICK_USER,
        "EnableSimulator" => ids::ENABLE_SIMULATOR,
        "DisableSimulator" => ids::DISABLE_SIMULATOR,
        "SimStats" => ids::SIM_STATS,
        "EconomyDataRequest" => ids::ECONOMY_DATA_REQUEST,
        "ObjectUpdate" => ids::OBJECT_UPDATE,
        "ImprovedTerseObjectUpdate" => ids::IMPROVED_TERSE_OBJECT_UPDATE,
        "ObjectUpdateCompressed" => ids::OBJECT_UPDATE_COMPRESSED,
        "ObjectUpdateCached" => ids::OBJECT_UPDATE_CACHED,
        "KillObject" => ids::KILL_OBJECT,
        "RequestMultipleObjects" => ids::REQUEST_MULTIPLE_OBJECTS,
        "ObjectProperties" => ids::OBJECT_PROPERTIES,
        "ObjectPropertiesFamily" => ids::OBJECT_PROPERTIES_FAMILY,
        "ObjectAnimation" => ids::OBJECT_ANIMATION,
        "ObjectPhysicsProperties" => ids::OBJECT_PHYSICS_PROPERTIES,
        "PayPriceReply" => ids::PAY_PRICE_REPLY,
        _ => return None,
    })
}
