use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};

use sim_proto::header::{self, PacketFlags, PacketHeader, MAX_APPENDED_ACKS};
use sim_proto::messages::{
    self, CompletePingCheck, Message, RegionHandshake, RegionHandshakeReply, StartPingCheck,
};
use sim_proto::zerocode;

use crate::agent::AgentContext;
use crate::error::NetError;
use crate::pipeline::IncomingPacket;
use crate::world::SimWorld;

pub const DEFAULT_MAX_RESENDS: u32 = 3;
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(4);

const RECV_BUFFER_LEN: usize = 4096;
const RECENT_SEQUENCE_WINDOW: usize = 256;
const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(500);
const PING_EVERY_TICKS: u64 = 10;

/// `New -> Connecting -> Handshaking -> Connected -> Disconnecting -> Closed`.
/// The disconnect-candidate flag rides alongside `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    New,
    Connecting,
    Handshaking,
    Connected,
    Disconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub resent_packets: u64,
    pub received_resends: u64,
    pub duplicate_packets: u64,
    /// 0..1 physics step scale reported by the simulator.
    pub time_dilation: f32,
    pub sim_fps: f32,
    pub object_count: u32,
    pub last_lag: Duration,
}

/// Completion of a reliable send: acknowledged, or abandoned after the
/// resend budget ran out. Dropping the handle detaches without canceling.
pub struct ReliableHandle {
    rx: oneshot::Receiver<Result<(), NetError>>,
}

impl ReliableHandle {
    pub async fn wait(self) -> Result<(), NetError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(NetError::CircuitClosed),
        }
    }
}

struct UnackedEntry {
    datagram: Vec<u8>,
    kind: &'static str,
    last_sent: Instant,
    resends: u32,
    max_resends: u32,
    ack_timeout: Duration,
    done: Option<oneshot::Sender<Result<(), NetError>>>,
}

#[derive(Default)]
struct PingState {
    next_ping_id: u8,
    outstanding: Option<(u8, Instant)>,
}

struct CircuitShared {
    address: SocketAddr,
    socket: UdpSocket,
    circuit_code: u32,
    agent: Arc<AgentContext>,

    sequence: AtomicU32,
    state: Mutex<CircuitState>,
    handshake_done: AtomicBool,
    handshake_signal: Mutex<Option<oneshot::Sender<()>>>,
    disconnect_candidate: AtomicBool,

    unacked: Mutex<HashMap<u32, UnackedEntry>>,
    pending_acks: Mutex<Vec<u32>>,
    recent_inbound: Mutex<VecDeque<u32>>,
    ping: Mutex<PingState>,
    stats: Mutex<CircuitStats>,
    last_receive: Mutex<Instant>,

    seed_capability: Mutex<Option<String>>,
    region_handle: AtomicU64,
    region_name: Mutex<String>,
    world: SimWorld,

    shutdown: watch::Sender<bool>,
}

/// One authenticated UDP session with a simulator. Cheap to clone; all
/// state lives behind the shared inner.
#[derive(Clone)]
pub struct Circuit {
    inner: Arc<CircuitShared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Circuit {
    pub(crate) async fn start(
        address: SocketAddr,
        circuit_code: u32,
        agent: Arc<AgentContext>,
        inbox: mpsc::UnboundedSender<IncomingPacket>,
        seed_capability: Option<String>,
        region_handle: u64,
    ) -> Result<Self, NetError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(address).await?;

        let (shutdown, _) = watch::channel(false);
        let circuit = Self {
            inner: Arc::new(CircuitShared {
                address,
                socket,
                circuit_code,
                agent,
                sequence: AtomicU32::new(0),
                state: Mutex::new(CircuitState::Connecting),
                handshake_done: AtomicBool::new(false),
                handshake_signal: Mutex::new(None),
                disconnect_candidate: AtomicBool::new(false),
                unacked: Mutex::new(HashMap::new()),
                pending_acks: Mutex::new(Vec::new()),
                recent_inbound: Mutex::new(VecDeque::with_capacity(RECENT_SEQUENCE_WINDOW)),
                ping: Mutex::new(PingState::default()),
                stats: Mutex::new(CircuitStats::default()),
                last_receive: Mutex::new(Instant::now()),
                seed_capability: Mutex::new(seed_capability),
                region_handle: AtomicU64::new(region_handle),
                region_name: Mutex::new(String::new()),
                world: SimWorld::new(),
                shutdown,
            }),
        };

        tokio::spawn(recv_loop(circuit.clone(), inbox));
        tokio::spawn(maintenance_loop(circuit.clone()));

        log::debug!("circuit to {address} started (code {circuit_code})");
        Ok(circuit)
    }

    pub fn address(&self) -> SocketAddr {
        self.inner.address
    }

    pub fn circuit_code(&self) -> u32 {
        self.inner.circuit_code
    }

    pub fn state(&self) -> CircuitState {
        *lock(&self.inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == CircuitState::Connected
    }

    pub fn world(&self) -> &SimWorld {
        &self.inner.world
    }

    pub fn stats(&self) -> CircuitStats {
        *lock(&self.inner.stats)
    }

    pub fn region_handle(&self) -> u64 {
        self.inner.region_handle.load(Ordering::Relaxed)
    }

    pub(crate) fn set_region_handle(&self, handle: u64) {
        self.inner.region_handle.store(handle, Ordering::Relaxed);
    }

    pub fn region_name(&self) -> String {
        lock(&self.inner.region_name).clone()
    }

    pub fn seed_capability(&self) -> Option<String> {
        lock(&self.inner.seed_capability).clone()
    }

    pub(crate) fn set_seed_capability(&self, url: Option<String>) {
        if url.is_some() {
            *lock(&self.inner.seed_capability) = url;
        }
    }

    pub(crate) fn set_dilation(&self, dilation: f32) {
        lock(&self.inner.stats).time_dilation = dilation;
    }

    pub(crate) fn set_sim_stats(&self, fps: f32, dilation: f32, objects: u32) {
        let mut stats = lock(&self.inner.stats);
        stats.sim_fps = fps;
        stats.time_dilation = dilation;
        stats.object_count = objects;
    }

    /// Fire-and-forget send.
    pub async fn send(&self, message: &Message) -> Result<(), NetError> {
        self.send_inner(message, None).await?;
        Ok(())
    }

    /// Reliable send: enrolls in the un-acked table and returns immediately
    /// with a completion handle.
    pub async fn send_reliable(
        &self,
        message: &Message,
        max_resends: u32,
        ack_timeout: Duration,
    ) -> Result<ReliableHandle, NetError> {
        let (tx, rx) = oneshot::channel();
        self.send_inner(message, Some((max_resends, ack_timeout, tx)))
            .await?;
        Ok(ReliableHandle { rx })
    }

    async fn send_inner(
        &self,
        message: &Message,
        reliable: Option<(u32, Duration, oneshot::Sender<Result<(), NetError>>)>,
    ) -> Result<u32, NetError> {
        if matches!(self.state(), CircuitState::Closed) {
            return Err(NetError::CircuitClosed);
        }

        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let (id_bytes, body) = message.encode_parts();

        let mut flags = PacketFlags::empty();
        if reliable.is_some() {
            flags |= PacketFlags::RELIABLE;
        }

        let compacted = zerocode::compact(&body);
        let coded = zerocode::is_beneficial(&body, &compacted);
        if coded {
            flags |= PacketFlags::ZEROCODED;
        }

        let acks: Vec<u32> = {
            let mut pending = lock(&self.inner.pending_acks);
            let take = pending.len().min(MAX_APPENDED_ACKS);
            pending.drain(..take).collect()
        };
        if !acks.is_empty() {
            flags |= PacketFlags::APPENDED_ACKS;
        }

        let mut datagram = Vec::with_capacity(8 + id_bytes.len() + body.len() + acks.len() * 4);
        PacketHeader::new(flags, sequence).encode(&mut datagram);
        datagram.extend_from_slice(&id_bytes);
        datagram.extend_from_slice(if coded { &compacted } else { &body });
        if !acks.is_empty() {
            header::append_acks(&mut datagram, &acks);
        }

        if let Some((max_resends, ack_timeout, done)) = reliable {
            lock(&self.inner.unacked).insert(
                sequence,
                UnackedEntry {
                    datagram: datagram.clone(),
                    kind: message.name(),
                    last_sent: Instant::now(),
                    resends: 0,
                    max_resends,
                    ack_timeout,
                    done: Some(done),
                },
            );
        }

        let sent = self.inner.socket.send(&datagram).await?;
        {
            let mut stats = lock(&self.inner.stats);
            stats.packets_sent += 1;
            stats.bytes_sent += sent as u64;
        }
        log::trace!(
            "-> {} seq {sequence} ({} bytes) to {}",
            message.name(),
            sent,
            self.inner.address
        );
        Ok(sequence)
    }

    /// Process one inbound datagram. Returns the decoded packet for the
    /// pipeline, or `None` when it was consumed here (duplicate, damaged,
    /// pure transport chatter still reaches the pipeline).
    pub(crate) async fn handle_datagram(
        &self,
        data: &[u8],
    ) -> Result<Option<(PacketHeader, Message)>, NetError> {
        let (packet_header, body_start) = PacketHeader::decode(data)?;
        let (body, acks) = header::split_appended_acks(packet_header.flags, &data[body_start..])?;
        // ACK processing is cheap and happens even when the body is damaged
        self.process_acks(&acks);

        {
            let mut stats = lock(&self.inner.stats);
            stats.packets_received += 1;
            stats.bytes_received += data.len() as u64;
        }
        *lock(&self.inner.last_receive) = Instant::now();
        self.inner
            .disconnect_candidate
            .store(false, Ordering::Relaxed);

        let zerocoded = packet_header.flags.contains(PacketFlags::ZEROCODED);
        let (_, message) = match messages::decode_message(body, zerocoded) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!(
                    "dropping damaged datagram from {} (seq {}): {e}",
                    self.inner.address,
                    packet_header.sequence
                );
                return Ok(None);
            }
        };

        // duplicate suppression: ack again, do not re-dispatch
        {
            let mut recent = lock(&self.inner.recent_inbound);
            if recent.contains(&packet_header.sequence) {
                lock(&self.inner.stats).duplicate_packets += 1;
                if packet_header.flags.contains(PacketFlags::RESENT) {
                    lock(&self.inner.stats).received_resends += 1;
                }
                if packet_header.flags.contains(PacketFlags::RELIABLE) {
                    lock(&self.inner.pending_acks).push(packet_header.sequence);
                }
                return Ok(None);
            }
            if recent.len() >= RECENT_SEQUENCE_WINDOW {
                recent.pop_front();
            }
            recent.push_back(packet_header.sequence);
        }

        if packet_header.flags.contains(PacketFlags::RELIABLE) {
            lock(&self.inner.pending_acks).push(packet_header.sequence);
        }

        // transport chatter handled synchronously on the receive path
        match &message {
            Message::PacketAck(ack) => {
                self.process_acks(&ack.ids);
            }
            Message::StartPingCheck(ping) => {
                let reply = Message::CompletePingCheck(CompletePingCheck {
                    ping_id: ping.ping_id,
                });
                if let Err(e) = self.send(&reply).await {
                    log::warn!("ping reply to {} failed: {e}", self.inner.address);
                }
            }
            Message::CompletePingCheck(pong) => {
                self.complete_ping(pong.ping_id);
            }
            Message::RegionHandshake(handshake) => {
                self.complete_handshake(handshake).await;
            }
            Message::SimStats(stats) => {
                let dilation = stats
                    .get(messages::stat_id::TIME_DILATION)
                    .unwrap_or_else(|| self.stats().time_dilation);
                let fps = stats.get(messages::stat_id::SIM_FPS).unwrap_or(0.0);
                let objects = stats
                    .get(messages::stat_id::TOTAL_PRIMS)
                    .unwrap_or(0.0) as u32;
                self.set_sim_stats(fps, dilation, objects);
            }
            _ => {}
        }

        Ok(Some((packet_header, message)))
    }

    fn process_acks(&self, ids: &[u32]) {
        if ids.is_empty() {
            return;
        }
        let mut completed = Vec::new();
        {
            let mut unacked = lock(&self.inner.unacked);
            for id in ids {
                if let Some(mut entry) = unacked.remove(id) {
                    if let Some(done) = entry.done.take() {
                        completed.push(done);
                    }
                }
            }
        }
        for done in completed {
            let _ = done.send(Ok(()));
        }
    }

    fn complete_ping(&self, ping_id: u8) {
        let mut ping = lock(&self.inner.ping);
        if let Some((outstanding, sent_at)) = ping.outstanding.take() {
            if outstanding == ping_id {
                lock(&self.inner.stats).last_lag = sent_at.elapsed();
            } else {
                ping.outstanding = Some((outstanding, sent_at));
            }
        }
    }

    async fn complete_handshake(&self, handshake: &RegionHandshake) {
        {
            let mut state = lock(&self.inner.state);
            if matches!(*state, CircuitState::Disconnecting | CircuitState::Closed) {
                return;
            }
            *state = CircuitState::Connected;
        }
        *lock(&self.inner.region_name) = handshake.sim_name.clone();
        log::info!(
            "region handshake from {} ({})",
            self.inner.address,
            handshake.sim_name
        );

        let reply = Message::RegionHandshakeReply(RegionHandshakeReply {
            agent_id: self.inner.agent.agent_id(),
            session_id: self.inner.agent.session_id(),
            flags: handshake.region_flags,
        });
        match self
            .send_reliable(&reply, DEFAULT_MAX_RESENDS, DEFAULT_ACK_TIMEOUT)
            .await
        {
            Ok(_) => {}
            Err(e) => log::warn!("handshake reply to {} failed: {e}", self.inner.address),
        }

        self.inner.handshake_done.store(true, Ordering::SeqCst);
        if let Some(signal) = lock(&self.inner.handshake_signal).take() {
            let _ = signal.send(());
        }
    }

    /// Block until the region handshake lands or the deadline passes.
    pub(crate) async fn wait_handshake(&self, deadline: Duration) -> Result<(), NetError> {
        if self.inner.handshake_done.load(Ordering::SeqCst) {
            return Ok(());
        }
        let rx = {
            let (tx, rx) = oneshot::channel();
            *lock(&self.inner.handshake_signal) = Some(tx);
            rx
        };
        if self.inner.handshake_done.load(Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut state = lock(&self.inner.state);
            if *state == CircuitState::Connecting {
                *state = CircuitState::Handshaking;
            }
        }
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(NetError::HandshakeTimeout),
        }
    }

    pub(crate) fn since_last_receive(&self) -> Duration {
        lock(&self.inner.last_receive).elapsed()
    }

    pub(crate) fn is_disconnect_candidate(&self) -> bool {
        self.inner.disconnect_candidate.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_disconnect_candidate(&self) {
        self.inner
            .disconnect_candidate
            .store(true, Ordering::Relaxed);
    }

    /// Number of reliable packets still waiting for an acknowledgment.
    pub fn unacked_count(&self) -> usize {
        lock(&self.inner.unacked).len()
    }

    pub(crate) async fn shutdown(&self, send_close: bool) {
        {
            let mut state = lock(&self.inner.state);
            if matches!(*state, CircuitState::Disconnecting | CircuitState::Closed) {
                return;
            }
            *state = CircuitState::Disconnecting;
        }

        if send_close {
            if let Err(e) = self.send(&Message::CloseCircuit).await {
                log::debug!("close-circuit send to {} failed: {e}", self.inner.address);
            }
        }

        let _ = self.inner.shutdown.send(true);

        let abandoned: Vec<(u32, UnackedEntry)> =
            lock(&self.inner.unacked).drain().collect();
        for (sequence, mut entry) in abandoned {
            log::error!(
                "abandoning reliable {} seq {sequence} on circuit close",
                entry.kind
            );
            if let Some(done) = entry.done.take() {
                let _ = done.send(Err(NetError::Abandoned {
                    sequence,
                    resends: entry.resends,
                }));
            }
        }

        *lock(&self.inner.state) = CircuitState::Closed;
        log::info!("circuit to {} closed", self.inner.address);
    }

    /// One pass of the reliability sweep; resends overdue entries and
    /// abandons the ones past their budget.
    async fn sweep_unacked(&self) {
        let now = Instant::now();
        let mut resend = Vec::new();
        let mut abandoned = Vec::new();
        {
            let mut unacked = lock(&self.inner.unacked);
            let overdue: Vec<u32> = unacked
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_sent) >= e.ack_timeout)
                .map(|(&seq, _)| seq)
                .collect();
            for sequence in overdue {
                let exhausted = unacked
                    .get(&sequence)
                    .is_some_and(|e| e.resends >= e.max_resends);
                if exhausted {
                    if let Some(mut entry) = unacked.remove(&sequence) {
                        abandoned.push((sequence, entry.resends, entry.kind, entry.done.take()));
                    }
                } else if let Some(entry) = unacked.get_mut(&sequence) {
                    entry.resends += 1;
                    entry.last_sent = now;
                    entry.datagram[0] |= PacketFlags::RESENT.bits();
                    resend.push((sequence, entry.datagram.clone()));
                }
            }
        }

        for (sequence, resends, kind, done) in abandoned {
            log::error!(
                "reliable {kind} seq {sequence} abandoned after {resends} resends to {}",
                self.inner.address
            );
            if let Some(done) = done {
                let _ = done.send(Err(NetError::Abandoned { sequence, resends }));
            }
        }

        for (sequence, datagram) in resend {
            log::debug!("resending seq {sequence} to {}", self.inner.address);
            match self.inner.socket.send(&datagram).await {
                Ok(_) => lock(&self.inner.stats).resent_packets += 1,
                Err(e) => log::warn!("resend of seq {sequence} failed: {e}"),
            }
        }
    }

    /// Flush pending ACK ids that found no outbound packet to ride on.
    async fn flush_acks(&self) {
        let ids: Vec<u32> = {
            let mut pending = lock(&self.inner.pending_acks);
            if pending.is_empty() {
                return;
            }
            let take = pending.len().min(MAX_APPENDED_ACKS);
            pending.drain(..take).collect()
        };
        let ack = Message::PacketAck(messages::PacketAck { ids });
        if let Err(e) = self.send(&ack).await {
            log::warn!("ack flush to {} failed: {e}", self.inner.address);
        }
    }

    async fn send_ping(&self) {
        let (ping_id, oldest) = {
            let mut ping = lock(&self.inner.ping);
            let id = ping.next_ping_id;
            ping.next_ping_id = ping.next_ping_id.wrapping_add(1);
            ping.outstanding = Some((id, Instant::now()));
            let oldest = lock(&self.inner.unacked).keys().min().copied().unwrap_or(0);
            (id, oldest)
        };
        let ping = Message::StartPingCheck(StartPingCheck {
            ping_id,
            oldest_unacked: oldest,
        });
        if let Err(e) = self.send(&ping).await {
            log::warn!("ping to {} failed: {e}", self.inner.address);
        }
    }
}

async fn recv_loop(circuit: Circuit, inbox: mpsc::UnboundedSender<IncomingPacket>) {
    let mut shutdown = circuit.inner.shutdown.subscribe();
    if *shutdown.borrow() {
        return;
    }
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = circuit.inner.socket.recv(&mut buf) => {
                match received {
                    Ok(len) => match circuit.handle_datagram(&buf[..len]).await {
                        Ok(Some((packet_header, message))) => {
                            let packet = IncomingPacket {
                                circuit: circuit.clone(),
                                sequence: packet_header.sequence,
                                message: Arc::new(message),
                            };
                            if inbox.send(packet).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log::warn!("bad datagram from {}: {e}", circuit.address());
                        }
                    },
                    Err(e) => {
                        log::warn!("recv on circuit {} failed: {e}", circuit.address());
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
    log::trace!("recv loop for {} exited", circuit.address());
}

async fn maintenance_loop(circuit: Circuit) {
    let mut shutdown = circuit.inner.shutdown.subscribe();
    if *shutdown.borrow() {
        return;
    }
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                tick += 1;
                circuit.sweep_unacked().await;
                circuit.flush_acks().await;
                if tick % PING_EVERY_TICKS == 0 && circuit.is_connected() {
                    circuit.send_ping().await;
                }
            }
        }
    }
}
