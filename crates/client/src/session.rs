//! Fleet management: the list of live circuits, the current-simulator
//! pointer, global pipeline tasks, the disconnect sweep, and the
//! interpolation timer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use glam::Vec3;
use tokio::sync::{mpsc, oneshot, watch};

use sim_proto::messages::{
    ids, AgentThrottle, AgentUpdate, CompleteAgentMovement, LogoutRequest, Message, UseCircuitCode,
};
use sim_proto::Throttle;

use crate::agent::AgentContext;
use crate::circuit::{Circuit, DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RESENDS};
use crate::error::{DisconnectReason, NetError};
use crate::events::{ClientEvent, EventBroadcaster};
use crate::interp;
use crate::objects::ObjectTracker;
use crate::pipeline::{IncomingPacket, OutgoingPacket, PacketPipeline};
use crate::settings::Settings;

type DrainerChannels = (
    mpsc::UnboundedReceiver<IncomingPacket>,
    mpsc::UnboundedReceiver<OutgoingPacket>,
);

struct SessionShared {
    settings: Arc<Settings>,
    agent: Arc<AgentContext>,
    events: EventBroadcaster,
    pipeline: PacketPipeline,

    circuits: Mutex<Vec<Circuit>>,
    current: Mutex<Option<Circuit>>,
    circuit_code: AtomicU32,
    throttle: Mutex<Throttle>,

    started: AtomicBool,
    shutting_down: AtomicBool,
    drainer_channels: Mutex<Option<DrainerChannels>>,
    logout_signal: Mutex<Option<oneshot::Sender<()>>>,
    shutdown: watch::Sender<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The client session: owns the circuit fleet and the background tasks.
/// Cheap to clone. A session is single-use; after [`Session::shutdown`]
/// build a fresh one to reconnect.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionShared>,
}

impl Session {
    pub fn new(settings: Settings) -> Self {
        let (pipeline, inbox_rx, outbox_rx) = PacketPipeline::new();
        let events = EventBroadcaster::new();
        let agent = Arc::new(AgentContext::new());
        let settings = Arc::new(settings);
        let (shutdown, _) = watch::channel(false);

        let session = Self {
            inner: Arc::new(SessionShared {
                settings: settings.clone(),
                agent: agent.clone(),
                events: events.clone(),
                pipeline: pipeline.clone(),
                circuits: Mutex::new(Vec::new()),
                current: Mutex::new(None),
                circuit_code: AtomicU32::new(0),
                throttle: Mutex::new(Throttle::default()),
                started: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                drainer_channels: Mutex::new(Some((inbox_rx, outbox_rx))),
                logout_signal: Mutex::new(None),
                shutdown,
            }),
        };

        let tracker = ObjectTracker::new(settings, events, agent);
        tracker.register(&pipeline);
        session.register_session_handlers();
        session
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn agent(&self) -> &Arc<AgentContext> {
        &self.inner.agent
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    pub fn pipeline(&self) -> &PacketPipeline {
        &self.inner.pipeline
    }

    pub fn circuit_code(&self) -> u32 {
        self.inner.circuit_code.load(Ordering::Relaxed)
    }

    pub fn set_circuit_code(&self, code: u32) {
        self.inner.circuit_code.store(code, Ordering::Relaxed);
    }

    pub fn circuits(&self) -> Vec<Circuit> {
        lock(&self.inner.circuits).clone()
    }

    pub fn current(&self) -> Option<Circuit> {
        lock(&self.inner.current).clone()
    }

    pub fn find_by_address(&self, address: SocketAddr) -> Option<Circuit> {
        lock(&self.inner.circuits)
            .iter()
            .find(|c| c.address() == address)
            .cloned()
    }

    pub fn find_by_handle(&self, handle: u64) -> Option<Circuit> {
        lock(&self.inner.circuits)
            .iter()
            .find(|c| c.region_handle() == handle)
            .cloned()
    }

    /// Bring up a circuit to a simulator and block until its region
    /// handshake lands (or the simulator timeout passes).
    pub async fn connect(
        &self,
        address: SocketAddr,
        region_handle: u64,
        set_current: bool,
        seed_capability: Option<String>,
    ) -> Result<Circuit, NetError> {
        if let Some(existing) = self.find_by_address(address) {
            if set_current {
                self.set_current(&existing, seed_capability).await?;
            }
            return Ok(existing);
        }

        self.ensure_started();

        let code = self.circuit_code();
        let circuit = Circuit::start(
            address,
            code,
            self.inner.agent.clone(),
            self.inner.pipeline.inbox_sender(),
            seed_capability.clone(),
            region_handle,
        )
        .await?;
        lock(&self.inner.circuits).push(circuit.clone());

        let use_circuit = Message::UseCircuitCode(UseCircuitCode {
            code,
            session_id: self.inner.agent.session_id(),
            agent_id: self.inner.agent.agent_id(),
        });
        circuit
            .send_reliable(&use_circuit, DEFAULT_MAX_RESENDS, DEFAULT_ACK_TIMEOUT)
            .await?;

        match circuit
            .wait_handshake(self.inner.settings.simulator_timeout())
            .await
        {
            Ok(()) => {
                log::info!("connected to simulator {address}");
                self.inner.events.emit(ClientEvent::SimConnected {
                    address,
                    region_handle,
                });
                if set_current {
                    self.set_current(&circuit, seed_capability).await?;
                }
                Ok(circuit)
            }
            Err(e) => {
                log::warn!("no region handshake from {address}");
                self.disconnect_with_reason(&circuit, true, DisconnectReason::ClientInitiated)
                    .await;
                Err(e)
            }
        }
    }

    /// Make a circuit the current simulator: push the agent throttle and
    /// complete the agent movement there.
    pub async fn set_current(
        &self,
        circuit: &Circuit,
        seed_capability: Option<String>,
    ) -> Result<(), NetError> {
        circuit.set_seed_capability(seed_capability);
        *lock(&self.inner.current) = Some(circuit.clone());
        log::info!("current simulator is now {}", circuit.address());

        let agent_id = self.inner.agent.agent_id();
        let session_id = self.inner.agent.session_id();

        if self.inner.settings.send_agent_throttle {
            let throttle = *lock(&self.inner.throttle);
            let message = Message::AgentThrottle(AgentThrottle {
                agent_id,
                session_id,
                circuit_code: circuit.circuit_code(),
                gen_counter: 0,
                throttles: throttle.to_bytes().to_vec(),
            });
            circuit
                .send_reliable(&message, DEFAULT_MAX_RESENDS, DEFAULT_ACK_TIMEOUT)
                .await?;
        }

        let movement = Message::CompleteAgentMovement(CompleteAgentMovement {
            agent_id,
            session_id,
            circuit_code: circuit.circuit_code(),
        });
        circuit
            .send_reliable(&movement, DEFAULT_MAX_RESENDS, DEFAULT_ACK_TIMEOUT)
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self, circuit: &Circuit, send_close: bool) {
        self.disconnect_with_reason(circuit, send_close, DisconnectReason::ClientInitiated)
            .await;
    }

    async fn disconnect_with_reason(
        &self,
        circuit: &Circuit,
        send_close: bool,
        reason: DisconnectReason,
    ) {
        lock(&self.inner.circuits).retain(|c| c.address() != circuit.address());
        {
            let mut current = lock(&self.inner.current);
            if current
                .as_ref()
                .is_some_and(|c| c.address() == circuit.address())
            {
                *current = None;
            }
        }

        circuit.shutdown(send_close).await;
        circuit.world().clear();
        self.inner.events.emit(ClientEvent::SimDisconnected {
            address: circuit.address(),
            reason,
        });

        let last_one_gone = lock(&self.inner.circuits).is_empty();
        if last_one_gone
            && self.inner.started.load(Ordering::SeqCst)
            && !self.inner.shutting_down.load(Ordering::SeqCst)
        {
            self.shutdown(DisconnectReason::SimShutdown, "last simulator went away")
                .await;
        }
    }

    /// Tear down every circuit and stop the background tasks. The session
    /// cannot be reused afterwards.
    pub async fn shutdown(&self, reason: DisconnectReason, message: &str) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("session shutdown: {} ({message})", reason.as_str());

        let circuits: Vec<Circuit> = {
            let mut guard = lock(&self.inner.circuits);
            guard.drain(..).collect()
        };
        *lock(&self.inner.current) = None;

        let send_close = matches!(
            reason,
            DisconnectReason::ClientInitiated | DisconnectReason::SimShutdown
        );
        for circuit in circuits {
            circuit.shutdown(send_close).await;
            circuit.world().clear();
            self.inner.events.emit(ClientEvent::SimDisconnected {
                address: circuit.address(),
                reason,
            });
        }

        let _ = self.inner.shutdown.send(true);
        self.inner.events.emit(ClientEvent::Disconnected {
            reason,
            message: message.to_owned(),
        });
    }

    /// Request a clean logout from the current simulator and wait for the
    /// reply; a missed reply forces shutdown with a network timeout.
    pub async fn logout(&self) -> Result<(), NetError> {
        let Some(current) = self.current() else {
            return Err(NetError::NotConnected);
        };

        let rx = {
            let (tx, rx) = oneshot::channel();
            *lock(&self.inner.logout_signal) = Some(tx);
            rx
        };
        let request = Message::LogoutRequest(LogoutRequest {
            agent_id: self.inner.agent.agent_id(),
            session_id: self.inner.agent.session_id(),
        });
        current
            .send_reliable(&request, DEFAULT_MAX_RESENDS, DEFAULT_ACK_TIMEOUT)
            .await?;

        match tokio::time::timeout(self.inner.settings.logout_timeout(), rx).await {
            Ok(Ok(())) => {
                self.shutdown(DisconnectReason::ClientInitiated, "logout complete")
                    .await;
                Ok(())
            }
            _ => {
                self.shutdown(DisconnectReason::NetworkTimeout, "no logout reply")
                    .await;
                Err(NetError::LogoutTimeout)
            }
        }
    }

    /// Queue a message to the current simulator through the paced outbox.
    pub fn send_to_current(&self, message: Message, reliable: bool) -> Result<(), NetError> {
        let current = self.current().ok_or(NetError::NotConnected)?;
        self.inner.pipeline.queue(current, message, reliable);
        Ok(())
    }

    /// Replace the throttle and push it to the current simulator.
    pub async fn set_throttle(&self, throttle: Throttle) -> Result<(), NetError> {
        *lock(&self.inner.throttle) = throttle.clamped();
        let Some(current) = self.current() else {
            return Ok(());
        };
        let message = Message::AgentThrottle(AgentThrottle {
            agent_id: self.inner.agent.agent_id(),
            session_id: self.inner.agent.session_id(),
            circuit_code: current.circuit_code(),
            gen_counter: 0,
            throttles: throttle.clamped().to_bytes().to_vec(),
        });
        current
            .send_reliable(&message, DEFAULT_MAX_RESENDS, DEFAULT_ACK_TIMEOUT)
            .await?;
        Ok(())
    }

    pub fn throttle(&self) -> Throttle {
        *lock(&self.inner.throttle)
    }

    /// Presence heartbeat: camera and control state derived from the agent
    /// mirrors.
    pub fn send_agent_update(&self, control_flags: u32) -> Result<(), NetError> {
        let state = self.inner.agent.state();
        let message = Message::AgentUpdate(AgentUpdate {
            agent_id: self.inner.agent.agent_id(),
            session_id: self.inner.agent.session_id(),
            body_rotation: state.rotation,
            head_rotation: state.rotation,
            state: 0,
            camera_center: state.position,
            camera_at_axis: Vec3::X,
            camera_left_axis: Vec3::Y,
            camera_up_axis: Vec3::Z,
            far: 128.0,
            control_flags,
            flags: 0,
        });
        self.send_to_current(message, false)
    }

    fn ensure_started(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some((inbox_rx, outbox_rx)) = lock(&self.inner.drainer_channels).take() else {
            return;
        };
        self.inner
            .pipeline
            .spawn_drainers(inbox_rx, outbox_rx, self.inner.shutdown.subscribe());
        tokio::spawn(disconnect_sweep_loop(self.clone()));
        if self.inner.settings.use_interpolation_timer {
            tokio::spawn(interpolation_loop(self.clone()));
        }
        log::debug!("session background tasks started");
    }

    fn register_session_handlers(&self) {
        let pipeline = self.inner.pipeline.clone();

        let weak = Arc::downgrade(&self.inner);
        pipeline.register(
            ids::ENABLE_SIMULATOR,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                let Some(inner) = weak.upgrade() else { return };
                let session = Session { inner };
                if !session.inner.settings.multiple_sims {
                    return;
                }
                if let Message::EnableSimulator(enable) = pkt.message.as_ref() {
                    let address = SocketAddr::from((enable.ip, enable.port));
                    if session.find_by_address(address).is_some() {
                        return;
                    }
                    let handle = enable.handle;
                    log::info!("neighbor simulator enabled at {address}");
                    tokio::spawn(async move {
                        if let Err(e) = session.connect(address, handle, false, None).await {
                            log::warn!("child circuit to {address} failed: {e}");
                        }
                    });
                }
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        pipeline.register(
            ids::DISABLE_SIMULATOR,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                let Some(inner) = weak.upgrade() else { return };
                let session = Session { inner };
                let circuit = pkt.circuit.clone();
                log::info!("simulator {} asked us to disable it", circuit.address());
                tokio::spawn(async move {
                    session
                        .disconnect_with_reason(&circuit, false, DisconnectReason::ServerInitiated)
                        .await;
                });
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        pipeline.register(
            ids::KICK_USER,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                let Some(inner) = weak.upgrade() else { return };
                let session = Session { inner };
                if let Message::KickUser(kick) = pkt.message.as_ref() {
                    let reason = kick.reason.clone();
                    log::warn!("kicked by the server: {reason}");
                    tokio::spawn(async move {
                        session
                            .shutdown(DisconnectReason::ServerInitiated, &reason)
                            .await;
                    });
                }
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        pipeline.register(
            ids::LOGOUT_REPLY,
            false,
            Arc::new(move |_pkt: &IncomingPacket| {
                let Some(inner) = weak.upgrade() else { return };
                if let Some(signal) = lock(&inner.logout_signal).take() {
                    let _ = signal.send(());
                }
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        pipeline.register(
            ids::AGENT_MOVEMENT_COMPLETE,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                let Some(inner) = weak.upgrade() else { return };
                if let Message::AgentMovementComplete(complete) = pkt.message.as_ref() {
                    pkt.circuit.set_region_handle(complete.region_handle);
                    inner.agent.update(|state| {
                        state.position = complete.position;
                    });
                    log::debug!(
                        "agent movement complete in {} at {}",
                        pkt.circuit.address(),
                        complete.position
                    );
                }
            }),
        );
    }
}

/// Marks quiet circuits as disconnect candidates and shuts them down after
/// a second quiet interval. Losing the current simulator takes the whole
/// session down with a network timeout.
async fn disconnect_sweep_loop(session: Session) {
    let quiet_after = session.inner.settings.simulator_timeout();
    let mut shutdown = session.inner.shutdown.subscribe();
    let mut interval = tokio::time::interval(quiet_after);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                for circuit in session.circuits() {
                    if !circuit.is_connected() || circuit.since_last_receive() <= quiet_after {
                        continue;
                    }
                    if !circuit.is_disconnect_candidate() {
                        circuit.mark_disconnect_candidate();
                        log::debug!("{} is a disconnect candidate", circuit.address());
                        continue;
                    }
                    log::warn!("simulator {} timed out", circuit.address());
                    let was_current = session
                        .current()
                        .is_some_and(|c| c.address() == circuit.address());
                    if was_current {
                        session
                            .shutdown(DisconnectReason::NetworkTimeout, "current simulator timed out")
                            .await;
                    } else {
                        session
                            .disconnect_with_reason(&circuit, false, DisconnectReason::NetworkTimeout)
                            .await;
                    }
                }
            }
        }
    }
}

/// Cooperative interpolation tick across the fleet.
async fn interpolation_loop(session: Session) {
    let interval = session.inner.settings.interpolation_interval();
    let mut shutdown = session.inner.shutdown.subscribe();
    let mut last = Instant::now();

    loop {
        let started = Instant::now();
        let elapsed = started.duration_since(last);
        last = started;

        for circuit in session.circuits() {
            if circuit.is_connected() {
                interp::step_world(circuit.world(), circuit.stats().time_dilation, elapsed);
            }
        }

        let delay = interp::next_tick(interval, started.elapsed());
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
