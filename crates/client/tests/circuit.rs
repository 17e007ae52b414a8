//! Loopback tests: a scripted fake simulator on a plain UDP socket drives
//! the real session stack through connect, reliability, duplicate
//! suppression, and logout.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use uuid::Uuid;

use sim_client::login::LoginTransport;
use sim_client::{ClientEvent, DisconnectReason, LoginError, LoginStatus, NetError, Session, Settings};
use sim_proto::header::{self, PacketFlags, PacketHeader};
use sim_proto::messages::{self, ids, KillObject, Message, RegionHandshake};
use sim_proto::zerocode;

struct FakeSim {
    socket: UdpSocket,
    sequence: u32,
}

impl FakeSim {
    async fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            socket,
            sequence: 0,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    fn frame(&mut self, message: &Message, reliable: bool, acks: &[u32]) -> Vec<u8> {
        self.sequence += 1;
        let mut flags = PacketFlags::empty();
        if reliable {
            flags |= PacketFlags::RELIABLE;
        }
        if !acks.is_empty() {
            flags |= PacketFlags::APPENDED_ACKS;
        }
        let mut buf = Vec::new();
        PacketHeader::new(flags, self.sequence).encode(&mut buf);
        let (id, body) = message.encode_parts();
        buf.extend_from_slice(&id);
        buf.extend_from_slice(&body);
        if !acks.is_empty() {
            header::append_acks(&mut buf, acks);
        }
        buf
    }

    async fn send(&mut self, to: SocketAddr, message: &Message, acks: &[u32]) {
        let buf = self.frame(message, false, acks);
        self.socket.send_to(&buf, to).await.unwrap();
    }

    async fn recv(&self) -> (PacketHeader, Message, Vec<u32>, SocketAddr) {
        let mut buf = [0u8; 4096];
        let (len, from) = self.socket.recv_from(&mut buf).await.unwrap();
        let data = &buf[..len];
        let (packet_header, body_start) = PacketHeader::decode(data).unwrap();
        let (body, acks) =
            header::split_appended_acks(packet_header.flags, &data[body_start..]).unwrap();
        let zerocoded = packet_header.flags.contains(PacketFlags::ZEROCODED);
        let (_, message) = messages::decode_message(body, zerocoded).unwrap();
        (packet_header, message, acks, from)
    }

    /// Receive until a message matches, skipping pings, acks, and other
    /// background chatter.
    async fn expect(
        &self,
        what: &str,
        pred: impl Fn(&Message) -> bool,
    ) -> (PacketHeader, Message, Vec<u32>, SocketAddr) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let received = self.recv().await;
                if pred(&received.1) {
                    return received;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }
}

fn test_session() -> Session {
    let session = Session::new(Settings::default());
    session.agent().set_ids(Uuid::new_v4(), Uuid::new_v4());
    session.set_circuit_code(0x00C0DE01);
    session
}

/// Drive the handshake from the simulator side: ack the UseCircuitCode,
/// send a RegionHandshake, and swallow the bring-up traffic.
async fn accept_connect(sim: &mut FakeSim) -> SocketAddr {
    let (header, message, _, client) = sim
        .expect("UseCircuitCode", |m| {
            matches!(m, Message::UseCircuitCode(_))
        })
        .await;
    assert!(header.flags.contains(PacketFlags::RELIABLE));
    let Message::UseCircuitCode(use_code) = message else {
        unreachable!()
    };
    assert_eq!(use_code.code, 0x00C0DE01);

    let handshake = Message::RegionHandshake(RegionHandshake {
        sim_name: "Loopback".to_owned(),
        region_id: Uuid::new_v4(),
        ..Default::default()
    });
    sim.send(client, &handshake, &[header.sequence]).await;
    client
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_completes_handshake_and_bootstraps() {
    let mut sim = FakeSim::bind().await;
    let sim_addr = sim.addr();
    let session = test_session();
    let mut events = session.events().subscribe();

    let connect = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(sim_addr, 7, true, None).await })
    };

    accept_connect(&mut sim).await;

    let (_, reply, _, _) = sim
        .expect("RegionHandshakeReply", |m| {
            matches!(m, Message::RegionHandshakeReply(_))
        })
        .await;
    let Message::RegionHandshakeReply(reply) = reply else {
        unreachable!()
    };
    assert_eq!(reply.agent_id, session.agent().agent_id());

    let (_, throttle, _, _) = sim
        .expect("AgentThrottle", |m| matches!(m, Message::AgentThrottle(_)))
        .await;
    let Message::AgentThrottle(throttle) = throttle else {
        unreachable!()
    };
    assert_eq!(throttle.throttles.len(), 28);

    sim.expect("CompleteAgentMovement", |m| {
        matches!(m, Message::CompleteAgentMovement(_))
    })
    .await;

    let circuit = connect.await.unwrap().unwrap();
    assert!(circuit.is_connected());
    assert_eq!(circuit.region_name(), "Loopback");

    let connected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(ClientEvent::SimConnected { address, .. }) => return address,
                Some(_) => {}
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(connected, sim_addr);

    session
        .shutdown(DisconnectReason::ClientInitiated, "test over")
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reliable_send_is_resent_then_cleared_by_appended_ack() {
    let mut sim = FakeSim::bind().await;
    let sim_addr = sim.addr();
    let session = test_session();

    let connect = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(sim_addr, 7, false, None).await })
    };
    let client = accept_connect(&mut sim).await;
    sim.expect("RegionHandshakeReply", |m| {
        matches!(m, Message::RegionHandshakeReply(_))
    })
    .await;
    let circuit = connect.await.unwrap().unwrap();

    // first transmission is dropped on the floor by the fake sim
    let handle = circuit
        .send_reliable(
            &Message::EconomyDataRequest,
            3,
            Duration::from_millis(300),
        )
        .await
        .unwrap();
    let (first, _, _, _) = sim
        .expect("EconomyDataRequest", |m| {
            matches!(m, Message::EconomyDataRequest)
        })
        .await;
    assert!(first.flags.contains(PacketFlags::RELIABLE));
    assert!(!first.flags.contains(PacketFlags::RESENT));

    // the sweep retransmits with the same sequence and the RESENT flag
    let (resent, _, _, _) = sim
        .expect("resent EconomyDataRequest", |m| {
            matches!(m, Message::EconomyDataRequest)
        })
        .await;
    assert_eq!(resent.sequence, first.sequence);
    assert!(resent.flags.contains(PacketFlags::RESENT));

    // an appended-ACK trailer on unrelated traffic clears the entry
    sim.send(
        client,
        &Message::StartPingCheck(messages::StartPingCheck {
            ping_id: 1,
            oldest_unacked: 0,
        }),
        &[first.sequence],
    )
    .await;

    handle.wait().await.unwrap();
    assert_eq!(circuit.unacked_count(), 0);

    session
        .shutdown(DisconnectReason::ClientInitiated, "test over")
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reliable_send_is_abandoned_after_resend_budget() {
    let mut sim = FakeSim::bind().await;
    let sim_addr = sim.addr();
    let session = test_session();

    let connect = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(sim_addr, 7, false, None).await })
    };
    accept_connect(&mut sim).await;
    let circuit = connect.await.unwrap().unwrap();

    let handle = circuit
        .send_reliable(
            &Message::EconomyDataRequest,
            1,
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    match handle.wait().await {
        Err(NetError::Abandoned { resends, .. }) => assert_eq!(resends, 1),
        other => panic!("expected abandonment, got {other:?}"),
    }

    session
        .shutdown(DisconnectReason::ClientInitiated, "test over")
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_inbound_is_acked_but_dispatched_once() {
    let mut sim = FakeSim::bind().await;
    let sim_addr = sim.addr();
    let session = test_session();

    let dispatches = Arc::new(AtomicUsize::new(0));
    {
        let dispatches = dispatches.clone();
        session.pipeline().register(
            ids::KILL_OBJECT,
            false,
            Arc::new(move |_pkt| {
                dispatches.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    let connect = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(sim_addr, 7, false, None).await })
    };
    let client = accept_connect(&mut sim).await;
    connect.await.unwrap().unwrap();

    let kill = Message::KillObject(KillObject {
        local_ids: vec![4242],
    });
    let datagram = sim.frame(&kill, true, &[]);
    let kill_sequence = sim.sequence;
    sim.socket.send_to(&datagram, client).await.unwrap();
    sim.socket.send_to(&datagram, client).await.unwrap();

    // both copies must be acknowledged; the flush rides a PacketAck
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut acked = 0;
        while acked < 2 {
            let (_, message, acks, _) = sim.recv().await;
            acked += acks.iter().filter(|&&id| id == kill_sequence).count();
            if let Message::PacketAck(ack) = message {
                acked += ack.ids.iter().filter(|&&id| id == kill_sequence).count();
            }
        }
    })
    .await
    .expect("duplicate was never acknowledged");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dispatches.load(Ordering::SeqCst), 1);

    session
        .shutdown(DisconnectReason::ClientInitiated, "test over")
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zerocoded_datagram_is_expanded_before_dispatch() {
    let mut sim = FakeSim::bind().await;
    let sim_addr = sim.addr();
    let session = test_session();

    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        session.pipeline().register(
            ids::KILL_OBJECT,
            false,
            Arc::new(move |pkt| {
                if let Message::KillObject(kill) = pkt.message.as_ref() {
                    if kill.local_ids == vec![1, 0] {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }),
        );
    }

    let connect = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(sim_addr, 7, false, None).await })
    };
    let client = accept_connect(&mut sim).await;
    connect.await.unwrap().unwrap();

    // hand-build a zerocoded KillObject whose body compacts its zero run
    let kill = Message::KillObject(KillObject {
        local_ids: vec![1, 0],
    });
    let (id, body) = kill.encode_parts();
    let coded = zerocode::compact(&body);
    assert!(coded.len() < body.len());

    sim.sequence += 1;
    let mut datagram = Vec::new();
    PacketHeader::new(PacketFlags::ZEROCODED, sim.sequence).encode(&mut datagram);
    datagram.extend_from_slice(&id);
    datagram.extend_from_slice(&coded);
    sim.socket.send_to(&datagram, client).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("zerocoded kill never dispatched");

    session
        .shutdown(DisconnectReason::ClientInitiated, "test over")
        .await;
}

struct ScriptedLogin {
    responses: std::sync::Mutex<std::collections::VecDeque<serde_json::Value>>,
}

impl ScriptedLogin {
    fn new(responses: Vec<serde_json::Value>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }
}

impl LoginTransport for ScriptedLogin {
    fn post(
        &self,
        _url: &str,
        _request: &sim_proto::LoginRequest,
    ) -> impl std::future::Future<Output = Result<serde_json::Value, LoginError>> + Send {
        let value = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted login ran out of responses");
        async move { Ok(value) }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_follows_redirect_and_bootstraps_first_circuit() {
    let mut sim = FakeSim::bind().await;
    let sim_addr = sim.addr();
    let session = Session::new(Settings::default());
    let mut events = session.events().subscribe();

    let agent_id = Uuid::new_v4();
    let transport = ScriptedLogin::new(vec![
        serde_json::json!({
            "login": "indeterminate",
            "next_url": "https://login2.example/",
            "next_method": "login_to_simulator",
            "next_duration": 0,
        }),
        serde_json::json!({
            "login": "true",
            "agent_id": agent_id.to_string(),
            "session_id": Uuid::new_v4().to_string(),
            "first_name": "Loop",
            "last_name": "Back",
            "circuit_code": 0x00C0DE01u32,
            "sim_ip": "127.0.0.1",
            "sim_port": sim_addr.port(),
            "region_x": 1000,
            "region_y": 996,
            "seed_capability": "https://sim.example/cap/seed",
            "udp_blacklist": "EnableSimulator",
        }),
    ]);

    let login_task = {
        let session = session.clone();
        tokio::spawn(async move {
            sim_client::login(&session, &transport, "https://login.example/",
                &sim_proto::LoginRequest::new("Loop", "Back", "$1$x", "sim-client", "0.1"))
            .await
        })
    };

    let client = accept_connect(&mut sim).await;
    sim.expect("CompleteAgentMovement", |m| {
        matches!(m, Message::CompleteAgentMovement(_))
    })
    .await;
    sim.expect("EconomyDataRequest", |m| {
        matches!(m, Message::EconomyDataRequest)
    })
    .await;
    let _ = client;

    let reply = login_task.await.unwrap().unwrap();
    assert_eq!(reply.first_name, "Loop");
    assert_eq!(session.agent().agent_id(), agent_id);
    assert_eq!(session.circuit_code(), 0x00C0DE01);
    assert!(session
        .pipeline()
        .is_blacklisted(sim_proto::messages::ids::ENABLE_SIMULATOR));
    let current = session.current().unwrap();
    assert_eq!(current.address(), sim_addr);
    assert_eq!(
        current.seed_capability().as_deref(),
        Some("https://sim.example/cap/seed")
    );

    let mut saw_redirect = false;
    let mut saw_success = false;
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::LoginProgress { status, .. } = event {
            saw_redirect |= status == LoginStatus::Redirecting;
            saw_success |= status == LoginStatus::Success;
        }
    }
    assert!(saw_redirect && saw_success);

    session
        .shutdown(DisconnectReason::ClientInitiated, "test over")
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn logout_waits_for_reply_and_shuts_down() {
    let mut sim = FakeSim::bind().await;
    let sim_addr = sim.addr();
    let session = test_session();
    let mut events = session.events().subscribe();

    let connect = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(sim_addr, 7, true, None).await })
    };
    let client = accept_connect(&mut sim).await;
    connect.await.unwrap().unwrap();

    let logout = {
        let session = session.clone();
        tokio::spawn(async move { session.logout().await })
    };

    sim.expect("LogoutRequest", |m| matches!(m, Message::LogoutRequest(_)))
        .await;
    let reply = Message::LogoutReply(messages::LogoutReply {
        agent_id: session.agent().agent_id(),
        session_id: session.agent().session_id(),
        item_ids: Vec::new(),
    });
    sim.send(client, &reply, &[]).await;

    logout.await.unwrap().unwrap();

    let disconnected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(ClientEvent::Disconnected { reason, .. }) => return reason,
                Some(_) => {}
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(disconnected, DisconnectReason::ClientInitiated);
}
