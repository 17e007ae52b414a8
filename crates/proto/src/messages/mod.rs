//! Typed message catalog. Decoded packets become a tagged [`Message`]
//! variant; a static table maps message ids to block decoders. The grid
//! protocol defines hundreds of messages; this catalog covers the
//! transport, session, and object-update surface, and everything else
//! lands in [`Message::Unrecognized`].

mod agent;
mod circuit;
mod object;

pub use agent::*;
pub use circuit::*;
pub use object::*;

use std::fmt;

use crate::codec::{CodecError, Reader, Writer};
use crate::zerocode;

/// Message ids come in four frequency classes with different wire widths:
/// high ids are a single raw byte, medium ids follow one `0xFF`, low ids
/// are a big-endian u16 after two `0xFF`, and fixed ids occupy the top of
/// the low space (`FF FF FF xx`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    High(u8),
    Medium(u8),
    Low(u16),
    Fixed(u8),
}

impl MessageId {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let b0 = r.u8().map_err(|_| CodecError::UnknownMessageId)?;
        if b0 != 0xFF {
            return Ok(Self::High(b0));
        }
        let b1 = r.u8().map_err(|_| CodecError::UnknownMessageId)?;
        if b1 != 0xFF {
            return Ok(Self::Medium(b1));
        }
        let id = r.u16_be().map_err(|_| CodecError::UnknownMessageId)?;
        if id >= 0xFF00 {
            Ok(Self::Fixed(id as u8))
        } else {
            Ok(Self::Low(id))
        }
    }

    pub fn encode(&self, w: &mut Writer) {
        match *self {
            Self::High(n) => {
                debug_assert!(n != 0xFF);
                w.put_u8(n);
            }
            Self::Medium(n) => {
                w.put_u8(0xFF);
                w.put_u8(n);
            }
            Self::Low(n) => {
                debug_assert!(n < 0xFF00);
                w.put_u8(0xFF);
                w.put_u8(0xFF);
                w.put_u16_be(n);
            }
            Self::Fixed(n) => {
                w.put_bytes(&[0xFF, 0xFF, 0xFF, n]);
            }
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High(n) => write!(f, "High({n})"),
            Self::Medium(n) => write!(f, "Medium({n})"),
            Self::Low(n) => write!(f, "Low({n})"),
            Self::Fixed(n) => write!(f, "Fixed({n})"),
        }
    }
}

pub mod ids {
    use super::MessageId::{self, Fixed, High, Low, Medium};

    pub const START_PING_CHECK: MessageId = High(1);
    pub const COMPLETE_PING_CHECK: MessageId = High(2);
    pub const AGENT_UPDATE: MessageId = High(4);
    pub const OBJECT_UPDATE: MessageId = High(12);
    pub const OBJECT_UPDATE_COMPRESSED: MessageId = High(13);
    pub const OBJECT_UPDATE_CACHED: MessageId = High(14);
    pub const IMPROVED_TERSE_OBJECT_UPDATE: MessageId = High(15);
    pub const KILL_OBJECT: MessageId = High(16);
    pub const OBJECT_ANIMATION: MessageId = High(30);

    pub const REQUEST_MULTIPLE_OBJECTS: MessageId = Medium(3);
    pub const OBJECT_PROPERTIES: MessageId = Medium(9);
    pub const OBJECT_PROPERTIES_FAMILY: MessageId = Medium(10);

    pub const USE_CIRCUIT_CODE: MessageId = Low(3);
    pub const ECONOMY_DATA_REQUEST: MessageId = Low(24);
    pub const AGENT_THROTTLE: MessageId = Low(81);
    pub const SIM_STATS: MessageId = Low(140);
    pub const REGION_HANDSHAKE: MessageId = Low(148);
    pub const REGION_HANDSHAKE_REPLY: MessageId = Low(149);
    pub const ENABLE_SIMULATOR: MessageId = Low(151);
    pub const DISABLE_SIMULATOR: MessageId = Low(152);
    pub const PAY_PRICE_REPLY: MessageId = Low(162);
    pub const KICK_USER: MessageId = Low(163);
    pub const COMPLETE_AGENT_MOVEMENT: MessageId = Low(249);
    pub const AGENT_MOVEMENT_COMPLETE: MessageId = Low(250);
    pub const LOGOUT_REQUEST: MessageId = Low(252);
    pub const LOGOUT_REPLY: MessageId = Low(253);
    pub const OBJECT_PHYSICS_PROPERTIES: MessageId = Low(430);

    pub const PACKET_ACK: MessageId = Fixed(251);
    pub const OPEN_CIRCUIT: MessageId = Fixed(252);
    pub const CLOSE_CIRCUIT: MessageId = Fixed(253);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    UseCircuitCode(UseCircuitCode),
    PacketAck(PacketAck),
    OpenCircuit(OpenCircuit),
    CloseCircuit,
    StartPingCheck(StartPingCheck),
    CompletePingCheck(CompletePingCheck),

    RegionHandshake(RegionHandshake),
    RegionHandshakeReply(RegionHandshakeReply),
    CompleteAgentMovement(CompleteAgentMovement),
    AgentMovementComplete(AgentMovementComplete),
    AgentThrottle(AgentThrottle),
    AgentUpdate(AgentUpdate),
    LogoutRequest(LogoutRequest),
    LogoutReply(LogoutReply),
    KickUser(KickUser),
    EnableSimulator(EnableSimulator),
    DisableSimulator,
    SimStats(SimStats),
    EconomyDataRequest,

    ObjectUpdate(ObjectUpdate),
    ImprovedTerseObjectUpdate(TerseObjectUpdate),
    ObjectUpdateCompressed(ObjectUpdateCompressed),
    ObjectUpdateCached(ObjectUpdateCached),
    KillObject(KillObject),
    RequestMultipleObjects(RequestMultipleObjects),
    ObjectProperties(ObjectProperties),
    ObjectPropertiesFamily(ObjectPropertiesFamily),
    ObjectAnimation(ObjectAnimation),
    ObjectPhysicsProperties(ObjectPhysicsProperties),
    PayPriceReply(PayPriceReply),

    Unrecognized { id: MessageId, body: Vec<u8> },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Self::UseCircuitCode(_) => ids::USE_CIRCUIT_CODE,
            Self::PacketAck(_) => ids::PACKET_ACK,
            Self::OpenCircuit(_) => ids::OPEN_CIRCUIT,
            Self::CloseCircuit => ids::CLOSE_CIRCUIT,
            Self::StartPingCheck(_) => ids::START_PING_CHECK,
            Self::CompletePingCheck(_) => ids::COMPLETE_PING_CHECK,
            Self::RegionHandshake(_) => ids::REGION_HANDSHAKE,
            Self::RegionHandshakeReply(_) => ids::REGION_HANDSHAKE_REPLY,
            Self::CompleteAgentMovement(_) => ids::COMPLETE_AGENT_MOVEMENT,
            Self::AgentMovementComplete(_) => ids::AGENT_MOVEMENT_COMPLETE,
            Self::AgentThrottle(_) => ids::AGENT_THROTTLE,
            Self::AgentUpdate(_) => ids::AGENT_UPDATE,
            Self::LogoutRequest(_) => ids::LOGOUT_REQUEST,
            Self::LogoutReply(_) => ids::LOGOUT_REPLY,
            Self::KickUser(_) => ids::KICK_USER,
            Self::EnableSimulator(_) => ids::ENABLE_SIMULATOR,
            Self::DisableSimulator => ids::DISABLE_SIMULATOR,
            Self::SimStats(_) => ids::SIM_STATS,
            Self::EconomyDataRequest => ids::ECONOMY_DATA_REQUEST,
            Self::ObjectUpdate(_) => ids::OBJECT_UPDATE,
            Self::ImprovedTerseObjectUpdate(_) => ids::IMPROVED_TERSE_OBJECT_UPDATE,
            Self::ObjectUpdateCompressed(_) => ids::OBJECT_UPDATE_COMPRESSED,
            Self::ObjectUpdateCached(_) => ids::OBJECT_UPDATE_CACHED,
            Self::KillObject(_) => ids::KILL_OBJECT,
            Self::RequestMultipleObjects(_) => ids::REQUEST_MULTIPLE_OBJECTS,
            Self::ObjectProperties(_) => ids::OBJECT_PROPERTIES,
            Self::ObjectPropertiesFamily(_) => ids::OBJECT_PROPERTIES_FAMILY,
            Self::ObjectAnimation(_) => ids::OBJECT_ANIMATION,
            Self::ObjectPhysicsProperties(_) => ids::OBJECT_PHYSICS_PROPERTIES,
            Self::PayPriceReply(_) => ids::PAY_PRICE_REPLY,
            Self::Unrecognized { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UseCircuitCode(_) => "UseCircuitCode",
            Self::PacketAck(_) => "PacketAck",
            Self::OpenCircuit(_) => "OpenCircuit",
            Self::CloseCircuit => "CloseCircuit",
            Self::StartPingCheck(_) => "StartPingCheck",
            Self::CompletePingCheck(_) => "CompletePingCheck",
            Self::RegionHandshake(_) => "RegionHandshake",
            Self::RegionHandshakeReply(_) => "RegionHandshakeReply",
            Self::CompleteAgentMovement(_) => "CompleteAgentMovement",
            Self::AgentMovementComplete(_) => "AgentMovementComplete",
            Self::AgentThrottle(_) => "AgentThrottle",
            Self::AgentUpdate(_) => "AgentUpdate",
            Self::LogoutRequest(_) => "LogoutRequest",
            Self::LogoutReply(_) => "LogoutReply",
            Self::KickUser(_) => "KickUser",
            Self::EnableSimulator(_) => "EnableSimulator",
            Self::DisableSimulator => "DisableSimulator",
            Self::SimStats(_) => "SimStats",
            Self::EconomyDataRequest => "EconomyDataRequest",
            Self::ObjectUpdate(_) => "ObjectUpdate",
            Self::ImprovedTerseObjectUpdate(_) => "ImprovedTerseObjectUpdate",
            Self::ObjectUpdateCompressed(_) => "ObjectUpdateCompressed",
            Self::ObjectUpdateCached(_) => "ObjectUpdateCached",
            Self::KillObject(_) => "KillObject",
            Self::RequestMultipleObjects(_) => "RequestMultipleObjects",
            Self::ObjectProperties(_) => "ObjectProperties",
            Self::ObjectPropertiesFamily(_) => "ObjectPropertiesFamily",
            Self::ObjectAnimation(_) => "ObjectAnimation",
            Self::ObjectPhysicsProperties(_) => "ObjectPhysicsProperties",
            Self::PayPriceReply(_) => "PayPriceReply",
            Self::Unrecognized { .. } => "Unrecognized",
        }
    }

    /// Decode a message body whose id has already been read off the front.
    pub fn decode_body(id: MessageId, body: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(body);
        Ok(match id {
            ids::USE_CIRCUIT_CODE => Self::UseCircuitCode(UseCircuitCode::decode(&mut r)?),
            ids::PACKET_ACK => Self::PacketAck(PacketAck::decode(&mut r)?),
            ids::OPEN_CIRCUIT => Self::OpenCircuit(OpenCircuit::decode(&mut r)?),
            ids::CLOSE_CIRCUIT => Self::CloseCircuit,
            ids::START_PING_CHECK => Self::StartPingCheck(StartPingCheck::decode(&mut r)?),
            ids::COMPLETE_PING_CHECK => {
                Self::CompletePingCheck(CompletePingCheck::decode(&mut r)?)
            }
            ids::REGION_HANDSHAKE => Self::RegionHandshake(RegionHandshake::decode(&mut r)?),
            ids::REGION_HANDSHAKE_REPLY => {
                Self::RegionHandshakeReply(RegionHandshakeReply::decode(&mut r)?)
            }
            ids::COMPLETE_AGENT_MOVEMENT => {
                Self::CompleteAgentMovement(CompleteAgentMovement::decode(&mut r)?)
            }
            ids::AGENT_MOVEMENT_COMPLETE => {
                Self::AgentMovementComplete(AgentMovementComplete::decode(&mut r)?)
            }
            ids::AGENT_THROTTLE => Self::AgentThrottle(AgentThrottle::decode(&mut r)?),
            ids::AGENT_UPDATE => Self::AgentUpdate(AgentUpdate::decode(&mut r)?),
            ids::LOGOUT_REQUEST => Self::LogoutRequest(LogoutRequest::decode(&mut r)?),
            ids::LOGOUT_REPLY => Self::LogoutReply(LogoutReply::decode(&mut r)?),
            ids::KICK_USER => Self::KickUser(KickUser::decode(&mut r)?),
            ids::ENABLE_SIMULATOR => Self::EnableSimulator(EnableSimulator::decode(&mut r)?),
            ids::DISABLE_SIMULATOR => Self::DisableSimulator,
            ids::SIM_STATS => Self::SimStats(SimStats::decode(&mut r)?),
            ids::ECONOMY_DATA_REQUEST => Self::EconomyDataRequest,
            ids::OBJECT_UPDATE => Self::ObjectUpdate(ObjectUpdate::decode(&mut r)?),
            ids::IMPROVED_TERSE_OBJECT_UPDATE => {
                Self::ImprovedTerseObjectUpdate(TerseObjectUpdate::decode(&mut r)?)
            }
            ids::OBJECT_UPDATE_COMPRESSED => {
                Self::ObjectUpdateCompressed(ObjectUpdateCompressed::decode(&mut r)?)
            }
            ids::OBJECT_UPDATE_CACHED => {
                Self::ObjectUpdateCached(ObjectUpdateCached::decode(&mut r)?)
            }
            ids::KILL_OBJECT => Self::KillObject(KillObject::decode(&mut r)?),
            ids::REQUEST_MULTIPLE_OBJECTS => {
                Self::RequestMultipleObjects(RequestMultipleObjects::decode(&mut r)?)
            }
            ids::OBJECT_PROPERTIES => Self::ObjectProperties(ObjectProperties::decode(&mut r)?),
            ids::OBJECT_PROPERTIES_FAMILY => {
                Self::ObjectPropertiesFamily(ObjectPropertiesFamily::decode(&mut r)?)
            }
            ids::OBJECT_ANIMATION => Self::ObjectAnimation(ObjectAnimation::decode(&mut r)?),
            ids::OBJECT_PHYSICS_PROPERTIES => {
                Self::ObjectPhysicsProperties(ObjectPhysicsProperties::decode(&mut r)?)
            }
            ids::PAY_PRICE_REPLY => Self::PayPriceReply(PayPriceReply::decode(&mut r)?),
            _ => Self::Unrecognized {
                id,
                body: body.to_vec(),
            },
        })
    }

    pub fn encode_body(&self, w: &mut Writer) {
        match self {
            Self::UseCircuitCode(m) => m.encode(w),
            Self::PacketAck(m) => m.encode(w),
            Self::OpenCircuit(m) => m.encode(w),
            Self::CloseCircuit => {}
            Self::StartPingCheck(m) => m.encode(w),
            Self::CompletePingCheck(m) => m.encode(w),
            Self::RegionHandshake(m) => m.encode(w),
            Self::RegionHandshakeReply(m) => m.encode(w),
            Self::CompleteAgentMovement(m) => m.encode(w),
            Self::AgentMovementComplete(m) => m.encode(w),
            Self::AgentThrottle(m) => m.encode(w),
            Self::AgentUpdate(m) => m.encode(w),
            Self::LogoutRequest(m) => m.encode(w),
            Self::LogoutReply(m) => m.encode(w),
            Self::KickUser(m) => m.encode(w),
            Self::EnableSimulator(m) => m.encode(w),
            Self::DisableSimulator => {}
            Self::SimStats(m) => m.encode(w),
            Self::EconomyDataRequest => {}
            Self::ObjectUpdate(m) => m.encode(w),
            Self::ImprovedTerseObjectUpdate(m) => m.encode(w),
            Self::ObjectUpdateCompressed(m) => m.encode(w),
            Self::ObjectUpdateCached(m) => m.encode(w),
            Self::KillObject(m) => m.encode(w),
            Self::RequestMultipleObjects(m) => m.encode(w),
            Self::ObjectProperties(m) => m.encode(w),
            Self::ObjectPropertiesFamily(m) => m.encode(w),
            Self::ObjectAnimation(m) => m.encode(w),
            Self::ObjectPhysicsProperties(m) => m.encode(w),
            Self::PayPriceReply(m) => m.encode(w),
            Self::Unrecognized { body, .. } => w.put_bytes(body),
        }
    }

    /// Message id bytes and body bytes, ready for framing. Zerocoding is
    /// applied (by the circuit) to the body only.
    pub fn encode_parts(&self) -> (Vec<u8>, Vec<u8>) {
        let mut idw = Writer::new();
        self.id().encode(&mut idw);
        let mut w = Writer::new();
        self.encode_body(&mut w);
        (idw.into_inner(), w.into_inner())
    }
}

/// Decode the body region of a datagram (after the header, with any ACK
/// trailer already stripped): the raw message id, then the payload,
/// expanded first when the packet was zerocoded.
pub fn decode_message(body: &[u8], zerocoded: bool) -> Result<(MessageId, Message), CodecError> {
    let mut r = Reader::new(body);
    let id = MessageId::decode(&mut r)?;
    let rest = r.bytes(r.remaining())?;
    let message = if zerocoded {
        let expanded = zerocode::expand(rest)?;
        Message::decode_body(id, &expanded)?
    } else {
        Message::decode_body(id, rest)?
    };
    Ok((id, message))
}
