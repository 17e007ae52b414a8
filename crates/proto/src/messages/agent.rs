//! Session and region messages: handshake, movement, throttle, logout,
//! server-side disconnects, simulator statistics.

use std::net::Ipv4Addr;

use glam::{Quat, Vec3};
use uuid::Uuid;

use crate::codec::{text, CodecError, Reader, Writer};

/// Region description sent by the simulator once the circuit is up.
/// Newer servers append informational blocks; anything past the region id
/// is tolerated and ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionHandshake {
    pub region_flags: u32,
    pub sim_access: u8,
    pub sim_name: String,
    pub sim_owner: Uuid,
    pub is_estate_manager: bool,
    pub water_height: f32,
    pub billable_factor: f32,
    pub cache_id: Uuid,
    pub terrain_base: [Uuid; 4],
    pub terrain_detail: [Uuid; 4],
    pub terrain_start_height: [f32; 4],
    pub terrain_height_range: [f32; 4],
    pub region_id: Uuid,
}

impl RegionHandshake {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let region_flags = r.u32_le()?;
        let sim_access = r.u8()?;
        let sim_name = text(r.var1()?);
        let sim_owner = r.uuid()?;
        let is_estate_manager = r.bool()?;
        let water_height = r.f32_le()?;
        let billable_factor = r.f32_le()?;
        let cache_id = r.uuid()?;
        let mut terrain_base = [Uuid::nil(); 4];
        for slot in &mut terrain_base {
            *slot = r.uuid()?;
        }
        let mut terrain_detail = [Uuid::nil(); 4];
        for slot in &mut terrain_detail {
            *slot = r.uuid()?;
        }
        let mut terrain_start_height = [0.0f32; 4];
        for slot in &mut terrain_start_height {
            *slot = r.f32_le()?;
        }
        let mut terrain_height_range = [0.0f32; 4];
        for slot in &mut terrain_height_range {
            *slot = r.f32_le()?;
        }
        let region_id = r.uuid()?;
        Ok(Self {
            region_flags,
            sim_access,
            sim_name,
            sim_owner,
            is_estate_manager,
            water_height,
            billable_factor,
            cache_id,
            terrain_base,
            terrain_detail,
            terrain_start_height,
            terrain_height_range,
            region_id,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u32_le(self.region_flags);
        w.put_u8(self.sim_access);
        w.put_var1(self.sim_name.as_bytes());
        w.put_uuid(self.sim_owner);
        w.put_bool(self.is_estate_manager);
        w.put_f32_le(self.water_height);
        w.put_f32_le(self.billable_factor);
        w.put_uuid(self.cache_id);
        for id in self.terrain_base {
            w.put_uuid(id);
        }
        for id in self.terrain_detail {
            w.put_uuid(id);
        }
        for v in self.terrain_start_height {
            w.put_f32_le(v);
        }
        for v in self.terrain_height_range {
            w.put_f32_le(v);
        }
        w.put_uuid(self.region_id);
    }
}

impl Default for RegionHandshake {
    fn default() -> Self {
        Self {
            region_flags: 0,
            sim_access: 0,
            sim_name: String::new(),
            sim_owner: Uuid::nil(),
            is_estate_manager: false,
            water_height: 20.0,
            billable_factor: 0.0,
            cache_id: Uuid::nil(),
            terrain_base: [Uuid::nil(); 4],
            terrain_detail: [Uuid::nil(); 4],
            terrain_start_height: [0.0; 4],
            terrain_height_range: [0.0; 4],
            region_id: Uuid::nil(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHandshakeReply {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub flags: u32,
}

impl RegionHandshakeReply {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            agent_id: r.uuid()?,
            session_id: r.uuid()?,
            flags: r.u32_le()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_u32_le(self.flags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompleteAgentMovement {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub circuit_code: u32,
}

impl CompleteAgentMovement {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            agent_id: r.uuid()?,
            session_id: r.uuid()?,
            circuit_code: r.u32_le()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_u32_le(self.circuit_code);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentMovementComplete {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub position: Vec3,
    pub look_at: Vec3,
    pub region_handle: u64,
    pub timestamp: u32,
    pub channel_version: String,
}

impl AgentMovementComplete {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            agent_id: r.uuid()?,
            session_id: r.uuid()?,
            position: r.vec3()?,
            look_at: r.vec3()?,
            region_handle: r.u64_le()?,
            timestamp: r.u32_le()?,
            channel_version: text(r.var2()?),
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_vec3(self.position);
        w.put_vec3(self.look_at);
        w.put_u64_le(self.region_handle);
        w.put_u32_le(self.timestamp);
        w.put_var2(self.channel_version.as_bytes());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentThrottle {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub circuit_code: u32,
    pub gen_counter: u32,
    /// Encoded throttle block, 28 bytes of seven little-endian floats.
    pub throttles: Vec<u8>,
}

impl AgentThrottle {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            agent_id: r.uuid()?,
            session_id: r.uuid()?,
            circuit_code: r.u32_le()?,
            gen_counter: r.u32_le()?,
            throttles: r.var1()?.to_vec(),
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_u32_le(self.circuit_code);
        w.put_u32_le(self.gen_counter);
        w.put_var1(&self.throttles);
    }
}

/// High-frequency camera and control state; the presence heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentUpdate {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub body_rotation: Quat,
    pub head_rotation: Quat,
    pub state: u8,
    pub camera_center: Vec3,
    pub camera_at_axis: Vec3,
    pub camera_left_axis: Vec3,
    pub camera_up_axis: Vec3,
    pub far: f32,
    pub control_flags: u32,
    pub flags: u8,
}

impl AgentUpdate {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            agent_id: r.uuid()?,
            session_id: r.uuid()?,
            body_rotation: r.quat_norm3()?,
            head_rotation: r.quat_norm3()?,
            state: r.u8()?,
            camera_center: r.vec3()?,
            camera_at_axis: r.vec3()?,
            camera_left_axis: r.vec3()?,
            camera_up_axis: r.vec3()?,
            far: r.f32_le()?,
            control_flags: r.u32_le()?,
            flags: r.u8()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_quat_norm3(self.body_rotation);
        w.put_quat_norm3(self.head_rotation);
        w.put_u8(self.state);
        w.put_vec3(self.camera_center);
        w.put_vec3(self.camera_at_axis);
        w.put_vec3(self.camera_left_axis);
        w.put_vec3(self.camera_up_axis);
        w.put_f32_le(self.far);
        w.put_u32_le(self.control_flags);
        w.put_u8(self.flags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutRequest {
    pub agent_id: Uuid,
    pub session_id: Uuid,
}

impl LogoutRequest {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            agent_id: r.uuid()?,
            session_id: r.uuid()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutReply {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub item_ids: Vec<Uuid>,
}

impl LogoutReply {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let agent_id = r.uuid()?;
        let session_id = r.uuid()?;
        let count = r.block_count(16)?;
        let mut item_ids = Vec::with_capacity(count);
        for _ in 0..count {
            item_ids.push(r.uuid()?);
        }
        Ok(Self {
            agent_id,
            session_id,
            item_ids,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_u8(self.item_ids.len() as u8);
        for id in &self.item_ids {
            w.put_uuid(*id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KickUser {
    pub target_ip: Ipv4Addr,
    pub target_port: u16,
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub reason: String,
}

impl KickUser {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let ip = r.bytes(4)?;
        let target_ip = Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
        Ok(Self {
            target_ip,
            target_port: r.u16_be()?,
            agent_id: r.uuid()?,
            session_id: r.uuid()?,
            reason: text(r.var2()?),
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_bytes(&self.target_ip.octets());
        w.put_u16_be(self.target_port);
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_var2(self.reason.as_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnableSimulator {
    pub handle: u64,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl EnableSimulator {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let handle = r.u64_le()?;
        let ip = r.bytes(4)?;
        Ok(Self {
            handle,
            ip: Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]),
            port: r.u16_be()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u64_le(self.handle);
        w.put_bytes(&self.ip.octets());
        w.put_u16_be(self.port);
    }
}

pub mod stat_id {
    pub const TIME_DILATION: u32 = 0;
    pub const SIM_FPS: u32 = 1;
    pub const PHYSICS_FPS: u32 = 2;
    pub const TOTAL_PRIMS: u32 = 11;
    pub const ACTIVE_PRIMS: u32 = 12;
    pub const NUM_AGENTS: u32 = 13;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimStat {
    pub id: u32,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimStats {
    pub region_x: u32,
    pub region_y: u32,
    pub region_flags: u32,
    pub object_capacity: u32,
    pub stats: Vec<SimStat>,
}

impl SimStats {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let region_x = r.u32_le()?;
        let region_y = r.u32_le()?;
        let region_flags = r.u32_le()?;
        let object_capacity = r.u32_le()?;
        let count = r.block_count(8)?;
        let mut stats = Vec::with_capacity(count);
        for _ in 0..count {
            stats.push(SimStat {
                id: r.u32_le()?,
                value: r.f32_le()?,
            });
        }
        // trailing pid/info blocks from newer servers are ignored
        Ok(Self {
            region_x,
            region_y,
            region_flags,
            object_capacity,
            stats,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u32_le(self.region_x);
        w.put_u32_le(self.region_y);
        w.put_u32_le(self.region_flags);
        w.put_u32_le(self.object_capacity);
        w.put_u8(self.stats.len() as u8);
        for stat in &self.stats {
            w.put_u32_le(stat.id);
            w.put_f32_le(stat.value);
        }
    }

    pub fn get(&self, id: u32) -> Option<f32> {
        self.stats.iter().find(|s| s.id == id).map(|s| s.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_handshake_round_trip() {
        let msg = RegionHandshake {
            region_flags: 0x01,
            sim_access: 13,
            sim_name: "Test Region".to_owned(),
            sim_owner: Uuid::new_v4(),
            water_height: 20.0,
            region_id: Uuid::new_v4(),
            ..Default::default()
        };
        let mut w = Writer::new();
        msg.encode(&mut w);
        let buf = w.into_inner();
        assert_eq!(RegionHandshake::decode(&mut Reader::new(&buf)).unwrap(), msg);
    }

    #[test]
    fn handshake_tolerates_trailing_blocks() {
        let mut w = Writer::new();
        RegionHandshake::default().encode(&mut w);
        w.put_bytes(&[1, 2, 3, 4]); // newer-server extras
        let buf = w.into_inner();
        assert!(RegionHandshake::decode(&mut Reader::new(&buf)).is_ok());
    }

    #[test]
    fn movement_complete_round_trip() {
        let msg = AgentMovementComplete {
            agent_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            position: Vec3::new(128.0, 128.0, 25.5),
            look_at: Vec3::X,
            region_handle: 0x0003_E800_0003_E400,
            timestamp: 1_700_000_000,
            channel_version: "OpenSim 0.9".to_owned(),
        };
        let mut w = Writer::new();
        msg.encode(&mut w);
        let buf = w.into_inner();
        assert_eq!(
            AgentMovementComplete::decode(&mut Reader::new(&buf)).unwrap(),
            msg
        );
    }

    #[test]
    fn sim_stats_lookup() {
        let msg = SimStats {
            region_x: 1000,
            region_y: 996,
            region_flags: 0,
            object_capacity: 15000,
            stats: vec![
                SimStat {
                    id: stat_id::TIME_DILATION,
                    value: 0.94,
                },
                SimStat {
                    id: stat_id::SIM_FPS,
                    value: 44.9,
                },
            ],
        };
        let mut w = Writer::new();
        msg.encode(&mut w);
        let buf = w.into_inner();
        let back = SimStats::decode(&mut Reader::new(&buf)).unwrap();
        assert_eq!(back.get(stat_id::TIME_DILATION), Some(0.94));
        assert_eq!(back.get(99), None);
    }

    #[test]
    fn enable_simulator_addressing() {
        let msg = EnableSimulator {
            handle: (42u64 << 32) | 7,
            ip: Ipv4Addr::new(10, 0, 0, 9),
            port: 13005,
        };
        let mut w = Writer::new();
        msg.encode(&mut w);
        let buf = w.into_inner();
        assert_eq!(buf.len(), 14);
        assert_eq!(EnableSimulator::decode(&mut Reader::new(&buf)).unwrap(), msg);
    }
}
