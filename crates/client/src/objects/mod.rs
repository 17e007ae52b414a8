//! Object-update decoding: full, terse, compressed, and cached updates
//! flow through here into the per-simulator world store, and kills cascade
//! down link sets. Decoder errors on one block never abort the rest of the
//! packet.

pub mod motion;

use std::sync::Arc;

use glam::Vec3;
use uuid::Uuid;

use sim_proto::codec::text as lossy_text;
use sim_proto::messages::{
    self, cache_miss, ids, pcode, CacheMissRequest, CachedBlock, Message, ObjectUpdate,
    ObjectUpdateBlock, ObjectUpdateCompressed, RequestMultipleObjects, TerseObjectUpdate,
};

use crate::agent::AgentContext;
use crate::events::{ClientEvent, EventBroadcaster};
use crate::pipeline::{IncomingPacket, PacketPipeline};
use crate::settings::Settings;
use crate::world::{
    entity::JointType, nvpair, Avatar, ExtraParams, FloatingText, ObjectFlags, Primitive,
    SimWorld, SoundInfo,
};

use motion::{CompressedObjectData, MotionData, TerseUpdateData};

/// Decodes object-path messages into world state and events. Registered on
/// the pipeline as synchronous handlers; all world mutation happens on the
/// inbound drainer.
pub struct ObjectTracker {
    settings: Arc<Settings>,
    events: EventBroadcaster,
    agent: Arc<AgentContext>,
}

impl ObjectTracker {
    pub(crate) fn new(
        settings: Arc<Settings>,
        events: EventBroadcaster,
        agent: Arc<AgentContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            events,
            agent,
        })
    }

    pub(crate) fn register(self: &Arc<Self>, pipeline: &PacketPipeline) {
        let tracker = self.clone();
        pipeline.register(
            ids::OBJECT_UPDATE,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::ObjectUpdate(update) = pkt.message.as_ref() {
                    pkt.circuit
                        .set_dilation(update.time_dilation as f32 / u16::MAX as f32);
                    pkt.circuit.set_region_handle(update.region_handle);
                    tracker.apply_object_update(pkt.circuit.world(), update);
                }
            }),
        );

        let tracker = self.clone();
        pipeline.register(
            ids::IMPROVED_TERSE_OBJECT_UPDATE,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::ImprovedTerseObjectUpdate(update) = pkt.message.as_ref() {
                    pkt.circuit
                        .set_dilation(update.time_dilation as f32 / u16::MAX as f32);
                    tracker.apply_terse(pkt.circuit.world(), update);
                }
            }),
        );

        let tracker = self.clone();
        pipeline.register(
            ids::OBJECT_UPDATE_COMPRESSED,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::ObjectUpdateCompressed(update) = pkt.message.as_ref() {
                    pkt.circuit
                        .set_dilation(update.time_dilation as f32 / u16::MAX as f32);
                    tracker.apply_compressed(pkt.circuit.world(), update);
                }
            }),
        );

        let tracker = self.clone();
        let outbound = pipeline.clone();
        pipeline.register(
            ids::OBJECT_UPDATE_CACHED,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::ObjectUpdateCached(update) = pkt.message.as_ref() {
                    pkt.circuit
                        .set_dilation(update.time_dilation as f32 / u16::MAX as f32);
                    let misses = select_cache_misses(pkt.circuit.world(), &update.blocks);
                    if !misses.is_empty() {
                        log::debug!("{} cache misses, requesting full updates", misses.len());
                        let request =
                            Message::RequestMultipleObjects(RequestMultipleObjects {
                                agent_id: tracker.agent.agent_id(),
                                session_id: tracker.agent.session_id(),
                                requests: misses,
                            });
                        outbound.queue(pkt.circuit.clone(), request, true);
                    }
                }
            }),
        );

        let tracker = self.clone();
        pipeline.register(
            ids::KILL_OBJECT,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::KillObject(kill) = pkt.message.as_ref() {
                    tracker.apply_kill(pkt.circuit.world(), &kill.local_ids);
                }
            }),
        );

        let tracker = self.clone();
        pipeline.register(
            ids::OBJECT_PROPERTIES,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::ObjectProperties(props) = pkt.message.as_ref() {
                    tracker.apply_properties(pkt.circuit.world(), props);
                }
            }),
        );

        let tracker = self.clone();
        pipeline.register(
            ids::OBJECT_PROPERTIES_FAMILY,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::ObjectPropertiesFamily(props) = pkt.message.as_ref() {
                    tracker.events.emit(ClientEvent::ObjectPropertiesFamily {
                        properties: Arc::new(props.clone()),
                    });
                }
            }),
        );

        let tracker = self.clone();
        pipeline.register(
            ids::OBJECT_ANIMATION,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::ObjectAnimation(anim) = pkt.message.as_ref() {
                    tracker.events.emit(ClientEvent::ObjectAnimation {
                        sender: anim.sender,
                        animations: anim.animations.clone(),
                    });
                }
            }),
        );

        let tracker = self.clone();
        pipeline.register(
            ids::OBJECT_PHYSICS_PROPERTIES,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::ObjectPhysicsProperties(props) = pkt.message.as_ref() {
                    tracker.apply_physics(pkt.circuit.world(), props);
                }
            }),
        );

        let tracker = self.clone();
        pipeline.register(
            ids::PAY_PRICE_REPLY,
            false,
            Arc::new(move |pkt: &IncomingPacket| {
                if let Message::PayPriceReply(reply) = pkt.message.as_ref() {
                    tracker.events.emit(ClientEvent::PayPriceReply {
                        object_id: reply.object_id,
                        default_price: reply.default_price,
                        buttons: reply.buttons.clone(),
                    });
                }
            }),
        );
    }

    fn should_decode(&self) -> bool {
        self.settings.always_decode_objects
            || self.settings.object_tracking
            || self.settings.avatar_tracking
            || self.events.has_subscribers()
    }

    pub(crate) fn apply_object_update(&self, world: &SimWorld, update: &ObjectUpdate) {
        if !self.should_decode() {
            return;
        }
        for block in &update.blocks {
            let flags = ObjectFlags::from_bits_truncate(block.update_flags);
            if flags.contains(ObjectFlags::ZLIB_COMPRESSED) {
                log::warn!(
                    "zlib-compressed object update for {} skipped",
                    block.local_id
                );
                continue;
            }
            let motion = match motion::decode_object_data(&block.object_data) {
                Ok(motion) => motion,
                Err(e) => {
                    log::warn!(
                        "bad object data for {} ({} bytes): {e}",
                        block.local_id,
                        block.object_data.len()
                    );
                    continue;
                }
            };

            self.events.emit(ClientEvent::ObjectDataBlockUpdate {
                local_id: block.local_id,
                full_id: block.full_id,
                position: motion.position,
                rotation: motion.rotation,
            });

            if block.pcode == pcode::AVATAR {
                self.apply_full_avatar(world, update.region_handle, block, &motion);
            } else {
                self.apply_full_prim(world, update.region_handle, block, &motion, flags);
            }
        }
    }

    fn apply_full_prim(
        &self,
        world: &SimWorld,
        region_handle: u64,
        block: &ObjectUpdateBlock,
        motion: &MotionData,
        flags: ObjectFlags,
    ) {
        let name_values = nvpair::parse(&lossy_text(&block.name_value));
        let joint = JointType::from_wire(block.joint_type);
        let fill = |prim: &mut Primitive| {
            prim.id = block.full_id;
            prim.parent_id = block.parent_id;
            prim.region_handle = region_handle;
            prim.owner_id = block.owner_id;
            prim.state = block.state;
            prim.pcode = block.pcode;
            prim.material = block.material;
            prim.click_action = block.click_action;
            prim.crc = block.crc;
            prim.position = motion.position;
            prim.velocity = motion.velocity;
            prim.acceleration = motion.acceleration;
            prim.rotation = motion.rotation;
            prim.angular_velocity = motion.angular_velocity;
            prim.scale = block.scale;
            prim.flags = flags;
            prim.shape = (&block.path).into();
            prim.joint = joint;
            prim.texture_entry = block.texture_entry.clone();
            prim.texture_anim = block.texture_anim.clone();
            prim.extra_params = ExtraParams::from_bytes(&block.extra_params);
            prim.name_values = name_values.clone();
            prim.text = floating_text(&block.text, block.text_color);
            prim.media_url = optional_text(&block.media_url);
            prim.particles = if block.ps_block.is_empty() {
                None
            } else {
                Some(block.ps_block.clone())
            };
            prim.sound = sound_info(block.sound_id, block.gain, block.sound_flags, block.radius);
        };

        let (prim, new) = if self.settings.object_tracking {
            world.update_prim(block.local_id, fill)
        } else {
            let mut prim = Primitive::new(block.local_id);
            fill(&mut prim);
            (Arc::new(prim), true)
        };

        if prim.particles.is_some() {
            self.events.emit(ClientEvent::ParticleUpdate {
                local_id: prim.local_id,
                particles: block.ps_block.clone(),
            });
        }
        let attachment = prim.is_attachment();
        self.events.emit(ClientEvent::ObjectUpdate {
            prim,
            new,
            attachment,
        });
    }

    fn apply_full_avatar(
        &self,
        world: &SimWorld,
        region_handle: u64,
        block: &ObjectUpdateBlock,
        motion: &MotionData,
    ) {
        let name_values = nvpair::parse(&lossy_text(&block.name_value));
        let old_seat = world
            .avatar(block.local_id)
            .map(|a| a.parent_id)
            .unwrap_or(0);

        let fill = |avatar: &mut Avatar| {
            avatar.id = block.full_id;
            avatar.parent_id = block.parent_id;
            avatar.region_handle = region_handle;
            avatar.state = block.state;
            avatar.position = motion.position;
            avatar.velocity = motion.velocity;
            avatar.acceleration = motion.acceleration;
            avatar.rotation = motion.rotation;
            avatar.angular_velocity = motion.angular_velocity;
            avatar.scale = block.scale;
            if let Some(plane) = motion.collision_plane {
                avatar.collision_plane = plane;
            }
            avatar.texture_entry = block.texture_entry.clone();
            avatar.apply_name_values(name_values.clone());
        };

        let (avatar, new) = if self.settings.avatar_tracking {
            world.update_avatar(block.local_id, fill)
        } else {
            let mut avatar = Avatar::new(block.local_id);
            fill(&mut avatar);
            (Arc::new(avatar), true)
        };

        if avatar.id == self.agent.agent_id() {
            self.agent.update(|state| {
                state.local_id = block.local_id;
                state.position = motion.position;
                state.velocity = motion.velocity;
                state.rotation = motion.rotation;
                if let Some(plane) = motion.collision_plane {
                    state.collision_plane = plane;
                }
                state.sitting_on = block.parent_id;
            });
        }

        if old_seat != avatar.parent_id {
            self.events.emit(ClientEvent::AvatarSitChanged {
                avatar_id: avatar.id,
                sitting_on: avatar.parent_id,
                old_seat,
            });
        }
        self.events.emit(ClientEvent::AvatarUpdate { avatar, new });
    }

    pub(crate) fn apply_terse(&self, world: &SimWorld, update: &TerseObjectUpdate) {
        if !self.should_decode() {
            return;
        }
        for block in &update.blocks {
            let terse = match motion::decode_terse(&block.data) {
                Ok(terse) => terse,
                Err(e) => {
                    log::warn!("bad terse block: {e}");
                    continue;
                }
            };
            self.apply_terse_entity(world, &terse, &block.texture_entry);
        }
    }

    fn apply_terse_entity(&self, world: &SimWorld, terse: &TerseUpdateData, te: &[u8]) {
        let motion = &terse.motion;
        if terse.avatar {
            if self.settings.avatar_tracking {
                world.update_avatar(terse.local_id, |avatar| {
                    avatar.state = terse.state;
                    avatar.position = motion.position;
                    avatar.velocity = motion.velocity;
                    avatar.acceleration = motion.acceleration;
                    avatar.rotation = motion.rotation;
                    avatar.angular_velocity = motion.angular_velocity;
                    if let Some(plane) = motion.collision_plane {
                        avatar.collision_plane = plane;
                    }
                    if !te.is_empty() {
                        avatar.texture_entry = te.to_vec();
                    }
                });
            }
        } else if self.settings.object_tracking {
            world.update_prim(terse.local_id, |prim| {
                prim.state = terse.state;
                prim.position = motion.position;
                prim.velocity = motion.velocity;
                prim.acceleration = motion.acceleration;
                prim.rotation = motion.rotation;
                prim.angular_velocity = motion.angular_velocity;
                if !te.is_empty() {
                    prim.texture_entry = te.to_vec();
                }
            });
        }

        if self.agent.state().local_id == terse.local_id && terse.avatar {
            self.agent.update(|state| {
                state.position = motion.position;
                state.velocity = motion.velocity;
                state.rotation = motion.rotation;
                if let Some(plane) = motion.collision_plane {
                    state.collision_plane = plane;
                }
            });
        }

        self.events.emit(ClientEvent::TerseObjectUpdate {
            local_id: terse.local_id,
            avatar: terse.avatar,
            position: motion.position,
            rotation: motion.rotation,
        });
    }

    pub(crate) fn apply_compressed(&self, world: &SimWorld, update: &ObjectUpdateCompressed) {
        if !self.should_decode() {
            return;
        }
        for block in &update.blocks {
            let flags = ObjectFlags::from_bits_truncate(block.update_flags);
            if flags.contains(ObjectFlags::ZLIB_COMPRESSED) {
                log::warn!("zlib-compressed stream in compressed update skipped");
                continue;
            }
            let data = match motion::decode_compressed(&block.data) {
                Ok(data) => data,
                Err(e) => {
                    log::warn!("bad compressed block: {e}");
                    continue;
                }
            };
            self.apply_compressed_entity(world, update.region_handle, &data, flags);
        }
    }

    fn apply_compressed_entity(
        &self,
        world: &SimWorld,
        region_handle: u64,
        data: &CompressedObjectData,
        flags: ObjectFlags,
    ) {
        let name_values = data
            .name_values
            .as_deref()
            .map(nvpair::parse)
            .unwrap_or_default();
        let fill = |prim: &mut Primitive| {
            prim.id = data.full_id;
            prim.parent_id = data.parent_id.unwrap_or(0);
            prim.region_handle = region_handle;
            prim.owner_id = data.owner_id;
            prim.state = data.state;
            prim.pcode = data.pcode;
            prim.material = data.material;
            prim.click_action = data.click_action;
            prim.crc = data.crc;
            prim.position = data.position;
            prim.rotation = data.rotation;
            prim.angular_velocity = data.angular_velocity.unwrap_or(Vec3::ZERO);
            prim.scale = data.scale;
            prim.flags = flags;
            prim.shape = (&data.path).into();
            prim.texture_entry = data.texture_entry.clone();
            if let Some(anim) = &data.texture_anim {
                prim.texture_anim = anim.clone();
            }
            prim.extra_params = ExtraParams::from_bytes(&data.extra_params);
            prim.name_values = name_values.clone();
            prim.tree_species = data.tree_species;
            prim.text = data
                .text
                .as_ref()
                .map(|(body, color)| FloatingText {
                    text: body.clone(),
                    color: *color,
                });
            prim.media_url = data.media_url.clone();
            prim.particles = data.particles.clone();
            prim.sound = data.sound.as_ref().and_then(|s| {
                sound_info(s.sound_id, s.gain, s.flags, s.radius)
            });
        };

        let (prim, new) = if self.settings.object_tracking {
            world.update_prim(data.local_id, fill)
        } else {
            let mut prim = Primitive::new(data.local_id);
            fill(&mut prim);
            (Arc::new(prim), true)
        };

        if let Some(particles) = &data.particles {
            self.events.emit(ClientEvent::ParticleUpdate {
                local_id: data.local_id,
                particles: particles.clone(),
            });
        }
        let attachment = data.name_values.is_some() && prim.parent_id != 0;
        self.events.emit(ClientEvent::ObjectUpdate {
            prim,
            new,
            attachment,
        });
    }

    /// Remove entities, cascading through link sets: children of a killed
    /// primitive die with it, and an avatar kill takes two levels below any
    /// seated or attached object.
    pub(crate) fn apply_kill(&self, world: &SimWorld, local_ids: &[u32]) -> Vec<u32> {
        let mut killed = Vec::new();
        if !self.settings.object_tracking && !self.settings.avatar_tracking {
            killed.extend_from_slice(local_ids);
        } else {
            for &local_id in local_ids {
                self.kill_entity(world, local_id, &mut killed);
            }
        }
        for &local_id in &killed {
            self.events.emit(ClientEvent::KillObject { local_id });
        }
        self.events.emit(ClientEvent::KillObjects {
            local_ids: killed.clone(),
        });
        killed
    }

    fn kill_entity(&self, world: &SimWorld, local_id: u32, killed: &mut Vec<u32>) {
        if killed.contains(&local_id) {
            return;
        }
        if world.remove_avatar(local_id).is_some() {
            killed.push(local_id);
            for seat in world.prim_children_of(local_id) {
                if world.remove_prim(seat).is_some() {
                    killed.push(seat);
                    for child in world.prim_children_of(seat) {
                        if world.remove_prim(child).is_some() {
                            killed.push(child);
                        }
                    }
                }
            }
        } else if world.remove_prim(local_id).is_some() {
            killed.push(local_id);
            for child in world.prim_children_of(local_id) {
                self.kill_entity(world, child, killed);
            }
        } else {
            // unknown entity: still signal, nothing to cascade through
            killed.push(local_id);
        }
    }

    fn apply_properties(&self, world: &SimWorld, props: &messages::ObjectProperties) {
        for block in &props.blocks {
            if self.settings.object_tracking {
                if let Some(prim) = world.prim_by_uuid(block.object_id) {
                    world.update_prim(prim.local_id, |p| {
                        p.properties = Some(block.clone());
                    });
                }
            }
            self.events.emit(ClientEvent::ObjectProperties {
                properties: Arc::new(block.clone()),
            });
        }
    }

    fn apply_physics(&self, world: &SimWorld, props: &messages::ObjectPhysicsProperties) {
        for block in &props.blocks {
            if self.settings.object_tracking && world.prim(block.local_id).is_some() {
                world.update_prim(block.local_id, |p| {
                    p.physics = Some(*block);
                });
            }
            self.events
                .emit(ClientEvent::PhysicsProperties { block: *block });
        }
    }
}

/// Pick the cached-update entries whose CRC does not match a tracked
/// primitive; those need a fresh full update.
pub(crate) fn select_cache_misses(
    world: &SimWorld,
    blocks: &[CachedBlock],
) -> Vec<CacheMissRequest> {
    blocks
        .iter()
        .filter(|b| world.prim(b.local_id).is_none_or(|p| p.crc != b.crc))
        .map(|b| CacheMissRequest {
            miss_type: cache_miss::FULL,
            local_id: b.local_id,
        })
        .collect()
}

fn floating_text(raw: &[u8], color: [u8; 4]) -> Option<FloatingText> {
    let body = lossy_text(raw);
    if body.is_empty() {
        None
    } else {
        Some(FloatingText { text: body, color })
    }
}

fn optional_text(raw: &[u8]) -> Option<String> {
    let body = lossy_text(raw);
    if body.is_empty() { None } else { Some(body) }
}

fn sound_info(sound_id: Uuid, gain: f32, flags: u8, radius: f32) -> Option<SoundInfo> {
    if sound_id.is_nil() {
        None
    } else {
        Some(SoundInfo {
            sound_id,
            gain,
            flags,
            radius,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec4};
    use sim_proto::codec::Writer;
    use tokio::sync::mpsc::error::TryRecvError;

    fn tracker_with_events() -> (
        Arc<ObjectTracker>,
        tokio::sync::mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let events = EventBroadcaster::new();
        let rx = events.subscribe();
        let tracker = ObjectTracker::new(
            Arc::new(Settings::default()),
            events,
            Arc::new(AgentContext::new()),
        );
        (tracker, rx)
    }

    fn packed_prim_data(position: Vec3) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_vec3(position);
        w.put_vec3(Vec3::ZERO);
        w.put_vec3(Vec3::ZERO);
        w.put_quat_norm3(Quat::IDENTITY);
        w.put_vec3(Vec3::ZERO);
        w.into_inner()
    }

    fn full_update(blocks: Vec<ObjectUpdateBlock>) -> ObjectUpdate {
        ObjectUpdate {
            region_handle: 7,
            time_dilation: u16::MAX,
            blocks,
        }
    }

    #[test]
    fn sixty_byte_block_becomes_a_prim() {
        let (tracker, mut rx) = tracker_with_events();
        let world = SimWorld::new();

        let block = ObjectUpdateBlock {
            local_id: 100,
            full_id: Uuid::new_v4(),
            object_data: packed_prim_data(Vec3::new(1.0, 2.0, 3.0)),
            ..Default::default()
        };
        tracker.apply_object_update(&world, &full_update(vec![block]));

        let prim = world.prim(100).unwrap();
        assert_eq!(prim.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(prim.velocity, Vec3::ZERO);
        assert_eq!(world.avatar_count(), 0);

        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientEvent::ObjectDataBlockUpdate { local_id: 100, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientEvent::ObjectUpdate { new: true, .. }
        ));
    }

    #[test]
    fn seventy_six_byte_block_becomes_an_avatar() {
        let (tracker, _rx) = tracker_with_events();
        let world = SimWorld::new();

        let mut w = Writer::new();
        let plane = Vec4::new(0.0, 0.0, 1.0, 23.0);
        w.put_vec4(plane);
        w.put_bytes(&packed_prim_data(Vec3::new(4.0, 5.0, 6.0)));
        let block = ObjectUpdateBlock {
            local_id: 200,
            full_id: Uuid::new_v4(),
            pcode: pcode::AVATAR,
            object_data: w.into_inner(),
            ..Default::default()
        };
        tracker.apply_object_update(&world, &full_update(vec![block]));

        let avatar = world.avatar(200).unwrap();
        assert_eq!(avatar.collision_plane, plane);
        assert_eq!(avatar.position, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(world.prim_count(), 0);
    }

    #[test]
    fn second_update_is_not_new() {
        let (tracker, mut rx) = tracker_with_events();
        let world = SimWorld::new();
        let full_id = Uuid::new_v4();

        let block = ObjectUpdateBlock {
            local_id: 100,
            full_id,
            object_data: packed_prim_data(Vec3::ONE),
            ..Default::default()
        };
        tracker.apply_object_update(&world, &full_update(vec![block.clone()]));
        tracker.apply_object_update(&world, &full_update(vec![block]));

        let mut news = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ClientEvent::ObjectUpdate { new, .. } = event {
                news.push(new);
            }
        }
        assert_eq!(news, vec![true, false]);
    }

    #[test]
    fn bad_object_data_length_skips_block_only() {
        let (tracker, _rx) = tracker_with_events();
        let world = SimWorld::new();

        let bad = ObjectUpdateBlock {
            local_id: 1,
            object_data: vec![0u8; 33],
            ..Default::default()
        };
        let good = ObjectUpdateBlock {
            local_id: 2,
            full_id: Uuid::new_v4(),
            object_data: packed_prim_data(Vec3::ONE),
            ..Default::default()
        };
        tracker.apply_object_update(&world, &full_update(vec![bad, good]));

        assert!(world.prim(1).is_none());
        assert!(world.prim(2).is_some());
    }

    #[test]
    fn kill_cascades_root_first() {
        let (tracker, mut rx) = tracker_with_events();
        let world = SimWorld::new();
        world.update_prim(100, |_| {});
        world.update_prim(200, |p| p.parent_id = 100);
        world.update_prim(300, |p| p.parent_id = 200);

        let killed = tracker.apply_kill(&world, &[100]);
        assert_eq!(killed, vec![100, 200, 300]);
        assert_eq!(world.prim_count(), 0);

        let mut order = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                ClientEvent::KillObject { local_id } => order.push(local_id),
                ClientEvent::KillObjects { local_ids } => {
                    assert_eq!(local_ids, vec![100, 200, 300]);
                }
                _ => {}
            }
        }
        assert_eq!(order, vec![100, 200, 300]);
    }

    #[test]
    fn avatar_kill_takes_two_levels() {
        let (tracker, _rx) = tracker_with_events();
        let world = SimWorld::new();
        world.update_avatar(500, |a| a.id = Uuid::new_v4());
        world.update_prim(600, |p| p.parent_id = 500); // seat
        world.update_prim(700, |p| p.parent_id = 600); // seat child
        world.update_prim(800, |p| p.parent_id = 700); // below the cascade

        let killed = tracker.apply_kill(&world, &[500]);
        assert_eq!(killed, vec![500, 600, 700]);
        assert!(world.prim(800).is_some());
    }

    #[test]
    fn cache_miss_selection() {
        let world = SimWorld::new();
        world.update_prim(10, |p| p.crc = 0xAAAA);

        let blocks = [
            CachedBlock {
                local_id: 10,
                crc: 0xAAAA,
                update_flags: 0,
            },
            CachedBlock {
                local_id: 10,
                crc: 0xBBBB,
                update_flags: 0,
            },
            CachedBlock {
                local_id: 20,
                crc: 0xCCCC,
                update_flags: 0,
            },
        ];
        let misses = select_cache_misses(&world, &blocks);
        let ids: Vec<u32> = misses.iter().map(|m| m.local_id).collect();
        assert_eq!(ids, vec![10, 20]);
        assert!(misses.iter().all(|m| m.miss_type == cache_miss::FULL));
    }

    #[test]
    fn tracking_disabled_always_reports_new() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let tracker = ObjectTracker::new(
            Arc::new(Settings {
                object_tracking: false,
                ..Settings::default()
            }),
            events,
            Arc::new(AgentContext::new()),
        );
        let world = SimWorld::new();

        let block = ObjectUpdateBlock {
            local_id: 42,
            full_id: Uuid::new_v4(),
            object_data: packed_prim_data(Vec3::ONE),
            ..Default::default()
        };
        tracker.apply_object_update(&world, &full_update(vec![block.clone()]));
        tracker.apply_object_update(&world, &full_update(vec![block]));

        assert_eq!(world.prim_count(), 0);
        let mut news = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ClientEvent::ObjectUpdate { new, .. }) => news.push(new),
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        assert_eq!(news, vec![true, true]);
    }

    #[test]
    fn terse_update_moves_tracked_prim() {
        let (tracker, _rx) = tracker_with_events();
        let world = SimWorld::new();
        world.update_prim(77, |p| p.position = Vec3::ZERO);

        let mut w = Writer::new();
        w.put_u32_le(77);
        w.put_u8(0);
        w.put_bool(false);
        w.put_vec3(Vec3::new(12.0, 13.0, 14.0));
        for _ in 0..6 {
            w.put_u16_le(sim_proto::quant::float_to_u16(0.0, -256.0, 256.0));
        }
        for v in [0.0, 0.0, 0.0, 1.0] {
            w.put_u16_le(sim_proto::quant::float_to_u16(v, -1.0, 1.0));
        }
        for _ in 0..3 {
            w.put_u16_le(sim_proto::quant::float_to_u16(0.0, -256.0, 256.0));
        }

        let update = TerseObjectUpdate {
            region_handle: 7,
            time_dilation: u16::MAX,
            blocks: vec![sim_proto::messages::TerseBlock {
                data: w.into_inner(),
                texture_entry: Vec::new(),
            }],
        };
        tracker.apply_terse(&world, &update);

        let prim = world.prim(77).unwrap();
        assert_eq!(prim.position, Vec3::new(12.0, 13.0, 14.0));
    }

    #[test]
    fn avatar_sit_change_is_signaled() {
        let (tracker, mut rx) = tracker_with_events();
        let world = SimWorld::new();
        let avatar_id = Uuid::new_v4();

        let mut w = Writer::new();
        w.put_vec4(Vec4::new(0.0, 0.0, 1.0, 20.0));
        w.put_bytes(&packed_prim_data(Vec3::ONE));
        let seated = ObjectUpdateBlock {
            local_id: 300,
            full_id: avatar_id,
            pcode: pcode::AVATAR,
            parent_id: 900,
            object_data: w.into_inner(),
            ..Default::default()
        };
        tracker.apply_object_update(&world, &full_update(vec![seated]));

        let mut sat = None;
        while let Ok(event) = rx.try_recv() {
            if let ClientEvent::AvatarSitChanged {
                avatar_id: id,
                sitting_on,
                old_seat,
            } = event
            {
                sat = Some((id, sitting_on, old_seat));
            }
        }
        assert_eq!(sat, Some((avatar_id, 900, 0)));
    }
}
