//! Object-path messages: full, terse, compressed, and cached updates,
//! kills, properties, animation, and physics blocks.
//!
//! These structs stay close to the wire: packed kinematic byte strings and
//! texture-entry blobs are carried opaque, and the update decoder turns
//! them into world state.

use glam::Vec3;
use uuid::Uuid;

use crate::codec::{text, CodecError, Reader, Writer};

/// Packed path/profile shape parameters, in wire form. Unpacking to floats
/// uses the quanta in [`crate::quant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathParams {
    pub path_curve: u8,
    pub profile_curve: u8,
    pub path_begin: u16,
    pub path_end: u16,
    pub path_scale_x: u8,
    pub path_scale_y: u8,
    pub path_shear_x: u8,
    pub path_shear_y: u8,
    pub path_twist: i8,
    pub path_twist_begin: i8,
    pub path_radius_offset: i8,
    pub path_taper_x: i8,
    pub path_taper_y: i8,
    pub path_revolutions: u8,
    pub path_skew: i8,
    pub profile_begin: u16,
    pub profile_end: u16,
    pub profile_hollow: u16,
}

impl PathParams {
    /// Layout used by full object updates: profile curve travels right
    /// after path curve.
    pub fn decode_full(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            path_curve: r.u8()?,
            profile_curve: r.u8()?,
            path_begin: r.u16_le()?,
            path_end: r.u16_le()?,
            path_scale_x: r.u8()?,
            path_scale_y: r.u8()?,
            path_shear_x: r.u8()?,
            path_shear_y: r.u8()?,
            path_twist: r.i8()?,
            path_twist_begin: r.i8()?,
            path_radius_offset: r.i8()?,
            path_taper_x: r.i8()?,
            path_taper_y: r.i8()?,
            path_revolutions: r.u8()?,
            path_skew: r.i8()?,
            profile_begin: r.u16_le()?,
            profile_end: r.u16_le()?,
            profile_hollow: r.u16_le()?,
        })
    }

    pub fn encode_full(&self, w: &mut Writer) {
        w.put_u8(self.path_curve);
        w.put_u8(self.profile_curve);
        w.put_u16_le(self.path_begin);
        w.put_u16_le(self.path_end);
        w.put_u8(self.path_scale_x);
        w.put_u8(self.path_scale_y);
        w.put_u8(self.path_shear_x);
        w.put_u8(self.path_shear_y);
        w.put_i8(self.path_twist);
        w.put_i8(self.path_twist_begin);
        w.put_i8(self.path_radius_offset);
        w.put_i8(self.path_taper_x);
        w.put_i8(self.path_taper_y);
        w.put_u8(self.path_revolutions);
        w.put_i8(self.path_skew);
        w.put_u16_le(self.profile_begin);
        w.put_u16_le(self.profile_end);
        w.put_u16_le(self.profile_hollow);
    }

    /// Layout used inside compressed updates: the profile group trails the
    /// path group.
    pub fn decode_compressed(r: &mut Reader) -> Result<Self, CodecError> {
        let path_curve = r.u8()?;
        let path_begin = r.u16_le()?;
        let path_end = r.u16_le()?;
        let path_scale_x = r.u8()?;
        let path_scale_y = r.u8()?;
        let path_shear_x = r.u8()?;
        let path_shear_y = r.u8()?;
        let path_twist = r.i8()?;
        let path_twist_begin = r.i8()?;
        let path_radius_offset = r.i8()?;
        let path_taper_x = r.i8()?;
        let path_taper_y = r.i8()?;
        let path_revolutions = r.u8()?;
        let path_skew = r.i8()?;
        let profile_curve = r.u8()?;
        let profile_begin = r.u16_le()?;
        let profile_end = r.u16_le()?;
        let profile_hollow = r.u16_le()?;
        Ok(Self {
            path_curve,
            profile_curve,
            path_begin,
            path_end,
            path_scale_x,
            path_scale_y,
            path_shear_x,
            path_shear_y,
            path_twist,
            path_twist_begin,
            path_radius_offset,
            path_taper_x,
            path_taper_y,
            path_revolutions,
            path_skew,
            profile_begin,
            profile_end,
            profile_hollow,
        })
    }

    pub fn encode_compressed(&self, w: &mut Writer) {
        w.put_u8(self.path_curve);
        w.put_u16_le(self.path_begin);
        w.put_u16_le(self.path_end);
        w.put_u8(self.path_scale_x);
        w.put_u8(self.path_scale_y);
        w.put_u8(self.path_shear_x);
        w.put_u8(self.path_shear_y);
        w.put_i8(self.path_twist);
        w.put_i8(self.path_twist_begin);
        w.put_i8(self.path_radius_offset);
        w.put_i8(self.path_taper_x);
        w.put_i8(self.path_taper_y);
        w.put_u8(self.path_revolutions);
        w.put_i8(self.path_skew);
        w.put_u8(self.profile_curve);
        w.put_u16_le(self.profile_begin);
        w.put_u16_le(self.profile_end);
        w.put_u16_le(self.profile_hollow);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpdateBlock {
    pub local_id: u32,
    pub state: u8,
    pub full_id: Uuid,
    pub crc: u32,
    pub pcode: u8,
    pub material: u8,
    pub click_action: u8,
    pub scale: Vec3,
    /// Packed kinematics; the length (16/32/48/60/76) selects the variant.
    pub object_data: Vec<u8>,
    pub parent_id: u32,
    pub update_flags: u32,
    pub path: PathParams,
    pub texture_entry: Vec<u8>,
    pub texture_anim: Vec<u8>,
    pub name_value: Vec<u8>,
    pub data: Vec<u8>,
    pub text: Vec<u8>,
    pub text_color: [u8; 4],
    pub media_url: Vec<u8>,
    pub ps_block: Vec<u8>,
    pub extra_params: Vec<u8>,
    pub sound_id: Uuid,
    pub owner_id: Uuid,
    pub gain: f32,
    pub sound_flags: u8,
    pub radius: f32,
    pub joint_type: u8,
    pub joint_pivot: Vec3,
    pub joint_axis_or_anchor: Vec3,
}

impl Default for ObjectUpdateBlock {
    fn default() -> Self {
        Self {
            local_id: 0,
            state: 0,
            full_id: Uuid::nil(),
            crc: 0,
            pcode: pcode::PRIM,
            material: 0,
            click_action: 0,
            scale: Vec3::ONE,
            object_data: Vec::new(),
            parent_id: 0,
            update_flags: 0,
            path: PathParams::default(),
            texture_entry: Vec::new(),
            texture_anim: Vec::new(),
            name_value: Vec::new(),
            data: Vec::new(),
            text: Vec::new(),
            text_color: [0; 4],
            media_url: Vec::new(),
            ps_block: Vec::new(),
            extra_params: Vec::new(),
            sound_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            gain: 0.0,
            sound_flags: 0,
            radius: 0.0,
            joint_type: 0,
            joint_pivot: Vec3::ZERO,
            joint_axis_or_anchor: Vec3::ZERO,
        }
    }
}

impl ObjectUpdateBlock {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: r.u32_le()?,
            state: r.u8()?,
            full_id: r.uuid()?,
            crc: r.u32_le()?,
            pcode: r.u8()?,
            material: r.u8()?,
            click_action: r.u8()?,
            scale: r.vec3()?,
            object_data: r.var1()?.to_vec(),
            parent_id: r.u32_le()?,
            update_flags: r.u32_le()?,
            path: PathParams::decode_full(r)?,
            texture_entry: r.var2()?.to_vec(),
            texture_anim: r.var1()?.to_vec(),
            name_value: r.var2()?.to_vec(),
            data: r.var2()?.to_vec(),
            text: r.var1()?.to_vec(),
            text_color: {
                let b = r.bytes(4)?;
                [b[0], b[1], b[2], b[3]]
            },
            media_url: r.var1()?.to_vec(),
            ps_block: r.var1()?.to_vec(),
            extra_params: r.var1()?.to_vec(),
            sound_id: r.uuid()?,
            owner_id: r.uuid()?,
            gain: r.f32_le()?,
            sound_flags: r.u8()?,
            radius: r.f32_le()?,
            joint_type: r.u8()?,
            joint_pivot: r.vec3()?,
            joint_axis_or_anchor: r.vec3()?,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u32_le(self.local_id);
        w.put_u8(self.state);
        w.put_uuid(self.full_id);
        w.put_u32_le(self.crc);
        w.put_u8(self.pcode);
        w.put_u8(self.material);
        w.put_u8(self.click_action);
        w.put_vec3(self.scale);
        w.put_var1(&self.object_data);
        w.put_u32_le(self.parent_id);
        w.put_u32_le(self.update_flags);
        self.path.encode_full(w);
        w.put_var2(&self.texture_entry);
        w.put_var1(&self.texture_anim);
        w.put_var2(&self.name_value);
        w.put_var2(&self.data);
        w.put_var1(&self.text);
        w.put_bytes(&self.text_color);
        w.put_var1(&self.media_url);
        w.put_var1(&self.ps_block);
        w.put_var1(&self.extra_params);
        w.put_uuid(self.sound_id);
        w.put_uuid(self.owner_id);
        w.put_f32_le(self.gain);
        w.put_u8(self.sound_flags);
        w.put_f32_le(self.radius);
        w.put_u8(self.joint_type);
        w.put_vec3(self.joint_pivot);
        w.put_vec3(self.joint_axis_or_anchor);
    }
}

/// Primitive codes carried in `pcode`.
pub mod pcode {
    pub const PRIM: u8 = 9;
    pub const AVATAR: u8 = 47;
    pub const GRASS: u8 = 95;
    pub const NEW_TREE: u8 = 111;
    pub const PARTICLE_SYSTEM: u8 = 143;
    pub const TREE: u8 = 255;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpdate {
    pub region_handle: u64,
    pub time_dilation: u16,
    pub blocks: Vec<ObjectUpdateBlock>,
}

impl ObjectUpdate {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let region_handle = r.u64_le()?;
        let time_dilation = r.u16_le()?;
        let count = r.block_count(1)?;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(ObjectUpdateBlock::decode(r)?);
        }
        Ok(Self {
            region_handle,
            time_dilation,
            blocks,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u64_le(self.region_handle);
        w.put_u16_le(self.time_dilation);
        w.put_u8(self.blocks.len() as u8);
        for block in &self.blocks {
            block.encode(w);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerseBlock {
    /// Packed movement data: local id, state, avatar flag, optional
    /// collision plane, then quantized kinematics.
    pub data: Vec<u8>,
    pub texture_entry: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerseObjectUpdate {
    pub region_handle: u64,
    pub time_dilation: u16,
    pub blocks: Vec<TerseBlock>,
}

impl TerseObjectUpdate {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let region_handle = r.u64_le()?;
        let time_dilation = r.u16_le()?;
        let count = r.block_count(1)?;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(TerseBlock {
                data: r.var1()?.to_vec(),
                texture_entry: r.var2()?.to_vec(),
            });
        }
        Ok(Self {
            region_handle,
            time_dilation,
            blocks,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u64_le(self.region_handle);
        w.put_u16_le(self.time_dilation);
        w.put_u8(self.blocks.len() as u8);
        for block in &self.blocks {
            w.put_var1(&block.data);
            w.put_var2(&block.texture_entry);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBlock {
    pub update_flags: u32,
    /// Bit-flag-prefixed byte stream; see the compressed decoder.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpdateCompressed {
    pub region_handle: u64,
    pub time_dilation: u16,
    pub blocks: Vec<CompressedBlock>,
}

impl ObjectUpdateCompressed {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let region_handle = r.u64_le()?;
        let time_dilation = r.u16_le()?;
        let count = r.block_count(1)?;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(CompressedBlock {
                update_flags: r.u32_le()?,
                data: r.var2()?.to_vec(),
            });
        }
        Ok(Self {
            region_handle,
            time_dilation,
            blocks,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u64_le(self.region_handle);
        w.put_u16_le(self.time_dilation);
        w.put_u8(self.blocks.len() as u8);
        for block in &self.blocks {
            w.put_u32_le(block.update_flags);
            w.put_var2(&block.data);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedBlock {
    pub local_id: u32,
    pub crc: u32,
    pub update_flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpdateCached {
    pub region_handle: u64,
    pub time_dilation: u16,
    pub blocks: Vec<CachedBlock>,
}

impl ObjectUpdateCached {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let region_handle = r.u64_le()?;
        let time_dilation = r.u16_le()?;
        let count = r.block_count(12)?;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(CachedBlock {
                local_id: r.u32_le()?,
                crc: r.u32_le()?,
                update_flags: r.u32_le()?,
            });
        }
        Ok(Self {
            region_handle,
            time_dilation,
            blocks,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u64_le(self.region_handle);
        w.put_u16_le(self.time_dilation);
        w.put_u8(self.blocks.len() as u8);
        for block in &self.blocks {
            w.put_u32_le(block.local_id);
            w.put_u32_le(block.crc);
            w.put_u32_le(block.update_flags);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillObject {
    pub local_ids: Vec<u32>,
}

impl KillObject {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let count = r.block_count(4)?;
        let mut local_ids = Vec::with_capacity(count);
        for _ in 0..count {
            local_ids.push(r.u32_le()?);
        }
        Ok(Self { local_ids })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.local_ids.len() as u8);
        for id in &self.local_ids {
            w.put_u32_le(*id);
        }
    }
}

pub mod cache_miss {
    pub const FULL: u8 = 0;
    pub const CRC: u8 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMissRequest {
    pub miss_type: u8,
    pub local_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMultipleObjects {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub requests: Vec<CacheMissRequest>,
}

impl RequestMultipleObjects {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let agent_id = r.uuid()?;
        let session_id = r.uuid()?;
        let count = r.block_count(5)?;
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            requests.push(CacheMissRequest {
                miss_type: r.u8()?,
                local_id: r.u32_le()?,
            });
        }
        Ok(Self {
            agent_id,
            session_id,
            requests,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_u8(self.requests.len() as u8);
        for req in &self.requests {
            w.put_u8(req.miss_type);
            w.put_u32_le(req.local_id);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPropertiesBlock {
    pub object_id: Uuid,
    pub creator_id: Uuid,
    pub owner_id: Uuid,
    pub group_id: Uuid,
    pub creation_date: u64,
    pub base_mask: u32,
    pub owner_mask: u32,
    pub group_mask: u32,
    pub everyone_mask: u32,
    pub next_owner_mask: u32,
    pub ownership_cost: i32,
    pub sale_type: u8,
    pub sale_price: i32,
    pub aggregate_perms: u8,
    pub aggregate_perm_textures: u8,
    pub aggregate_perm_textures_owner: u8,
    pub category: u32,
    pub inventory_serial: i16,
    pub item_id: Uuid,
    pub folder_id: Uuid,
    pub from_task_id: Uuid,
    pub last_owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub touch_name: String,
    pub sit_name: String,
    pub texture_id: Vec<u8>,
}

impl ObjectPropertiesBlock {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            object_id: r.uuid()?,
            creator_id: r.uuid()?,
            owner_id: r.uuid()?,
            group_id: r.uuid()?,
            creation_date: r.u64_le()?,
            base_mask: r.u32_le()?,
            owner_mask: r.u32_le()?,
            group_mask: r.u32_le()?,
            everyone_mask: r.u32_le()?,
            next_owner_mask: r.u32_le()?,
            ownership_cost: r.i32_le()?,
            sale_type: r.u8()?,
            sale_price: r.i32_le()?,
            aggregate_perms: r.u8()?,
            aggregate_perm_textures: r.u8()?,
            aggregate_perm_textures_owner: r.u8()?,
            category: r.u32_le()?,
            inventory_serial: r.i16_le()?,
            item_id: r.uuid()?,
            folder_id: r.uuid()?,
            from_task_id: r.uuid()?,
            last_owner_id: r.uuid()?,
            name: text(r.var1()?),
            description: text(r.var1()?),
            touch_name: text(r.var1()?),
            sit_name: text(r.var1()?),
            texture_id: r.var1()?.to_vec(),
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.object_id);
        w.put_uuid(self.creator_id);
        w.put_uuid(self.owner_id);
        w.put_uuid(self.group_id);
        w.put_u64_le(self.creation_date);
        w.put_u32_le(self.base_mask);
        w.put_u32_le(self.owner_mask);
        w.put_u32_le(self.group_mask);
        w.put_u32_le(self.everyone_mask);
        w.put_u32_le(self.next_owner_mask);
        w.put_i32_le(self.ownership_cost);
        w.put_u8(self.sale_type);
        w.put_i32_le(self.sale_price);
        w.put_u8(self.aggregate_perms);
        w.put_u8(self.aggregate_perm_textures);
        w.put_u8(self.aggregate_perm_textures_owner);
        w.put_u32_le(self.category);
        w.put_i16_le(self.inventory_serial);
        w.put_uuid(self.item_id);
        w.put_uuid(self.folder_id);
        w.put_uuid(self.from_task_id);
        w.put_uuid(self.last_owner_id);
        w.put_var1(self.name.as_bytes());
        w.put_var1(self.description.as_bytes());
        w.put_var1(self.touch_name.as_bytes());
        w.put_var1(self.sit_name.as_bytes());
        w.put_var1(&self.texture_id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperties {
    pub blocks: Vec<ObjectPropertiesBlock>,
}

impl ObjectProperties {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let count = r.block_count(1)?;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(ObjectPropertiesBlock::decode(r)?);
        }
        Ok(Self { blocks })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.blocks.len() as u8);
        for block in &self.blocks {
            block.encode(w);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPropertiesFamily {
    pub request_flags: u32,
    pub object_id: Uuid,
    pub owner_id: Uuid,
    pub group_id: Uuid,
    pub base_mask: u32,
    pub owner_mask: u32,
    pub group_mask: u32,
    pub everyone_mask: u32,
    pub next_owner_mask: u32,
    pub ownership_cost: i32,
    pub sale_type: u8,
    pub sale_price: i32,
    pub category: u32,
    pub last_owner_id: Uuid,
    pub name: String,
    pub description: String,
}

impl ObjectPropertiesFamily {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            request_flags: r.u32_le()?,
            object_id: r.uuid()?,
            owner_id: r.uuid()?,
            group_id: r.uuid()?,
            base_mask: r.u32_le()?,
            owner_mask: r.u32_le()?,
            group_mask: r.u32_le()?,
            everyone_mask: r.u32_le()?,
            next_owner_mask: r.u32_le()?,
            ownership_cost: r.i32_le()?,
            sale_type: r.u8()?,
            sale_price: r.i32_le()?,
            category: r.u32_le()?,
            last_owner_id: r.uuid()?,
            name: text(r.var1()?),
            description: text(r.var1()?),
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u32_le(self.request_flags);
        w.put_uuid(self.object_id);
        w.put_uuid(self.owner_id);
        w.put_uuid(self.group_id);
        w.put_u32_le(self.base_mask);
        w.put_u32_le(self.owner_mask);
        w.put_u32_le(self.group_mask);
        w.put_u32_le(self.everyone_mask);
        w.put_u32_le(self.next_owner_mask);
        w.put_i32_le(self.ownership_cost);
        w.put_u8(self.sale_type);
        w.put_i32_le(self.sale_price);
        w.put_u32_le(self.category);
        w.put_uuid(self.last_owner_id);
        w.put_var1(self.name.as_bytes());
        w.put_var1(self.description.as_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationEntry {
    pub anim_id: Uuid,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAnimation {
    pub sender: Uuid,
    pub animations: Vec<AnimationEntry>,
}

impl ObjectAnimation {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let sender = r.uuid()?;
        let count = r.block_count(20)?;
        let mut animations = Vec::with_capacity(count);
        for _ in 0..count {
            animations.push(AnimationEntry {
                anim_id: r.uuid()?,
                sequence: r.u32_le()?,
            });
        }
        Ok(Self { sender, animations })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.sender);
        w.put_u8(self.animations.len() as u8);
        for anim in &self.animations {
            w.put_uuid(anim.anim_id);
            w.put_u32_le(anim.sequence);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsShapeBlock {
    pub local_id: u32,
    pub shape_type: u8,
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
    pub gravity_multiplier: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPhysicsProperties {
    pub blocks: Vec<PhysicsShapeBlock>,
}

impl ObjectPhysicsProperties {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let count = r.block_count(21)?;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(PhysicsShapeBlock {
                local_id: r.u32_le()?,
                shape_type: r.u8()?,
                density: r.f32_le()?,
                friction: r.f32_le()?,
                restitution: r.f32_le()?,
                gravity_multiplier: r.f32_le()?,
            });
        }
        Ok(Self { blocks })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.blocks.len() as u8);
        for block in &self.blocks {
            w.put_u32_le(block.local_id);
            w.put_u8(block.shape_type);
            w.put_f32_le(block.density);
            w.put_f32_le(block.friction);
            w.put_f32_le(block.restitution);
            w.put_f32_le(block.gravity_multiplier);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayPriceReply {
    pub object_id: Uuid,
    pub default_price: i32,
    pub buttons: Vec<i32>,
}

impl PayPriceReply {
    pub fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let object_id = r.uuid()?;
        let default_price = r.i32_le()?;
        let count = r.block_count(4)?;
        let mut buttons = Vec::with_capacity(count);
        for _ in 0..count {
            buttons.push(r.i32_le()?);
        }
        Ok(Self {
            object_id,
            default_price,
            buttons,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.object_id);
        w.put_i32_le(self.default_price);
        w.put_u8(self.buttons.len() as u8);
        for price in &self.buttons {
            w.put_i32_le(*price);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_update_round_trip() {
        let block = ObjectUpdateBlock {
            local_id: 1234,
            full_id: Uuid::new_v4(),
            crc: 0xCAFE,
            scale: Vec3::new(0.5, 0.5, 2.0),
            object_data: vec![0u8; 60],
            parent_id: 77,
            text: b"label".to_vec(),
            text_color: [255, 0, 0, 255],
            ..Default::default()
        };
        let update = ObjectUpdate {
            region_handle: (256_000u64 << 32) | 254_976,
            time_dilation: 0xFFFF,
            blocks: vec![block],
        };
        let mut w = Writer::new();
        update.encode(&mut w);
        let buf = w.into_inner();
        assert_eq!(ObjectUpdate::decode(&mut Reader::new(&buf)).unwrap(), update);
    }

    #[test]
    fn truncated_block_is_reported() {
        let update = ObjectUpdate {
            region_handle: 1,
            time_dilation: 0,
            blocks: vec![ObjectUpdateBlock::default()],
        };
        let mut w = Writer::new();
        update.encode(&mut w);
        let buf = w.into_inner();
        let err = ObjectUpdate::decode(&mut Reader::new(&buf[..buf.len() - 10])).unwrap_err();
        assert!(matches!(err, CodecError::PayloadTruncated { .. }));
    }

    #[test]
    fn cached_update_round_trip() {
        let update = ObjectUpdateCached {
            region_handle: 9,
            time_dilation: 30000,
            blocks: vec![
                CachedBlock {
                    local_id: 1,
                    crc: 0xAAAA,
                    update_flags: 0,
                },
                CachedBlock {
                    local_id: 2,
                    crc: 0xBBBB,
                    update_flags: 4,
                },
            ],
        };
        let mut w = Writer::new();
        update.encode(&mut w);
        let buf = w.into_inner();
        assert_eq!(
            ObjectUpdateCached::decode(&mut Reader::new(&buf)).unwrap(),
            update
        );
    }

    #[test]
    fn kill_object_round_trip() {
        let msg = KillObject {
            local_ids: vec![100, 200, 300],
        };
        let mut w = Writer::new();
        msg.encode(&mut w);
        let buf = w.into_inner();
        assert_eq!(KillObject::decode(&mut Reader::new(&buf)).unwrap(), msg);
    }

    #[test]
    fn path_params_both_layouts() {
        let path = PathParams {
            path_curve: 16,
            profile_curve: 1,
            path_begin: 100,
            path_end: 49_900,
            path_scale_x: 100,
            path_scale_y: 100,
            path_twist: -20,
            profile_hollow: 25_000,
            ..Default::default()
        };

        let mut w = Writer::new();
        path.encode_full(&mut w);
        let buf = w.into_inner();
        assert_eq!(PathParams::decode_full(&mut Reader::new(&buf)).unwrap(), path);

        let mut w = Writer::new();
        path.encode_compressed(&mut w);
        let buf = w.into_inner();
        assert_eq!(
            PathParams::decode_compressed(&mut Reader::new(&buf)).unwrap(),
            path
        );
    }
}
