use bitflags::bitflags;
use glam::{Quat, Vec3, Vec4};
use uuid::Uuid;

use sim_proto::codec::Reader;
use sim_proto::messages::{ObjectPropertiesBlock, PathParams, PhysicsShapeBlock};
use sim_proto::quant;

use super::nvpair::{self, NameValue};

bitflags! {
    /// Update flags carried on every object update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u32 {
        const PHYSICS            = 1 << 0;
        const CREATE_SELECTED    = 1 << 1;
        const OBJECT_MODIFY      = 1 << 2;
        const OBJECT_COPY        = 1 << 3;
        const OBJECT_ANY_OWNER   = 1 << 4;
        const OBJECT_YOU_OWNER   = 1 << 5;
        const SCRIPTED           = 1 << 6;
        const HANDLE_TOUCH       = 1 << 7;
        const OBJECT_MOVE        = 1 << 8;
        const TAKES_MONEY        = 1 << 9;
        const PHANTOM            = 1 << 10;
        const INVENTORY_EMPTY    = 1 << 11;
        const JOINT_HINGE        = 1 << 12;
        const JOINT_P2P          = 1 << 13;
        const JOINT_LP2P         = 1 << 14;
        const ALLOW_INVENTORY_DROP = 1 << 16;
        const OBJECT_TRANSFER    = 1 << 17;
        const OBJECT_GROUP_OWNED = 1 << 18;
        const CAMERA_DECOUPLED   = 1 << 20;
        const ANIM_SOURCE        = 1 << 21;
        const CAMERA_SOURCE      = 1 << 22;
        const OBJECT_OWNER_MODIFY = 1 << 28;
        const TEMPORARY_ON_REZ   = 1 << 29;
        const TEMPORARY          = 1 << 30;
        const ZLIB_COMPRESSED    = 1 << 31;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JointType {
    #[default]
    Invalid,
    Hinge,
    PointToPoint,
}

impl JointType {
    pub fn from_wire(v: u8) -> Self {
        match v {
            1 => Self::Hinge,
            2 => Self::PointToPoint,
            _ => Self::Invalid,
        }
    }
}

/// Path and profile shape parameters, unpacked to floats.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PrimShape {
    pub path_curve: u8,
    pub profile_curve: u8,
    pub path_begin: f32,
    pub path_end: f32,
    pub path_scale_x: f32,
    pub path_scale_y: f32,
    pub path_shear_x: f32,
    pub path_shear_y: f32,
    pub path_twist: f32,
    pub path_twist_begin: f32,
    pub path_radius_offset: f32,
    pub path_taper_x: f32,
    pub path_taper_y: f32,
    pub path_revolutions: f32,
    pub path_skew: f32,
    pub profile_begin: f32,
    pub profile_end: f32,
    pub profile_hollow: f32,
}

impl From<&PathParams> for PrimShape {
    fn from(p: &PathParams) -> Self {
        Self {
            path_curve: p.path_curve,
            profile_curve: p.profile_curve,
            path_begin: quant::unpack_begin_cut(p.path_begin),
            path_end: quant::unpack_end_cut(p.path_end),
            path_scale_x: quant::unpack_path_scale(p.path_scale_x),
            path_scale_y: quant::unpack_path_scale(p.path_scale_y),
            path_shear_x: quant::unpack_path_shear(p.path_shear_x),
            path_shear_y: quant::unpack_path_shear(p.path_shear_y),
            path_twist: quant::unpack_path_twist(p.path_twist),
            path_twist_begin: quant::unpack_path_twist(p.path_twist_begin),
            path_radius_offset: quant::unpack_path_taper(p.path_radius_offset),
            path_taper_x: quant::unpack_path_taper(p.path_taper_x),
            path_taper_y: quant::unpack_path_taper(p.path_taper_y),
            path_revolutions: quant::unpack_revolutions(p.path_revolutions),
            path_skew: quant::unpack_skew(p.path_skew),
            profile_begin: quant::unpack_begin_cut(p.profile_begin),
            profile_end: quant::unpack_end_cut(p.profile_end),
            profile_hollow: quant::unpack_hollow(p.profile_hollow),
        }
    }
}

pub mod extra_param {
    pub const FLEXIBLE: u16 = 0x10;
    pub const LIGHT: u16 = 0x20;
    pub const SCULPT: u16 = 0x30;
    pub const PROJECTION: u16 = 0x40;
    pub const MESH: u16 = 0x60;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraParam {
    pub kind: u16,
    pub data: Vec<u8>,
}

/// Extra parameter list: a count byte, then `(type, length, data)` triples.
/// Damaged tails are dropped rather than failing the whole block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtraParams {
    pub params: Vec<ExtraParam>,
}

impl ExtraParams {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut r = Reader::new(data);
        Self::from_reader(&mut r)
    }

    pub fn from_reader(r: &mut Reader) -> Self {
        let mut params = Vec::new();
        let Ok(count) = r.u8() else {
            return Self { params };
        };
        for _ in 0..count {
            let parsed = (|| {
                let kind = r.u16_le()?;
                let len = r.u32_le()? as usize;
                Ok::<_, sim_proto::CodecError>(ExtraParam {
                    kind,
                    data: r.bytes(len)?.to_vec(),
                })
            })();
            match parsed {
                Ok(param) => params.push(param),
                Err(e) => {
                    log::warn!("damaged extra-params tail: {e}");
                    break;
                }
            }
        }
        Self { params }
    }

    pub fn get(&self, kind: u16) -> Option<&[u8]> {
        self.params
            .iter()
            .find(|p| p.kind == kind)
            .map(|p| p.data.as_slice())
    }

    pub fn is_sculpt(&self) -> bool {
        self.get(extra_param::SCULPT).is_some()
    }

    pub fn is_mesh(&self) -> bool {
        self.get(extra_param::MESH).is_some()
    }

    pub fn is_light(&self) -> bool {
        self.get(extra_param::LIGHT).is_some()
    }

    pub fn is_flexible(&self) -> bool {
        self.get(extra_param::FLEXIBLE).is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatingText {
    pub text: String,
    pub color: [u8; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoundInfo {
    pub sound_id: Uuid,
    pub gain: f32,
    pub flags: u8,
    pub radius: f32,
}

/// A tracked in-world primitive. Parents are referenced by local id, never
/// by pointer; lookups resolve through the owning simulator's world map.
#[derive(Debug, Clone)]
pub struct Primitive {
    pub local_id: u32,
    pub id: Uuid,
    pub parent_id: u32,
    pub region_handle: u64,
    pub owner_id: Uuid,
    pub state: u8,
    pub pcode: u8,
    pub material: u8,
    pub click_action: u8,
    pub crc: u32,

    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub rotation: Quat,
    pub angular_velocity: Vec3,
    pub scale: Vec3,

    pub flags: ObjectFlags,
    pub shape: PrimShape,
    pub joint: JointType,

    pub texture_entry: Vec<u8>,
    pub texture_anim: Vec<u8>,
    pub extra_params: ExtraParams,
    pub name_values: Vec<NameValue>,
    pub text: Option<FloatingText>,
    pub media_url: Option<String>,
    pub particles: Option<Vec<u8>>,
    pub sound: Option<SoundInfo>,
    pub tree_species: Option<u8>,

    pub properties: Option<ObjectPropertiesBlock>,
    pub physics: Option<PhysicsShapeBlock>,
}

impl Primitive {
    pub fn new(local_id: u32) -> Self {
        Self {
            local_id,
            id: Uuid::nil(),
            parent_id: 0,
            region_handle: 0,
            owner_id: Uuid::nil(),
            state: 0,
            pcode: 0,
            material: 0,
            click_action: 0,
            crc: 0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
            scale: Vec3::ONE,
            flags: ObjectFlags::empty(),
            shape: PrimShape::default(),
            joint: JointType::Invalid,
            texture_entry: Vec::new(),
            texture_anim: Vec::new(),
            extra_params: ExtraParams::default(),
            name_values: Vec::new(),
            text: None,
            media_url: None,
            particles: None,
            sound: None,
            tree_species: None,
            properties: None,
            physics: None,
        }
    }

    /// Attachments carry an `AttachItemID` name-value from the wearer.
    pub fn is_attachment(&self) -> bool {
        nvpair::find(&self.name_values, "AttachItemID").is_some()
    }
}

/// A tracked avatar. Kinematics mirror [`Primitive`]; the collision plane
/// only travels in avatar-sized update variants.
#[derive(Debug, Clone)]
pub struct Avatar {
    pub local_id: u32,
    pub id: Uuid,
    pub parent_id: u32,
    pub region_handle: u64,
    pub state: u8,

    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub rotation: Quat,
    pub angular_velocity: Vec3,
    pub scale: Vec3,
    pub collision_plane: Vec4,

    pub texture_entry: Vec<u8>,
    pub name_values: Vec<NameValue>,
    pub first_name: String,
    pub last_name: String,
}

impl Avatar {
    pub fn new(local_id: u32) -> Self {
        Self {
            local_id,
            id: Uuid::nil(),
            parent_id: 0,
            region_handle: 0,
            state: 0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
            scale: Vec3::ONE,
            collision_plane: Vec4::new(0.0, 0.0, 1.0, 0.0),
            texture_entry: Vec::new(),
            name_values: Vec::new(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    pub(crate) fn apply_name_values(&mut self, list: Vec<NameValue>) {
        if let Some(first) = nvpair::find(&list, "FirstName") {
            self.first_name = first.to_owned();
        }
        if let Some(last) = nvpair::find(&list, "LastName") {
            self.last_name = last.to_owned();
        }
        self.name_values = list;
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Seat local id, zero when standing.
    pub fn sitting_on(&self) -> u32 {
        self.parent_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_params_parse_and_probe() {
        // count=2: light (type 0x20, 4 bytes), sculpt (type 0x30, 2 bytes)
        let data = [
            2u8, 0x20, 0x00, 4, 0, 0, 0, 1, 2, 3, 4, 0x30, 0x00, 2, 0, 0, 0, 9, 9,
        ];
        let params = ExtraParams::from_bytes(&data);
        assert_eq!(params.params.len(), 2);
        assert!(params.is_light());
        assert!(params.is_sculpt());
        assert!(!params.is_mesh());
        assert_eq!(params.get(extra_param::LIGHT), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn damaged_extra_params_keep_prefix() {
        // second param claims more bytes than remain
        let data = [2u8, 0x20, 0x00, 1, 0, 0, 0, 7, 0x30, 0x00, 200, 0, 0, 0];
        let params = ExtraParams::from_bytes(&data);
        assert_eq!(params.params.len(), 1);
        assert!(params.is_light());
    }

    #[test]
    fn avatar_names_from_nvpairs() {
        let mut avatar = Avatar::new(5);
        avatar.apply_name_values(nvpair::parse(
            "FirstName STRING RW SV Ada\nLastName STRING RW SV Lovelace",
        ));
        assert_eq!(avatar.name(), "Ada Lovelace");
    }

    #[test]
    fn attachment_detection() {
        let mut prim = Primitive::new(7);
        assert!(!prim.is_attachment());
        prim.name_values =
            nvpair::parse("AttachItemID STRING RW SV 550e8400-e29b-41d4-a716-446655440000");
        assert!(prim.is_attachment());
    }
}
