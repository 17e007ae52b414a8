//! Packed kinematic layouts carried by object updates. The byte length of
//! the packed string selects the variant; anything outside the known set
//! is an error and the containing block is skipped.

use bitflags::bitflags;
use glam::{Quat, Vec3, Vec4};
use uuid::Uuid;

use sim_proto::codec::{text as lossy_text, CodecError, Reader};
use sim_proto::messages::PathParams;
use sim_proto::quant;

const POS_XY: (f32, f32) = (-128.0, 384.0);
const POS_Z: (f32, f32) = (-256.0, 512.0);
const VEL: (f32, f32) = (-256.0, 256.0);
const ROT: (f32, f32) = (-1.0, 1.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionData {
    /// Present only in avatar-sized variants (76 and 48 bytes).
    pub collision_plane: Option<Vec4>,
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub rotation: Quat,
    pub angular_velocity: Vec3,
}

impl MotionData {
    pub fn is_avatar_layout(&self) -> bool {
        self.collision_plane.is_some()
    }
}

fn vec3_u16(r: &mut Reader, range: (f32, f32)) -> Result<Vec3, CodecError> {
    Ok(Vec3::new(
        quant::u16_to_float(r.u16_le()?, range.0, range.1),
        quant::u16_to_float(r.u16_le()?, range.0, range.1),
        quant::u16_to_float(r.u16_le()?, range.0, range.1),
    ))
}

fn quat_u16(r: &mut Reader) -> Result<Quat, CodecError> {
    let x = quant::u16_to_float(r.u16_le()?, ROT.0, ROT.1);
    let y = quant::u16_to_float(r.u16_le()?, ROT.0, ROT.1);
    let z = quant::u16_to_float(r.u16_le()?, ROT.0, ROT.1);
    let w = quant::u16_to_float(r.u16_le()?, ROT.0, ROT.1);
    Ok(Quat::from_xyzw(x, y, z, w).normalize())
}

fn vec3_u8(r: &mut Reader, range: (f32, f32)) -> Result<Vec3, CodecError> {
    Ok(Vec3::new(
        quant::u8_to_float(r.u8()?, range.0, range.1),
        quant::u8_to_float(r.u8()?, range.0, range.1),
        quant::u8_to_float(r.u8()?, range.0, range.1),
    ))
}

fn quat_u8(r: &mut Reader) -> Result<Quat, CodecError> {
    let x = quant::u8_to_float(r.u8()?, ROT.0, ROT.1);
    let y = quant::u8_to_float(r.u8()?, ROT.0, ROT.1);
    let z = quant::u8_to_float(r.u8()?, ROT.0, ROT.1);
    let w = quant::u8_to_float(r.u8()?, ROT.0, ROT.1);
    Ok(Quat::from_xyzw(x, y, z, w).normalize())
}

/// Full-precision tuple: position, velocity, acceleration, rotation,
/// angular velocity, 12 bytes each.
fn full_tuple(r: &mut Reader) -> Result<MotionData, CodecError> {
    Ok(MotionData {
        collision_plane: None,
        position: r.vec3()?,
        velocity: r.vec3()?,
        acceleration: r.vec3()?,
        rotation: r.quat_norm3()?,
        angular_velocity: r.vec3()?,
    })
}

/// 32-byte tuple quantized to unsigned 16-bit fields.
fn compact_u16_tuple(r: &mut Reader) -> Result<MotionData, CodecError> {
    Ok(MotionData {
        collision_plane: None,
        position: Vec3::new(
            quant::u16_to_float(r.u16_le()?, POS_XY.0, POS_XY.1),
            quant::u16_to_float(r.u16_le()?, POS_XY.0, POS_XY.1),
            quant::u16_to_float(r.u16_le()?, POS_Z.0, POS_Z.1),
        ),
        velocity: vec3_u16(r, VEL)?,
        acceleration: vec3_u16(r, VEL)?,
        rotation: quat_u16(r)?,
        angular_velocity: vec3_u16(r, VEL)?,
    })
}

/// 16-byte tuple quantized to unsigned bytes.
fn compact_u8_tuple(r: &mut Reader) -> Result<MotionData, CodecError> {
    Ok(MotionData {
        collision_plane: None,
        position: Vec3::new(
            quant::u8_to_float(r.u8()?, POS_XY.0, POS_XY.1),
            quant::u8_to_float(r.u8()?, POS_XY.0, POS_XY.1),
            quant::u8_to_float(r.u8()?, POS_Z.0, POS_Z.1),
        ),
        velocity: vec3_u8(r, VEL)?,
        acceleration: vec3_u8(r, VEL)?,
        rotation: quat_u8(r)?,
        angular_velocity: vec3_u8(r, VEL)?,
    })
}

/// Decode a packed object-data string. Layout selection is total over the
/// lengths {16, 32, 48, 60, 76}; anything else is an error.
pub fn decode_object_data(data: &[u8]) -> Result<MotionData, CodecError> {
    let mut r = Reader::new(data);
    match data.len() {
        76 => {
            let plane = r.vec4()?;
            let mut motion = full_tuple(&mut r)?;
            motion.collision_plane = Some(plane);
            Ok(motion)
        }
        60 => full_tuple(&mut r),
        48 => {
            let plane = r.vec4()?;
            let mut motion = compact_u16_tuple(&mut r)?;
            motion.collision_plane = Some(plane);
            Ok(motion)
        }
        32 => compact_u16_tuple(&mut r),
        16 => compact_u8_tuple(&mut r),
        n => Err(CodecError::PayloadTruncated {
            needed: 60,
            remaining: n,
        }),
    }
}

/// Movement-only update: local id, state, avatar flag, optional collision
/// plane, full-precision position, then quantized kinematics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerseUpdateData {
    pub local_id: u32,
    pub state: u8,
    pub avatar: bool,
    pub motion: MotionData,
}

pub fn decode_terse(data: &[u8]) -> Result<TerseUpdateData, CodecError> {
    let mut r = Reader::new(data);
    let local_id = r.u32_le()?;
    let state = r.u8()?;
    let avatar = r.bool()?;
    let collision_plane = if avatar { Some(r.vec4()?) } else { None };
    let motion = MotionData {
        collision_plane,
        position: r.vec3()?,
        velocity: vec3_u16(&mut r, VEL)?,
        acceleration: vec3_u16(&mut r, VEL)?,
        rotation: quat_u16(&mut r)?,
        angular_velocity: vec3_u16(&mut r, VEL)?,
    };
    Ok(TerseUpdateData {
        local_id,
        state,
        avatar,
        motion,
    })
}

bitflags! {
    /// Segment-presence prefix of a compressed update stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompressedFlags: u32 {
        const SCRATCH_PAD          = 0x01;
        const TREE                 = 0x02;
        const HAS_TEXT             = 0x04;
        const HAS_PARTICLES        = 0x08;
        const HAS_SOUND            = 0x10;
        const HAS_PARENT           = 0x20;
        const TEXTURE_ANIMATION    = 0x40;
        const HAS_ANGULAR_VELOCITY = 0x80;
        const HAS_NAME_VALUES      = 0x100;
        const MEDIA_URL            = 0x200;
    }
}

const PARTICLE_BLOCK_LEN: usize = 86;

#[derive(Debug, Clone, PartialEq)]
pub struct CompressedSound {
    pub sound_id: Uuid,
    pub gain: f32,
    pub flags: u8,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressedObjectData {
    pub full_id: Uuid,
    pub local_id: u32,
    pub pcode: u8,
    pub state: u8,
    pub crc: u32,
    pub material: u8,
    pub click_action: u8,
    pub scale: Vec3,
    pub position: Vec3,
    pub rotation: Quat,
    pub flags: CompressedFlags,
    pub owner_id: Uuid,
    pub angular_velocity: Option<Vec3>,
    pub parent_id: Option<u32>,
    pub tree_species: Option<u8>,
    pub text: Option<(String, [u8; 4])>,
    pub media_url: Option<String>,
    pub particles: Option<Vec<u8>>,
    pub extra_params: Vec<u8>,
    pub sound: Option<CompressedSound>,
    pub name_values: Option<String>,
    pub path: PathParams,
    pub texture_entry: Vec<u8>,
    pub texture_anim: Option<Vec<u8>>,
}

/// Decode one compressed-update byte stream. Optional segments appear in a
/// fixed order selected by the flag word.
pub fn decode_compressed(data: &[u8]) -> Result<CompressedObjectData, CodecError> {
    let mut r = Reader::new(data);
    let full_id = r.uuid()?;
    let local_id = r.u32_le()?;
    let pcode = r.u8()?;
    let state = r.u8()?;
    let crc = r.u32_le()?;
    let material = r.u8()?;
    let click_action = r.u8()?;
    let scale = r.vec3()?;
    let position = r.vec3()?;
    let rotation = r.quat_norm3()?;
    let flags = CompressedFlags::from_bits_truncate(r.u32_le()?);
    let owner_id = r.uuid()?;

    let angular_velocity = if flags.contains(CompressedFlags::HAS_ANGULAR_VELOCITY) {
        Some(r.vec3()?)
    } else {
        None
    };
    let parent_id = if flags.contains(CompressedFlags::HAS_PARENT) {
        Some(r.u32_le()?)
    } else {
        None
    };

    let tree_species = if flags.contains(CompressedFlags::TREE) {
        Some(r.u8()?)
    } else {
        if flags.contains(CompressedFlags::SCRATCH_PAD) {
            let len = r.u32_le()? as usize;
            r.skip(len)?;
        }
        None
    };

    let text = if flags.contains(CompressedFlags::HAS_TEXT) {
        let body = lossy_text(r.cstr()?);
        let c = r.bytes(4)?;
        Some((body, [c[0], c[1], c[2], c[3]]))
    } else {
        None
    };

    let media_url = if flags.contains(CompressedFlags::MEDIA_URL) {
        Some(lossy_text(r.cstr()?))
    } else {
        None
    };

    let particles = if flags.contains(CompressedFlags::HAS_PARTICLES) {
        Some(r.bytes(PARTICLE_BLOCK_LEN)?.to_vec())
    } else {
        None
    };

    // extra params are always present, possibly with a zero count
    let extra_start = r.position();
    let count = r.u8()?;
    for _ in 0..count {
        r.skip(2)?;
        let len = r.u32_le()? as usize;
        r.skip(len)?;
    }
    let extra_end = r.position();
    let extra_params = data[extra_start..extra_end].to_vec();

    let sound = if flags.contains(CompressedFlags::HAS_SOUND) {
        Some(CompressedSound {
            sound_id: r.uuid()?,
            gain: r.f32_le()?,
            flags: r.u8()?,
            radius: r.f32_le()?,
        })
    } else {
        None
    };

    let name_values = if flags.contains(CompressedFlags::HAS_NAME_VALUES) {
        Some(lossy_text(r.cstr()?))
    } else {
        None
    };

    let path = PathParams::decode_compressed(&mut r)?;

    let te_len = r.u32_le()? as usize;
    let texture_entry = r.bytes(te_len)?.to_vec();

    let texture_anim = if flags.contains(CompressedFlags::TEXTURE_ANIMATION) {
        let len = r.u32_le()? as usize;
        Some(r.bytes(len)?.to_vec())
    } else {
        None
    };

    Ok(CompressedObjectData {
        full_id,
        local_id,
        pcode,
        state,
        crc,
        material,
        click_action,
        scale,
        position,
        rotation,
        flags,
        owner_id,
        angular_velocity,
        parent_id,
        tree_species,
        text,
        media_url,
        particles,
        extra_params,
        sound,
        name_values,
        path,
        texture_entry,
        texture_anim,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_proto::codec::Writer;

    #[test]
    fn layout_selection_is_total() {
        for len in [16usize, 32, 48, 60, 76] {
            let data = vec![0u8; len];
            let motion = decode_object_data(&data).unwrap();
            assert_eq!(motion.is_avatar_layout(), len == 76 || len == 48, "{len}");
        }
        for len in [0usize, 15, 31, 59, 77, 100] {
            assert!(decode_object_data(&vec![0u8; len]).is_err(), "{len}");
        }
    }

    #[test]
    fn sixty_byte_prim_positions() {
        let mut w = Writer::new();
        w.put_vec3(Vec3::new(1.0, 2.0, 3.0)); // position
        w.put_vec3(Vec3::ZERO); // velocity
        w.put_vec3(Vec3::ZERO); // acceleration
        w.put_quat_norm3(Quat::IDENTITY);
        w.put_vec3(Vec3::ZERO); // angular velocity
        let data = w.into_inner();
        assert_eq!(data.len(), 60);

        let motion = decode_object_data(&data).unwrap();
        assert_eq!(motion.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(motion.velocity, Vec3::ZERO);
        assert!(motion.collision_plane.is_none());
    }

    #[test]
    fn seventy_six_byte_avatar_collision_plane() {
        let mut w = Writer::new();
        w.put_vec4(Vec4::new(0.0, 0.0, 1.0, 22.5));
        w.put_vec3(Vec3::new(1.0, 2.0, 3.0));
        w.put_vec3(Vec3::ZERO);
        w.put_vec3(Vec3::ZERO);
        w.put_quat_norm3(Quat::IDENTITY);
        w.put_vec3(Vec3::ZERO);
        let data = w.into_inner();
        assert_eq!(data.len(), 76);

        let motion = decode_object_data(&data).unwrap();
        assert_eq!(motion.collision_plane, Some(Vec4::new(0.0, 0.0, 1.0, 22.5)));
        assert_eq!(motion.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn terse_avatar_round_trip() {
        let mut w = Writer::new();
        w.put_u32_le(4321);
        w.put_u8(0);
        w.put_bool(true);
        w.put_vec4(Vec4::new(0.0, 0.0, 1.0, 20.0));
        w.put_vec3(Vec3::new(128.0, 64.0, 25.0));
        for _ in 0..3 {
            w.put_u16_le(quant::float_to_u16(0.0, VEL.0, VEL.1)); // velocity
        }
        for _ in 0..3 {
            w.put_u16_le(quant::float_to_u16(0.0, VEL.0, VEL.1)); // acceleration
        }
        w.put_u16_le(quant::float_to_u16(0.0, -1.0, 1.0));
        w.put_u16_le(quant::float_to_u16(0.0, -1.0, 1.0));
        w.put_u16_le(quant::float_to_u16(0.0, -1.0, 1.0));
        w.put_u16_le(quant::float_to_u16(1.0, -1.0, 1.0));
        for _ in 0..3 {
            w.put_u16_le(quant::float_to_u16(0.0, VEL.0, VEL.1)); // angular
        }
        let data = w.into_inner();

        let terse = decode_terse(&data).unwrap();
        assert_eq!(terse.local_id, 4321);
        assert!(terse.avatar);
        assert_eq!(terse.motion.position, Vec3::new(128.0, 64.0, 25.0));
        assert_eq!(terse.motion.velocity, Vec3::ZERO);
        assert!((terse.motion.rotation.w - 1.0).abs() < 1e-3);
    }

    fn minimal_compressed(flags: CompressedFlags, extend: impl FnOnce(&mut Writer)) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_uuid(Uuid::new_v4());
        w.put_u32_le(555);
        w.put_u8(9); // prim pcode
        w.put_u8(0);
        w.put_u32_le(0xFEED);
        w.put_u8(3);
        w.put_u8(0);
        w.put_vec3(Vec3::ONE);
        w.put_vec3(Vec3::new(10.0, 20.0, 30.0));
        w.put_quat_norm3(Quat::IDENTITY);
        w.put_u32_le(flags.bits());
        w.put_uuid(Uuid::new_v4());
        extend(&mut w);
        w.into_inner()
    }

    #[test]
    fn compressed_minimal_stream() {
        let data = minimal_compressed(CompressedFlags::empty(), |w| {
            w.put_u8(0); // extra params count
            PathParams::default().encode_compressed(w);
            w.put_u32_le(0); // texture entry length
        });
        let decoded = decode_compressed(&data).unwrap();
        assert_eq!(decoded.local_id, 555);
        assert_eq!(decoded.position, Vec3::new(10.0, 20.0, 30.0));
        assert!(decoded.text.is_none());
        assert!(decoded.parent_id.is_none());
    }

    #[test]
    fn compressed_optional_segments() {
        let flags = CompressedFlags::HAS_PARENT
            | CompressedFlags::HAS_TEXT
            | CompressedFlags::HAS_SOUND
            | CompressedFlags::HAS_NAME_VALUES
            | CompressedFlags::HAS_ANGULAR_VELOCITY;
        let sound_id = Uuid::new_v4();
        let data = minimal_compressed(flags, |w| {
            w.put_vec3(Vec3::new(0.0, 0.0, 0.5)); // angular velocity
            w.put_u32_le(42); // parent
            w.put_cstr(b"hello"); // floating text
            w.put_bytes(&[10, 20, 30, 255]); // text color
            w.put_u8(0); // extra params count
            w.put_uuid(sound_id);
            w.put_f32_le(0.8);
            w.put_u8(1);
            w.put_f32_le(12.0);
            w.put_cstr(b"FirstName STRING RW SV Test");
            PathParams::default().encode_compressed(w);
            w.put_u32_le(0);
        });

        let decoded = decode_compressed(&data).unwrap();
        assert_eq!(decoded.parent_id, Some(42));
        assert_eq!(decoded.angular_velocity, Some(Vec3::new(0.0, 0.0, 0.5)));
        assert_eq!(
            decoded.text,
            Some(("hello".to_owned(), [10, 20, 30, 255]))
        );
        let sound = decoded.sound.unwrap();
        assert_eq!(sound.sound_id, sound_id);
        assert_eq!(sound.radius, 12.0);
        assert_eq!(
            decoded.name_values.as_deref(),
            Some("FirstName STRING RW SV Test")
        );
    }

    #[test]
    fn compressed_truncation_is_reported() {
        let data = minimal_compressed(CompressedFlags::empty(), |w| {
            w.put_u8(0);
        });
        assert!(decode_compressed(&data).is_err());
    }
}
