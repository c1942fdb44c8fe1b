//! Static scene description records and their decoders.
//!
//! A `ModelDef` packet carries a tagged stream of description items: a u32
//! item count, then for each item a u32 type tag followed by the item body.
//! [`DataDescriptions`] groups the decoded items by tag. Unlike frame data,
//! descriptions only change when the scene is edited, and the server pushes
//! them on request.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive as _;

use super::{FromPacket, PacketBuffer, ProtocolError, Vec3, Vec4, Version};

const V2: Version = Version::from_parts(&[2]);
const V3: Version = Version::from_parts(&[3]);
const V4: Version = Version::from_parts(&[4]);

/// Type tags preceding each item of the description stream.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum DescriptionTag {
    /// A [`MarkerSetDescription`].
    MarkerSet = 0,
    /// A [`RigidBodyDescription`].
    RigidBody = 1,
    /// A [`SkeletonDescription`].
    Skeleton = 2,
    /// A [`ForcePlateDescription`].
    ForcePlate = 3,
    /// A [`DeviceDescription`].
    Device = 4,
    /// A [`CameraDescription`].
    Camera = 5,
}

/// Declares one named model and the names of its markers.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSetDescription {
    /// Model name.
    pub name: String,
    /// Marker names, in streaming order.
    pub marker_names: Vec<String>,
}

impl FromPacket for MarkerSetDescription {
    fn read(buf: &mut PacketBuffer<'_>, _version: Version) -> Result<Self, ProtocolError> {
        let name = buf.read_string()?;
        let count = buf.read_u32()?;
        let mut marker_names = Vec::new();
        for _ in 0..count {
            marker_names.push(buf.read_string()?);
        }

        Ok(Self { name, marker_names })
    }
}

/// Declares one expected marker of a rigid body.
///
/// Present in the description from protocol 3.0 on (the same information
/// rides along with every frame on older streams); marker names joined the
/// wire format in 4.0.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyMarkerDescription {
    /// Marker name, absent before 4.0.
    pub name: Option<String>,
    /// Active-marker label, zero for passive markers.
    pub active_label: u32,
    /// Expected marker position relative to the body origin.
    pub pos: Vec3,
}

impl RigidBodyMarkerDescription {
    // The block is laid out structure-of-arrays: positions, then labels,
    // then (4.0 and later) names.
    fn read_all(
        buf: &mut PacketBuffer<'_>,
        version: Version,
    ) -> Result<Vec<Self>, ProtocolError> {
        let count = buf.read_u32()? as usize;

        let mut positions = Vec::new();
        for _ in 0..count {
            positions.push(buf.read_vec3()?);
        }

        let mut labels = Vec::new();
        for _ in 0..count {
            labels.push(buf.read_u32()?);
        }

        let mut names = vec![None; count];
        if version >= V4 {
            for name in names.iter_mut() {
                *name = Some(buf.read_string()?);
            }
        }

        Ok(positions
            .into_iter()
            .zip(labels)
            .zip(names)
            .map(|((pos, active_label), name)| Self {
                name,
                active_label,
                pos,
            })
            .collect())
    }
}

/// Declares one rigid body.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyDescription {
    /// Body name, absent before 2.0.
    pub name: Option<String>,
    /// Streaming id.
    pub id: u32,
    /// Id of the parent body, zero for top-level bodies.
    pub parent_id: u32,
    /// Offset from the parent body origin.
    pub pos: Vec3,
    /// Expected markers; on the wire only from 3.0 on, otherwise empty.
    pub markers: Vec<RigidBodyMarkerDescription>,
}

impl FromPacket for RigidBodyDescription {
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError> {
        let name = if version >= V2 {
            Some(buf.read_string()?)
        } else {
            None
        };

        let id = buf.read_u32()?;
        let parent_id = buf.read_u32()?;
        let pos = buf.read_vec3()?;

        let markers = if version >= V3 {
            RigidBodyMarkerDescription::read_all(buf, version)?
        } else {
            Vec::new()
        };

        Ok(Self {
            name,
            id,
            parent_id,
            pos,
            markers,
        })
    }
}

/// Declares one skeleton and its bones.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonDescription {
    /// Skeleton name.
    pub name: String,
    /// Streaming id.
    pub id: u32,
    /// Bone declarations, in streaming order.
    pub rigid_bodies: Vec<RigidBodyDescription>,
}

impl FromPacket for SkeletonDescription {
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError> {
        let name = buf.read_string()?;
        let id = buf.read_u32()?;
        let count = buf.read_u32()?;

        let mut rigid_bodies = Vec::new();
        for _ in 0..count {
            rigid_bodies.push(RigidBodyDescription::read(buf, version)?);
        }

        Ok(Self {
            name,
            id,
            rigid_bodies,
        })
    }
}

/// Declares one force plate, including its calibration.
///
/// Only published by servers speaking 3.0 or newer.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcePlateDescription {
    /// Streaming id.
    pub id: u32,
    /// Manufacturer serial number.
    pub serial_number: String,
    /// Plate width in metres.
    pub width: f32,
    /// Plate length in metres.
    pub length: f32,
    /// Plate origin in tracking space.
    pub origin: Vec3,
    /// 12x12 electromechanical calibration matrix.
    pub calibration_matrix: [[f32; 12]; 12],
    /// Plate corner positions as carried on the wire (three rows of three).
    pub corners: [Vec3; 3],
    /// Plate type code.
    pub plate_type: u32,
    /// Encoding of the channel samples.
    pub channel_data_type: u32,
    /// Channel names, in streaming order.
    pub channel_names: Vec<String>,
}

impl ForcePlateDescription {
    /// Reads one plate description, or `None` when the wire version
    /// predates force plate descriptions.
    pub fn read(
        buf: &mut PacketBuffer<'_>,
        version: Version,
    ) -> Result<Option<Self>, ProtocolError> {
        if version < V3 {
            return Ok(None);
        }

        let id = buf.read_u32()?;
        let serial_number = buf.read_string()?;
        let width = buf.read_f32()?;
        let length = buf.read_f32()?;
        let origin = buf.read_vec3()?;

        let flat = buf.read_f32_array(12 * 12)?;
        let mut calibration_matrix = [[0.0; 12]; 12];
        for (row, chunk) in calibration_matrix.iter_mut().zip(flat.chunks_exact(12)) {
            row.copy_from_slice(chunk);
        }

        let flat = buf.read_f32_array(3 * 3)?;
        let mut corners = [[0.0; 3]; 3];
        for (corner, chunk) in corners.iter_mut().zip(flat.chunks_exact(3)) {
            corner.copy_from_slice(chunk);
        }

        let plate_type = buf.read_u32()?;
        let channel_data_type = buf.read_u32()?;
        let count = buf.read_u32()?;
        let mut channel_names = Vec::new();
        for _ in 0..count {
            channel_names.push(buf.read_string()?);
        }

        Ok(Some(Self {
            id,
            serial_number,
            width,
            length,
            origin,
            calibration_matrix,
            corners,
            plate_type,
            channel_data_type,
            channel_names,
        }))
    }
}

/// Declares one peripheral device.
///
/// Only published by servers speaking 3.0 or newer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescription {
    /// Streaming id.
    pub id: u32,
    /// Device name.
    pub name: String,
    /// Manufacturer serial number.
    pub serial_number: String,
    /// Device type code.
    pub device_type: u32,
    /// Encoding of the channel samples.
    pub channel_data_type: u32,
    /// Channel names, in streaming order.
    pub channel_names: Vec<String>,
}

impl DeviceDescription {
    /// Reads one device description, or `None` when the wire version
    /// predates device descriptions.
    pub fn read(
        buf: &mut PacketBuffer<'_>,
        version: Version,
    ) -> Result<Option<Self>, ProtocolError> {
        if version < V3 {
            return Ok(None);
        }

        let id = buf.read_u32()?;
        let name = buf.read_string()?;
        let serial_number = buf.read_string()?;
        let device_type = buf.read_u32()?;
        let channel_data_type = buf.read_u32()?;
        let count = buf.read_u32()?;
        let mut channel_names = Vec::new();
        for _ in 0..count {
            channel_names.push(buf.read_string()?);
        }

        Ok(Some(Self {
            id,
            name,
            serial_number,
            device_type,
            channel_data_type,
            channel_names,
        }))
    }
}

/// Declares one camera pose.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDescription {
    /// Camera name.
    pub name: String,
    /// Camera position.
    pub position: Vec3,
    /// Camera orientation quaternion.
    pub orientation: Vec4,
}

impl FromPacket for CameraDescription {
    fn read(buf: &mut PacketBuffer<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: buf.read_string()?,
            position: buf.read_vec3()?,
            orientation: buf.read_vec4()?,
        })
    }
}

/// The full static scene, grouped by description type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataDescriptions {
    /// Marker set declarations.
    pub marker_sets: Vec<MarkerSetDescription>,
    /// Rigid body declarations.
    pub rigid_bodies: Vec<RigidBodyDescription>,
    /// Skeleton declarations.
    pub skeletons: Vec<SkeletonDescription>,
    /// Force plate declarations.
    pub force_plates: Vec<ForcePlateDescription>,
    /// Peripheral device declarations.
    pub devices: Vec<DeviceDescription>,
    /// Camera declarations.
    pub cameras: Vec<CameraDescription>,
}

impl FromPacket for DataDescriptions {
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut descriptions = Self::default();
        let dataset_count = buf.read_u32()?;

        for i in 0..dataset_count {
            let tag = buf.read_u32()?;
            let Some(tag) = DescriptionTag::from_u32(tag) else {
                // The item body cannot be skipped without knowing its
                // layout, so the rest of the stream is unreadable.
                log::warn!(
                    "unknown description type {} at byte {}/{}, stopped after {}/{} datasets",
                    tag,
                    buf.position(),
                    buf.len(),
                    i,
                    dataset_count,
                );
                break;
            };

            match tag {
                DescriptionTag::MarkerSet => {
                    descriptions
                        .marker_sets
                        .push(MarkerSetDescription::read(buf, version)?);
                }
                DescriptionTag::RigidBody => {
                    descriptions
                        .rigid_bodies
                        .push(RigidBodyDescription::read(buf, version)?);
                }
                DescriptionTag::Skeleton => {
                    descriptions
                        .skeletons
                        .push(SkeletonDescription::read(buf, version)?);
                }
                DescriptionTag::ForcePlate => {
                    if let Some(plate) = ForcePlateDescription::read(buf, version)? {
                        descriptions.force_plates.push(plate);
                    }
                }
                DescriptionTag::Device => {
                    if let Some(device) = DeviceDescription::read(buf, version)? {
                        descriptions.devices.push(device);
                    }
                }
                DescriptionTag::Camera => {
                    descriptions
                        .cameras
                        .push(CameraDescription::read(buf, version)?);
                }
            }
        }

        Ok(descriptions)
    }
}
