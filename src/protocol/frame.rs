//! Per-frame tracking records and their decoders.
//!
//! A [`DataFrame`] is the payload of a `FrameOfData` packet: a fixed prefix,
//! a run of count-prefixed sections in declaration order, and a fixed
//! suffix. Sections introduced after protocol 2.0 only exist on the wire
//! when the negotiated version is new enough; those decode to `None`, which
//! is distinct from a section that is present but empty.

use bitflags::bitflags;

use super::{read_counted, FromPacket, PacketBuffer, ProtocolError, Vec3, Vec4, Version};

const V2: Version = Version::from_parts(&[2]);
const V2_1: Version = Version::from_parts(&[2, 1]);
const V2_3: Version = Version::from_parts(&[2, 3]);
const V2_6: Version = Version::from_parts(&[2, 6]);
const V2_7: Version = Version::from_parts(&[2, 7]);
const V2_9: Version = Version::from_parts(&[2, 9]);
const V2_11: Version = Version::from_parts(&[2, 11]);
const V3: Version = Version::from_parts(&[3]);

/// Fixed-width header of every data frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FramePrefix {
    /// Frame sequence number assigned by the server.
    pub frame_number: u32,
}

impl FromPacket for FramePrefix {
    fn read(buf: &mut PacketBuffer<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Self {
            frame_number: buf.read_u32()?,
        })
    }
}

/// The marker positions of one named model for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSet {
    /// Name of the model the markers belong to.
    pub model_name: String,
    /// Marker positions, in the model's declared order.
    pub positions: Vec<Vec3>,
}

impl FromPacket for MarkerSet {
    fn read(buf: &mut PacketBuffer<'_>, _version: Version) -> Result<Self, ProtocolError> {
        let model_name = buf.read_string()?;
        let count = buf.read_u32()?;
        let mut positions = Vec::new();
        for _ in 0..count {
            positions.push(buf.read_vec3()?);
        }

        Ok(Self {
            model_name,
            positions,
        })
    }
}

/// A marker attached to a rigid body.
///
/// Embedded in frames only before protocol 3.0; later servers move this
/// information to the scene description. Marker ids and sizes joined the
/// wire format in 2.0.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RigidBodyMarker {
    /// Marker position.
    pub pos: Vec3,
    /// Marker id, absent before 2.0.
    pub id: Option<u32>,
    /// Marker size, absent before 2.0.
    pub size: Option<f32>,
}

/// The pose of one tracked object for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    /// Streaming id of the body.
    pub id: u32,
    /// Position of the body origin.
    pub pos: Vec3,
    /// Orientation quaternion.
    pub rot: Vec4,
    /// Per-body markers; on the wire only before protocol 3.0.
    pub markers: Option<Vec<RigidBodyMarker>>,
    /// Whether the body was successfully tracked this frame, from 2.6 on.
    pub tracking_valid: Option<bool>,
    /// Mean marker fit error, from 2.0 on.
    pub marker_error: Option<f32>,
}

impl FromPacket for RigidBody {
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError> {
        let id = buf.read_u32()?;
        let pos = buf.read_vec3()?;
        let rot = buf.read_vec4()?;

        let markers = if version < V3 {
            let count = buf.read_u32()? as usize;
            let mut positions = Vec::new();
            for _ in 0..count {
                positions.push(buf.read_vec3()?);
            }

            // Ids and sizes follow as two separate runs.
            let mut ids = vec![None; count];
            let mut sizes = vec![None; count];
            if version >= V2 {
                for id in ids.iter_mut() {
                    *id = Some(buf.read_u32()?);
                }
                for size in sizes.iter_mut() {
                    *size = Some(buf.read_f32()?);
                }
            }

            Some(
                positions
                    .into_iter()
                    .zip(ids)
                    .zip(sizes)
                    .map(|((pos, id), size)| RigidBodyMarker { pos, id, size })
                    .collect(),
            )
        } else {
            None
        };

        let marker_error = if version >= V2 {
            Some(buf.read_f32()?)
        } else {
            None
        };

        let tracking_valid = if version >= V2_6 {
            let param = buf.read_u16()?;
            Some(param & 0x01 != 0)
        } else {
            None
        };

        Ok(Self {
            id,
            pos,
            rot,
            markers,
            tracking_valid,
            marker_error,
        })
    }
}

/// An ordered collection of rigid bodies tracked as one skeleton.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    /// Streaming id of the skeleton.
    pub id: u32,
    /// The skeleton's bones, in declaration order.
    pub rigid_bodies: Vec<RigidBody>,
}

impl FromPacket for Skeleton {
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: buf.read_u32()?,
            rigid_bodies: read_counted(buf, version)?,
        })
    }
}

bitflags! {
    /// Status bits attached to a labeled marker, on the wire from 2.6 on.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct MarkerFlags: u16 {
        /// The marker was not visible this frame.
        const OCCLUDED = 0x01;
        /// Position was solved from the point cloud.
        const POINT_CLOUD_SOLVED = 0x02;
        /// Position was solved from a model.
        const MODEL_SOLVED = 0x04;
        /// The marker belongs to a tracked model.
        const HAS_MODEL = 0x08;
        /// The marker is not associated with a model.
        const UNLABELED = 0x10;
        /// The marker is an actively-lit LED marker.
        const ACTIVE = 0x20;
    }
}

/// A single labeled 3-D point.
///
/// The packed id carries the owning model in its high 16 bits and the
/// per-model marker number in its low 16 bits.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LabeledMarker {
    /// Packed (model, marker) id.
    pub id: u32,
    /// Marker position.
    pub pos: Vec3,
    /// Marker size.
    pub size: f32,
    /// Status bits, absent before 2.6.
    pub params: Option<MarkerFlags>,
    /// Solver residual, absent before 3.0.
    pub residual: Option<f32>,
}

impl LabeledMarker {
    /// Id of the model this marker belongs to.
    pub fn model_id(&self) -> u16 {
        (self.id >> 16) as u16
    }

    /// Id of the marker within its model.
    pub fn marker_id(&self) -> u16 {
        (self.id & 0xffff) as u16
    }

    /// Whether the marker was occluded this frame.
    pub fn occluded(&self) -> bool {
        self.has_flag(MarkerFlags::OCCLUDED)
    }

    /// Whether the position came from the point-cloud solver.
    pub fn point_cloud_solved(&self) -> bool {
        self.has_flag(MarkerFlags::POINT_CLOUD_SOLVED)
    }

    /// Whether the position came from the model solver.
    pub fn model_solved(&self) -> bool {
        self.has_flag(MarkerFlags::MODEL_SOLVED)
    }

    /// Whether the marker belongs to a tracked model.
    pub fn has_model(&self) -> bool {
        self.has_flag(MarkerFlags::HAS_MODEL)
    }

    /// Whether the marker is unlabeled.
    pub fn unlabeled(&self) -> bool {
        self.has_flag(MarkerFlags::UNLABELED)
    }

    /// Whether the marker is an active LED marker.
    pub fn active(&self) -> bool {
        self.has_flag(MarkerFlags::ACTIVE)
    }

    fn has_flag(&self, flag: MarkerFlags) -> bool {
        self.params.is_some_and(|p| p.contains(flag))
    }
}

impl FromPacket for LabeledMarker {
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError> {
        let id = buf.read_u32()?;
        let pos = buf.read_vec3()?;
        let size = buf.read_f32()?;

        let params = if version >= V2_6 {
            Some(MarkerFlags::from_bits_retain(buf.read_u16()?))
        } else {
            None
        };

        let residual = if version >= V3 {
            Some(buf.read_f32()?)
        } else {
            None
        };

        Ok(Self {
            id,
            pos,
            size,
            params,
            residual,
        })
    }
}

/// One frame of samples from a force plate.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcePlate {
    /// Streaming id of the plate.
    pub id: u32,
    /// Per-channel sample arrays, each count-prefixed on the wire.
    pub channels: Vec<Vec<f32>>,
}

impl FromPacket for ForcePlate {
    fn read(buf: &mut PacketBuffer<'_>, _version: Version) -> Result<Self, ProtocolError> {
        let (id, channels) = read_channel_arrays(buf)?;
        Ok(Self { id, channels })
    }
}

/// One frame of samples from a peripheral device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Streaming id of the device.
    pub id: u32,
    /// Per-channel sample arrays, each count-prefixed on the wire.
    pub channels: Vec<Vec<f32>>,
}

impl FromPacket for Device {
    fn read(buf: &mut PacketBuffer<'_>, _version: Version) -> Result<Self, ProtocolError> {
        let (id, channels) = read_channel_arrays(buf)?;
        Ok(Self { id, channels })
    }
}

fn read_channel_arrays(
    buf: &mut PacketBuffer<'_>,
) -> Result<(u32, Vec<Vec<f32>>), ProtocolError> {
    let id = buf.read_u32()?;
    let channel_count = buf.read_u32()?;
    let mut channels = Vec::new();
    for _ in 0..channel_count {
        let sample_count = buf.read_u32()?;
        channels.push(buf.read_f32_array(sample_count as usize)?);
    }

    Ok((id, channels))
}

bitflags! {
    /// Frame status bits carried in the suffix.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct FrameParams: u16 {
        /// The server is recording a take.
        const RECORDING = 0x01;
        /// The set of actively tracked models changed this frame.
        const TRACKED_MODELS_CHANGED = 0x02;
    }
}

/// Fixed-width trailer of every data frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameSuffix {
    /// SMPTE timecode.
    pub timecode: u32,
    /// Sub-frame part of the timecode.
    pub timecode_sub: u32,
    /// Frame timestamp in seconds. Single precision on the wire before 2.7.
    pub timestamp: f64,
    /// High-resolution camera mid-exposure stamp, absent before 3.0.
    pub stamp_camera_mid_exposure: Option<u64>,
    /// High-resolution data-received stamp, absent before 3.0.
    pub stamp_data_received: Option<u64>,
    /// High-resolution transmit stamp, absent before 3.0.
    pub stamp_transmit: Option<u64>,
    /// Frame status bits.
    pub params: FrameParams,
}

impl FrameSuffix {
    /// Whether the server is recording a take.
    pub fn is_recording(&self) -> bool {
        self.params.contains(FrameParams::RECORDING)
    }

    /// Whether the set of actively tracked models changed this frame.
    pub fn tracked_models_changed(&self) -> bool {
        self.params.contains(FrameParams::TRACKED_MODELS_CHANGED)
    }
}

impl FromPacket for FrameSuffix {
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError> {
        let timecode = buf.read_u32()?;
        let timecode_sub = buf.read_u32()?;

        // Widened to double precision in 2.7.
        let timestamp = if version >= V2_7 {
            buf.read_f64()?
        } else {
            f64::from(buf.read_f32()?)
        };

        let (stamp_camera_mid_exposure, stamp_data_received, stamp_transmit) = if version >= V3 {
            (
                Some(buf.read_u64()?),
                Some(buf.read_u64()?),
                Some(buf.read_u64()?),
            )
        } else {
            (None, None, None)
        };

        let params = FrameParams::from_bits_retain(buf.read_u16()?);

        Ok(Self {
            timecode,
            timecode_sub,
            timestamp,
            stamp_camera_mid_exposure,
            stamp_data_received,
            stamp_transmit,
            params,
        })
    }
}

/// One complete frame of tracking data.
///
/// Sections whose minimum protocol version exceeds the wire version decode
/// to `None` rather than to an empty list: a 2.0 frame has no skeletons
/// section at all, while a 2.1 frame may carry zero skeletons.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    /// Frame header.
    pub prefix: FramePrefix,
    /// Per-model marker sets.
    pub marker_sets: Vec<MarkerSet>,
    /// Positions of markers not associated with a model.
    pub unlabeled_markers: Vec<Vec3>,
    /// Rigid body poses.
    pub rigid_bodies: Vec<RigidBody>,
    /// Skeleton poses, absent before 2.1.
    pub skeletons: Option<Vec<Skeleton>>,
    /// Labeled markers, absent before 2.3.
    pub labeled_markers: Option<Vec<LabeledMarker>>,
    /// Force plate samples, absent before 2.9.
    pub force_plates: Option<Vec<ForcePlate>>,
    /// Peripheral device samples, absent before 2.11.
    pub devices: Option<Vec<Device>>,
    /// Frame trailer.
    pub suffix: FrameSuffix,
}

impl DataFrame {
    /// Frame sequence number, from the prefix.
    pub fn frame_number(&self) -> u32 {
        self.prefix.frame_number
    }
}

impl FromPacket for DataFrame {
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError> {
        let prefix = FramePrefix::read(buf, version)?;
        let marker_sets = read_counted(buf, version)?;

        let unlabeled_count = buf.read_u32()?;
        let mut unlabeled_markers = Vec::new();
        for _ in 0..unlabeled_count {
            unlabeled_markers.push(buf.read_vec3()?);
        }

        let rigid_bodies = read_counted(buf, version)?;

        let skeletons = if version >= V2_1 {
            Some(read_counted(buf, version)?)
        } else {
            None
        };
        let labeled_markers = if version >= V2_3 {
            Some(read_counted(buf, version)?)
        } else {
            None
        };
        let force_plates = if version >= V2_9 {
            Some(read_counted(buf, version)?)
        } else {
            None
        };
        let devices = if version >= V2_11 {
            Some(read_counted(buf, version)?)
        } else {
            None
        };

        let suffix = FrameSuffix::read(buf, version)?;

        Ok(Self {
            prefix,
            marker_sets,
            unlabeled_markers,
            rigid_bodies,
            skeletons,
            labeled_markers,
            force_plates,
            devices,
            suffix,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::protocol::test_util::{decode_all, PacketBuilder};

    const V1: Version = Version::from_parts(&[1]);
    const V2_0: Version = Version::from_parts(&[2, 0]);
    const V3_0: Version = Version::from_parts(&[3, 0]);
    const V4_0: Version = Version::from_parts(&[4, 0]);

    #[test]
    fn marker_set_decodes_identically_at_every_version() {
        let data = PacketBuilder::new()
            .string("Hand")
            .u32(2)
            .vec3([1.0, 2.0, 3.0])
            .vec3([4.0, 5.0, 6.0])
            .build();

        let old: MarkerSet = decode_all(&data, V2_0);
        let new: MarkerSet = decode_all(&data, V4_0);

        assert_eq!(old, new);
        assert_eq!(old.model_name, "Hand");
        assert_eq!(old.positions, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }

    #[test]
    fn rigid_body_before_2_0_has_anonymous_markers() {
        let data = PacketBuilder::new()
            .u32(9)
            .vec3([0.0, 1.0, 0.0])
            .vec4([0.0, 0.0, 0.0, 1.0])
            .u32(1)
            .vec3([0.5, 0.5, 0.5])
            .build();

        let body: RigidBody = decode_all(&data, V1);

        assert_eq!(
            body.markers.as_deref(),
            Some(
                &[RigidBodyMarker {
                    pos: [0.5, 0.5, 0.5],
                    id: None,
                    size: None,
                }][..]
            )
        );
        assert_eq!(body.marker_error, None);
        assert_eq!(body.tracking_valid, None);
    }

    #[test]
    fn rigid_body_at_2_6_reads_marker_runs_and_params() {
        let data = PacketBuilder::new()
            .u32(9)
            .vec3([0.0, 1.0, 0.0])
            .vec4([0.0, 0.0, 0.0, 1.0])
            .u32(2)
            .vec3([0.1, 0.2, 0.3])
            .vec3([0.4, 0.5, 0.6])
            .u32(11)
            .u32(12)
            .f32(0.01)
            .f32(0.02)
            .f32(0.003) // marker error
            .u16(0x01) // tracking valid
            .build();

        let body: RigidBody = decode_all(&data, V2_6);

        let markers = body.markers.unwrap();
        assert_eq!(markers[0].id, Some(11));
        assert_eq!(markers[1].size, Some(0.02));
        assert_eq!(body.marker_error, Some(0.003));
        assert_eq!(body.tracking_valid, Some(true));
    }

    #[test]
    fn rigid_body_at_3_0_has_no_embedded_markers() {
        let data = PacketBuilder::new()
            .u32(7)
            .vec3([1.0, 2.0, 3.0])
            .vec4([0.0, 0.0, 0.0, 1.0])
            .f32(0.01)
            .u16(0x01)
            .build();

        let body: RigidBody = decode_all(&data, V3_0);

        assert_eq!(body.id, 7);
        assert_eq!(body.markers, None);
        assert_eq!(body.marker_error, Some(0.01));
        assert_eq!(body.tracking_valid, Some(true));
    }

    #[test]
    fn skeleton_nests_rigid_bodies() {
        let data = PacketBuilder::new()
            .u32(3)
            .u32(1)
            .u32(30)
            .vec3([0.0, 0.0, 0.0])
            .vec4([0.0, 0.0, 0.0, 1.0])
            .f32(0.0)
            .u16(0x00)
            .build();

        let skeleton: Skeleton = decode_all(&data, V3_0);

        assert_eq!(skeleton.id, 3);
        assert_eq!(skeleton.rigid_bodies.len(), 1);
        assert_eq!(skeleton.rigid_bodies[0].id, 30);
        assert_eq!(skeleton.rigid_bodies[0].tracking_valid, Some(false));
    }

    #[test]
    fn labeled_marker_unpacks_id_and_flags() {
        let data = PacketBuilder::new()
            .u32((2 << 16) | 5)
            .vec3([1.0, 1.0, 1.0])
            .f32(0.02)
            .u16(0x21)
            .f32(0.001)
            .build();

        let marker: LabeledMarker = decode_all(&data, V3_0);

        assert_eq!(marker.model_id(), 2);
        assert_eq!(marker.marker_id(), 5);
        assert!(marker.occluded());
        assert!(marker.active());
        assert!(!marker.point_cloud_solved());
        assert!(!marker.model_solved());
        assert!(!marker.has_model());
        assert!(!marker.unlabeled());
        assert_eq!(marker.residual, Some(0.001));
    }

    #[test]
    fn labeled_marker_at_2_3_has_no_params_or_residual() {
        let data = PacketBuilder::new()
            .u32(1)
            .vec3([0.0, 0.0, 0.0])
            .f32(0.01)
            .build();

        let marker: LabeledMarker = decode_all(&data, V2_3);

        assert_eq!(marker.params, None);
        assert_eq!(marker.residual, None);
        assert!(!marker.occluded());
    }

    #[test]
    fn force_plate_reads_count_prefixed_channels() {
        let data = PacketBuilder::new()
            .u32(4)
            .u32(2)
            .u32(3)
            .f32(1.0)
            .f32(2.0)
            .f32(3.0)
            .u32(1)
            .f32(9.0)
            .build();

        let plate: ForcePlate = decode_all(&data, V2_9);

        assert_eq!(plate.id, 4);
        assert_eq!(plate.channels, vec![vec![1.0, 2.0, 3.0], vec![9.0]]);
    }

    #[test]
    fn suffix_timestamp_is_single_precision_before_2_7() {
        let data = PacketBuilder::new()
            .u32(10)
            .u32(11)
            .f32(1.5)
            .u16(0x03)
            .build();

        let suffix: FrameSuffix = decode_all(&data, V2_6);

        assert_eq!(suffix.timestamp, 1.5);
        assert_eq!(suffix.stamp_transmit, None);
        assert!(suffix.is_recording());
        assert!(suffix.tracked_models_changed());
    }

    #[test]
    fn suffix_at_3_0_reads_double_timestamp_and_stamps() {
        let data = PacketBuilder::new()
            .u32(10)
            .u32(11)
            .f64(1.5)
            .u64(100)
            .u64(200)
            .u64(300)
            .u16(0x00)
            .build();

        let suffix: FrameSuffix = decode_all(&data, V3_0);

        assert_eq!(suffix.timestamp, 1.5);
        assert_eq!(suffix.stamp_camera_mid_exposure, Some(100));
        assert_eq!(suffix.stamp_data_received, Some(200));
        assert_eq!(suffix.stamp_transmit, Some(300));
        assert!(!suffix.is_recording());
    }

    #[test]
    fn data_frame_at_3_0_decodes_every_section() {
        let data = PacketBuilder::new()
            .u32(42) // frame number
            .u32(1) // marker sets
            .string("Hand")
            .u32(1)
            .vec3([1.0, 2.0, 3.0])
            .u32(1) // unlabeled markers
            .vec3([7.0, 8.0, 9.0])
            .u32(1) // rigid bodies
            .u32(7)
            .vec3([1.0, 2.0, 3.0])
            .vec4([0.0, 0.0, 0.0, 1.0])
            .f32(0.01)
            .u16(0x01)
            .u32(0) // skeletons
            .u32(0) // labeled markers
            .u32(0) // force plates
            .u32(0) // devices
            .u32(10) // suffix
            .u32(11)
            .f64(1.5)
            .u64(100)
            .u64(200)
            .u64(300)
            .u16(0x01)
            .build();

        let frame: DataFrame = decode_all(&data, V3_0);

        assert_eq!(frame.frame_number(), 42);
        assert_eq!(frame.marker_sets[0].model_name, "Hand");
        assert_eq!(frame.unlabeled_markers, vec![[7.0, 8.0, 9.0]]);
        assert_eq!(frame.rigid_bodies[0].id, 7);
        assert_eq!(frame.rigid_bodies[0].markers, None);
        assert_eq!(frame.rigid_bodies[0].tracking_valid, Some(true));
        assert_eq!(frame.skeletons, Some(vec![]));
        assert_eq!(frame.labeled_markers, Some(vec![]));
        assert_eq!(frame.force_plates, Some(vec![]));
        assert_eq!(frame.devices, Some(vec![]));
        assert_eq!(frame.suffix.timestamp, 1.5);
        assert!(frame.suffix.is_recording());
    }

    #[test]
    fn data_frame_at_2_0_skips_later_sections() {
        let data = PacketBuilder::new()
            .u32(1) // frame number
            .u32(0) // marker sets
            .u32(0) // unlabeled markers
            .u32(0) // rigid bodies
            .u32(10) // suffix
            .u32(11)
            .f32(0.5)
            .u16(0x00)
            .build();

        let frame: DataFrame = decode_all(&data, V2_0);

        assert_eq!(frame.skeletons, None);
        assert_eq!(frame.labeled_markers, None);
        assert_eq!(frame.force_plates, None);
        assert_eq!(frame.devices, None);
        assert_eq!(frame.suffix.timestamp, 0.5);
    }

    #[test]
    fn data_frame_at_2_1_has_an_empty_skeleton_section() {
        let data = PacketBuilder::new()
            .u32(1)
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(0) // skeletons present, zero entries
            .u32(10)
            .u32(11)
            .f32(0.5)
            .u16(0x00)
            .build();

        let frame: DataFrame = decode_all(&data, V2_1);

        assert_eq!(frame.skeletons, Some(vec![]));
        assert_eq!(frame.labeled_markers, None);
    }
}
