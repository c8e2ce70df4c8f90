//! Face instance records and their GPU wire layout.

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3, Vec4};

/// Host-side description of one renderable face instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceInstance {
    /// World position of the face anchor
    pub position: Vec3,
    /// Orientation
    pub rotation: Quat,
    /// Face extent: width, height, 1.0
    pub scale: Vec3,
    /// Which of the six directions the face points
    pub face_direction: u32,
    /// UV rectangle: min U, min V, max U, max V
    pub uv: Vec4,
    /// Texture array layer
    pub texture_layer: u32,
}

/// The GPU-side layout, a hard contract with the shader.
///
/// Little-endian, every field 16-byte aligned, 80 bytes total with the
/// trailing padding zeroed. Field order must never change.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C, align(16))]
pub struct FaceInstanceData {
    /// xyz plus 1.0
    pub position: Vec4,
    /// Quaternion
    pub rotation: Vec4,
    /// width, height, 1.0, face_direction
    pub scale: Vec4,
    /// min U, min V, max U, max V
    pub uv: Vec4,
    /// Texture array layer
    pub texture_layer: u32,
    /// Zeroed tail padding
    pub _pad: [u32; 3],
}

impl From<&FaceInstance> for FaceInstanceData {
    fn from(face: &FaceInstance) -> Self {
        Self {
            position: face.position.extend(1.0),
            rotation: Vec4::new(
                face.rotation.x,
                face.rotation.y,
                face.rotation.z,
                face.rotation.w,
            ),
            scale: face.scale.extend(face.face_direction as f32),
            uv: face.uv,
            texture_layer: face.texture_layer,
            _pad: [0; 3],
        }
    }
}
