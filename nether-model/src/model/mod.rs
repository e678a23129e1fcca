//! The loaded model and everything it owns
//!
//! A [`ModelFile`] is an arena: every cross reference (node to mesh, channel
//! to sampler, sampler to timeline, texture wrapper to sampler) is an index
//! into one of its lists.

pub mod animation;
pub mod buffer;
pub mod camera;
pub mod collision;
pub mod material;
pub mod mesh;
pub mod node;
pub mod skin;

use bytemuck::Pod;
use glam::{IVec4, Mat4, Vec3, Vec4};

pub use animation::{
    Animation, AnimationChannel, AnimationPath, AnimationSampler, AnimationTimeType, Interpolation,
    TimeLine,
};
pub use buffer::{Accessor, AccessorRange, Buffer, BufferUsage, BufferView, ComponentType, ElementType};
pub use camera::{Camera, Projection};
pub use collision::{CollisionPolytope, ModelCollision, ModelTrace, TraceHeader, TraceLeaf, TraceNode};
pub use material::{
    AlphaMode, CompressedFormat, Material, ModelPrograms, ProgramHandle, Sampler, ShadingTechnique,
    TechniqueKind, Texture, TextureData, TextureHints, TextureRef, TextureWrapper,
};
pub use mesh::{BlendMode, Bounds, Mesh, ModelGeometry, RenderState, Surface, VertexAttribs};
pub use node::{Node, SubScene};
pub use skin::{MAX_JOINTS, Skin};

use crate::error::ModelError;

/// Procedural motion of a legacy joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JointAnimation {
    #[default]
    None,
    Rotate,
    Sway,
    Bob,
}

/// A procedurally animated joint from a legacy scene.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelJoint {
    pub index: usize,
    pub name: String,
    pub transform: Mat4,
    pub animation: JointAnimation,
    pub parameters: Vec3,
    pub time_offset: f32,
    pub time_scale: f32,
}

/// A named attachment point from a legacy scene.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTag {
    pub name: String,
    pub matrix: Mat4,
    pub joint_indices: IVec4,
    pub joint_weights: Vec4,
}

/// A fully validated model.
#[derive(Debug, Clone, Default)]
pub struct ModelFile {
    pub file_name: String,
    pub using_srgb_textures: bool,

    pub buffers: Vec<Buffer>,
    pub buffer_views: Vec<BufferView>,
    pub accessors: Vec<Accessor>,
    /// Document samplers followed by the default sampler
    pub samplers: Vec<Sampler>,
    pub textures: Vec<Texture>,
    pub texture_wrappers: Vec<TextureWrapper>,
    /// Document materials followed by the default material
    pub materials: Vec<Material>,
    pub meshes: Vec<Mesh>,
    pub cameras: Vec<Camera>,
    pub nodes: Vec<Node>,
    pub animations: Vec<Animation>,
    pub timelines: Vec<TimeLine>,
    pub skins: Vec<Skin>,
    pub sub_scenes: Vec<SubScene>,

    pub joints: Vec<ModelJoint>,
    pub tags: Vec<ModelTag>,
    pub collisions: ModelCollision,
    pub ground_collisions: ModelCollision,
    pub trace: Option<ModelTrace>,

    pub animation_start_time: f32,
    pub animation_end_time: f32,
}

fn find_named<'a, T>(items: &'a [T], name: &str, key: impl Fn(&T) -> &str) -> Option<&'a T> {
    items.iter().find(|item| key(item).eq_ignore_ascii_case(name))
}

impl ModelFile {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.meshes.iter().flat_map(|m| m.surfaces.iter())
    }

    pub fn find_named_surface(&self, name: &str) -> Option<&Surface> {
        self.surfaces().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn find_named_texture(&self, name: &str) -> Option<&Texture> {
        find_named(&self.textures, name, |t| t.name.as_str())
    }

    pub fn find_named_joint(&self, name: &str) -> Option<&ModelJoint> {
        find_named(&self.joints, name, |j| j.name.as_str())
    }

    pub fn find_named_tag(&self, name: &str) -> Option<&ModelTag> {
        find_named(&self.tags, name, |t| t.name.as_str())
    }

    /// Union of every surface's local bounds.
    pub fn bounds(&self) -> Bounds {
        self.surfaces()
            .fold(Bounds::EMPTY, |acc, s| acc.union(&s.bounds))
    }

    /// All surface positions in one list, with indices rebased onto it.
    pub fn collect_geometry(&self) -> ModelGeometry {
        let mut geometry = ModelGeometry::default();
        for surface in self.surfaces() {
            let base = geometry.positions.len() as u32;
            geometry.positions.extend_from_slice(&surface.attribs.positions);
            geometry
                .indices
                .extend(surface.indices.iter().map(|&i| base + u32::from(i)));
        }
        geometry
    }

    /// Bounds-checked typed copy of an accessor.
    pub fn read_accessor<T: Pod>(&self, index: usize) -> Result<Vec<T>, ModelError> {
        let accessor = self.accessors.get(index).ok_or_else(|| {
            ModelError::Bounds(format!(
                "accessor {} does not exist (count {})",
                index,
                self.accessors.len()
            ))
        })?;
        accessor.read(&self.buffer_views, &self.buffers)
    }

    /// The shared timeline behind a sampler.
    pub fn timeline_for(&self, sampler: &AnimationSampler) -> Option<&TimeLine> {
        sampler.timeline.and_then(|i| self.timelines.get(i))
    }

    pub fn visible_sub_scenes(&self) -> impl Iterator<Item = &SubScene> {
        self.sub_scenes.iter().filter(|s| s.visible)
    }

    /// Index of the sampler used by textures that name none.
    pub fn default_sampler_index(&self) -> Option<usize> {
        self.samplers.len().checked_sub(1)
    }

    /// Index of the material used by surfaces that name none.
    pub fn default_material_index(&self) -> Option<usize> {
        self.materials.len().checked_sub(1)
    }
}
