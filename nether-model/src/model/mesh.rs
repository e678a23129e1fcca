//! Meshes, surfaces and vertex data

use bytemuck::Pod;
use glam::{IVec4, Vec2, Vec3, Vec4};
use serde_json::Value;

use super::buffer::{Accessor, Buffer, BufferView, ComponentType, ElementType};
use super::material::{Material, ModelPrograms, ProgramHandle, ShadingTechnique};
use crate::config::{LoaderConfig, MaterialParams};
use crate::error::{Diagnostics, ModelError};
use crate::json::{JsonExt, value_f32};

/// glTF primitive mode for triangle lists.
pub const MODE_TRIANGLES: i64 = 4;

/// Per-vertex attribute arrays. Every non-empty array has one entry per
/// position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexAttribs {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec3>,
    pub binormals: Vec<Vec3>,
    pub colors: Vec<Vec4>,
    pub uv0: Vec<Vec2>,
    pub uv1: Vec<Vec2>,
    pub joint_indices: Vec<IVec4>,
    pub joint_weights: Vec<Vec4>,
}

impl VertexAttribs {
    /// One joint index and one joint weight vector per position.
    pub fn is_skinned(&self) -> bool {
        !self.positions.is_empty()
            && self.joint_indices.len() == self.positions.len()
            && self.joint_weights.len() == self.positions.len()
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    /// Inverted box that any point expands.
    pub const EMPTY: Bounds = Bounds {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn add_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    /// src alpha, one minus src alpha
    AlphaBlend,
    /// one, one
    Additive,
}

/// Fixed-function state a surface is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderState {
    pub blend: BlendMode,
    pub depth_write: bool,
    pub cull_back_faces: bool,
    pub polygon_offset: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend: BlendMode::Opaque,
            depth_write: true,
            cull_back_faces: true,
            polygon_offset: false,
        }
    }
}

impl RenderState {
    /// State for a surface using a document material.
    pub fn for_material(material: &Material, params: &MaterialParams) -> Self {
        let mut state = Self {
            cull_back_faces: !material.double_sided,
            polygon_offset: params.polygon_offset,
            ..Self::default()
        };
        if material.is_blended() || params.transparent {
            state.blend = BlendMode::AlphaBlend;
            state.depth_write = false;
        }
        state
    }

    /// State for a legacy surface with the given blend mode.
    pub fn for_blend(blend: BlendMode, params: &MaterialParams) -> Self {
        let blend = match blend {
            BlendMode::Opaque if params.transparent => BlendMode::AlphaBlend,
            other => other,
        };
        Self {
            blend,
            depth_write: blend == BlendMode::Opaque,
            cull_back_faces: true,
            polygon_offset: params.polygon_offset,
        }
    }
}

/// A drawable piece of a mesh (glTF primitive).
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub name: String,
    /// Index into the model's materials
    pub material: usize,
    pub attribs: VertexAttribs,
    pub indices: Vec<u16>,
    pub bounds: Bounds,
    pub technique: ShadingTechnique,
    pub program: ProgramHandle,
    pub skinned: bool,
    pub render_state: RenderState,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub name: String,
    pub surfaces: Vec<Surface>,
    /// Morph target weights
    pub weights: Vec<f32>,
}

/// Positions and rebased triangle indices of every surface in a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelGeometry {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

/// Fail the surface with a resource problem when it exceeds the engine limits.
pub(crate) fn check_limits(
    surface: &str,
    vertices: usize,
    indices: usize,
    config: &LoaderConfig,
    diag: &mut Diagnostics,
) {
    if vertices > config.limits.max_vertices {
        diag.resource(format!(
            "surface '{}' has {} vertices (max {})",
            surface, vertices, config.limits.max_vertices
        ));
    }
    if indices > config.limits.max_indices {
        diag.resource(format!(
            "surface '{}' has {} indices (max {})",
            surface, indices, config.limits.max_indices
        ));
    }
}

/// Record a reference problem for the first index past the vertex count.
pub(crate) fn check_indices(surface: &str, indices: &[u16], vertex_count: usize, diag: &mut Diagnostics) {
    if let Some(bad) = indices.iter().find(|&&i| usize::from(i) >= vertex_count) {
        diag.reference(format!(
            "surface '{surface}' index {bad} is out of range for {vertex_count} vertices"
        ));
    }
}

/// Builds glTF meshes from already-resolved accessors and materials.
pub(crate) struct MeshBuilder<'a> {
    pub buffers: &'a [Buffer],
    pub views: &'a [BufferView],
    pub accessors: &'a [Accessor],
    pub materials: &'a [Material],
    pub default_material: usize,
    pub programs: &'a ModelPrograms,
    pub config: &'a LoaderConfig,
}

impl MeshBuilder<'_> {
    pub fn build_mesh(&self, value: &Value, diag: &mut Diagnostics) -> Result<Mesh, ModelError> {
        let mut mesh = Mesh {
            name: value.child_str("name").to_string(),
            ..Mesh::default()
        };
        if let Some(weights) = value.child_array("weights") {
            mesh.weights = weights.iter().map(|w| value_f32(w, 0.0)).collect();
        }

        let Some(primitives) = value.child_array("primitives") else {
            diag.schema(format!("mesh '{}' has no primitives", mesh.name));
            return Ok(mesh);
        };
        for (index, primitive) in primitives.iter().enumerate() {
            let name = format!("{}_{}", mesh.name, index);
            mesh.surfaces.push(self.build_surface(primitive, name, diag)?);
        }
        Ok(mesh)
    }

    fn build_surface(&self, value: &Value, name: String, diag: &mut Diagnostics) -> Result<Surface, ModelError> {
        let material = match value.child("material") {
            Some(_) => diag
                .index(value.child_i64("material", -1), self.materials.len(), "material")
                .unwrap_or(self.default_material),
            None => {
                tracing::trace!(surface = %name, "using default material");
                self.default_material
            }
        };

        let mode = value.child_i64("mode", MODE_TRIANGLES);
        if mode != MODE_TRIANGLES {
            diag.schema(format!("surface '{name}' uses primitive mode {mode}; only triangles are supported"));
        }

        let mut attribs = VertexAttribs::default();
        let mut bounds = Bounds::EMPTY;
        match value.child("attributes").filter(|a| a.is_object()) {
            None => diag.schema(format!("surface '{name}' has no attributes")),
            Some(attributes) => {
                match attributes.child("POSITION") {
                    None => diag.schema(format!("surface '{name}' has no POSITION attribute")),
                    Some(_) => {
                        let index = attributes.child_i64("POSITION", -1);
                        attribs.positions =
                            self.attribute(index, "POSITION", ElementType::Vec3, None, diag)?;
                        if let Some(accessor) = usize::try_from(index).ok().and_then(|i| self.accessors.get(i)) {
                            match accessor.float_range() {
                                Some((min, max)) => {
                                    bounds.add_point(Vec3::new(min[0], min[1], min[2]));
                                    bounds.add_point(Vec3::new(max[0], max[1], max[2]));
                                }
                                None => diag.schema(format!("surface '{name}' POSITION accessor has no float min/max")),
                            }
                        }
                    }
                }

                let count = Some(attribs.positions.len());
                let optional = |field: &str| attributes.child(field).map(|_| attributes.child_i64(field, -1));
                if let Some(i) = optional("NORMAL") {
                    attribs.normals = self.attribute(i, "NORMAL", ElementType::Vec3, count, diag)?;
                }
                if let Some(i) = optional("TANGENT") {
                    attribs.tangents = self.attribute(i, "TANGENT", ElementType::Vec3, count, diag)?;
                }
                if let Some(i) = optional("BINORMAL") {
                    attribs.binormals = self.attribute(i, "BINORMAL", ElementType::Vec3, count, diag)?;
                }
                if let Some(i) = optional("COLOR") {
                    attribs.colors = self.attribute(i, "COLOR", ElementType::Vec4, count, diag)?;
                }
                if let Some(i) = optional("TEXCOORD_0") {
                    attribs.uv0 = self.attribute(i, "TEXCOORD_0", ElementType::Vec2, count, diag)?;
                }
                if let Some(i) = optional("TEXCOORD_1") {
                    attribs.uv1 = self.attribute(i, "TEXCOORD_1", ElementType::Vec2, count, diag)?;
                }
                if let Some(i) = optional("WEIGHTS_0") {
                    attribs.joint_weights = self.attribute(i, "WEIGHTS_0", ElementType::Vec4, count, diag)?;
                }
                if let Some(i) = optional("JOINTS_0") {
                    attribs.joint_indices = self.joint_indices(i, attribs.positions.len(), diag)?;
                }
            }
        }

        let indices = match value.child("indices") {
            None => {
                diag.schema(format!("surface '{name}' has no indices"));
                Vec::new()
            }
            Some(_) => self.indices(value.child_i64("indices", -1), &name, diag)?,
        };

        check_indices(&name, &indices, attribs.positions.len(), diag);
        check_limits(&name, attribs.positions.len(), indices.len(), self.config, diag);

        let default_material = Material::default_material();
        let material_def = self.materials.get(material).unwrap_or(&default_material);
        let technique = ShadingTechnique::for_material(material_def);
        let skinned = attribs.is_skinned();
        let program = self.programs.require(technique.kind(), skinned, &name, diag.file())?;

        Ok(Surface {
            render_state: RenderState::for_material(material_def, &self.config.material),
            name,
            material,
            attribs,
            indices,
            bounds,
            technique,
            program,
            skinned,
        })
    }

    /// Check a float attribute accessor and read it. Problems are recorded
    /// and yield an empty array; only bounds violations are returned.
    fn attribute<T: Pod>(
        &self,
        index: i64,
        semantic: &str,
        element_type: ElementType,
        count: Option<usize>,
        diag: &mut Diagnostics,
    ) -> Result<Vec<T>, ModelError> {
        let Some(accessor) = self.checked_accessor(index, semantic, element_type, count, diag) else {
            return Ok(Vec::new());
        };
        if accessor.component_type != ComponentType::Float {
            diag.schema(format!(
                "{} accessor '{}' has componentType {}, expected FLOAT",
                semantic,
                accessor.name,
                accessor.component_type.gl()
            ));
            return Ok(Vec::new());
        }
        accessor.read(self.views, self.buffers)
    }

    fn checked_accessor(
        &self,
        index: i64,
        semantic: &str,
        element_type: ElementType,
        count: Option<usize>,
        diag: &mut Diagnostics,
    ) -> Option<&Accessor> {
        let accessor = &self.accessors[diag.index(index, self.accessors.len(), semantic)?];
        let mut ok = true;
        if accessor.element_type != element_type {
            diag.schema(format!(
                "{} accessor '{}' is {:?}, expected {:?}",
                semantic, accessor.name, accessor.element_type, element_type
            ));
            ok = false;
        }
        if let Some(count) = count.filter(|&c| c != accessor.count) {
            diag.schema(format!(
                "{} accessor '{}' has {} elements, expected {}",
                semantic, accessor.name, accessor.count, count
            ));
            ok = false;
        }
        ok.then_some(accessor)
    }

    fn joint_indices(&self, index: i64, count: usize, diag: &mut Diagnostics) -> Result<Vec<IVec4>, ModelError> {
        let Some(accessor) = self.checked_accessor(index, "JOINTS_0", ElementType::Vec4, Some(count), diag) else {
            return Ok(Vec::new());
        };
        let joints = match accessor.component_type {
            ComponentType::UnsignedShort => accessor
                .read::<[u16; 4]>(self.views, self.buffers)?
                .into_iter()
                .map(|j| IVec4::from_array(j.map(i32::from)))
                .collect(),
            ComponentType::UnsignedByte => accessor
                .read::<[u8; 4]>(self.views, self.buffers)?
                .into_iter()
                .map(|j| IVec4::from_array(j.map(i32::from)))
                .collect(),
            // Some exporters write joint indices as floats.
            ComponentType::Float => accessor
                .read::<Vec4>(self.views, self.buffers)?
                .into_iter()
                .map(|j| j.as_ivec4())
                .collect(),
            other => {
                diag.schema(format!(
                    "JOINTS_0 accessor '{}' has unsupported componentType {}",
                    accessor.name,
                    other.gl()
                ));
                Vec::new()
            }
        };
        Ok(joints)
    }

    fn indices(&self, index: i64, surface: &str, diag: &mut Diagnostics) -> Result<Vec<u16>, ModelError> {
        let Some(accessor) = self.checked_accessor(index, "indices", ElementType::Scalar, None, diag) else {
            return Ok(Vec::new());
        };
        if accessor.component_type != ComponentType::UnsignedShort {
            diag.schema(format!(
                "surface '{}' indices use componentType {}; only UNSIGNED_SHORT is supported",
                surface,
                accessor.component_type.gl()
            ));
            return Ok(Vec::new());
        }
        accessor.read(self.views, self.buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::buffer::{AccessorRange, BufferUsage};
    use crate::model::material::{AlphaMode, TechniqueKind};
    use serde_json::json;

    struct Fixture {
        buffers: Vec<Buffer>,
        views: Vec<BufferView>,
        accessors: Vec<Accessor>,
        materials: Vec<Material>,
        programs: ModelPrograms,
        config: LoaderConfig,
    }

    impl Fixture {
        /// One triangle: positions (accessor 0), u16 indices (accessor 1),
        /// u8 joints (accessor 2) and float weights (accessor 3).
        fn triangle() -> Self {
            let mut bytes: Vec<u8> = Vec::new();
            bytes.extend_from_slice(bytemuck::cast_slice(&[
                0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0,
            ]));
            bytes.extend_from_slice(bytemuck::cast_slice(&[0u16, 1, 2, 0]));
            bytes.extend_from_slice(&[0u8, 1, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]);
            bytes.extend_from_slice(bytemuck::cast_slice(&[1.0f32; 12]));

            let view = |byte_offset, byte_length| BufferView {
                name: String::new(),
                buffer: 0,
                byte_offset,
                byte_length,
                byte_stride: 0,
                usage: BufferUsage::Generic,
            };
            let accessor = |buffer_view, element_type, component_type, count| Accessor {
                name: String::new(),
                buffer_view,
                byte_offset: 0,
                element_type,
                component_type,
                count,
                normalized: false,
                range: None,
            };

            let mut positions = accessor(0, ElementType::Vec3, ComponentType::Float, 3);
            positions.range = Some(AccessorRange::Float {
                min: vec![0.0, 0.0, 0.0],
                max: vec![1.0, 1.0, 0.0],
            });

            Self {
                buffers: vec![Buffer::new("bin", bytes)],
                views: vec![view(0, 36), view(36, 6), view(44, 12), view(56, 48)],
                accessors: vec![
                    positions,
                    accessor(1, ElementType::Scalar, ComponentType::UnsignedShort, 3),
                    accessor(2, ElementType::Vec4, ComponentType::UnsignedByte, 3),
                    accessor(3, ElementType::Vec4, ComponentType::Float, 3),
                ],
                materials: vec![Material::default_material()],
                programs: ModelPrograms::single_texture(ProgramHandle(7)),
                config: LoaderConfig::default(),
            }
        }

        fn builder(&self) -> MeshBuilder<'_> {
            MeshBuilder {
                buffers: &self.buffers,
                views: &self.views,
                accessors: &self.accessors,
                materials: &self.materials,
                default_material: self.materials.len() - 1,
                programs: &self.programs,
                config: &self.config,
            }
        }
    }

    #[test]
    fn test_build_triangle() {
        let fixture = Fixture::triangle();
        let mut diag = Diagnostics::new("test");
        let mesh = fixture
            .builder()
            .build_mesh(
                &json!({
                    "name": "tri",
                    "weights": [0.25],
                    "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }]
                }),
                &mut diag,
            )
            .unwrap();
        assert!(diag.is_loaded());
        assert_eq!(mesh.weights, vec![0.25]);

        let surface = &mesh.surfaces[0];
        assert_eq!(surface.name, "tri_0");
        assert_eq!(surface.indices, vec![0, 1, 2]);
        assert_eq!(surface.attribs.positions[1], Vec3::X);
        assert_eq!(surface.bounds, Bounds::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));
        assert_eq!(surface.technique.kind(), TechniqueKind::SimplePbr);
        assert_eq!(surface.program, ProgramHandle(7));
        assert!(!surface.skinned);
        assert_eq!(surface.render_state, RenderState::default());
    }

    #[test]
    fn test_build_skinned_surface() {
        let fixture = Fixture::triangle();
        let mut diag = Diagnostics::new("test");
        let mesh = fixture
            .builder()
            .build_mesh(
                &json!({
                    "primitives": [{
                        "attributes": { "POSITION": 0, "JOINTS_0": 2, "WEIGHTS_0": 3 },
                        "indices": 1
                    }]
                }),
                &mut diag,
            )
            .unwrap();
        assert!(diag.is_loaded());
        let surface = &mesh.surfaces[0];
        assert!(surface.skinned);
        assert_eq!(surface.attribs.joint_indices[2], IVec4::new(2, 0, 0, 0));
    }

    #[test]
    fn test_surface_problems_are_recorded() {
        let fixture = Fixture::triangle();
        let mut diag = Diagnostics::new("test");
        fixture
            .builder()
            .build_mesh(
                &json!({
                    "primitives": [{
                        "mode": 1,
                        "attributes": { "POSITION": 0, "NORMAL": 1 },
                        "indices": 0
                    }]
                }),
                &mut diag,
            )
            .unwrap();
        // mode, NORMAL type, indices type
        assert_eq!(diag.finish(()).unwrap_err().problems().len(), 3);
    }

    #[test]
    fn test_missing_program_is_fatal() {
        let mut fixture = Fixture::triangle();
        fixture.programs = ModelPrograms::new();
        let mut diag = Diagnostics::new("test");
        let err = fixture
            .builder()
            .build_mesh(
                &json!({ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }),
                &mut diag,
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
    }

    #[test]
    fn test_vertex_limit() {
        let mut fixture = Fixture::triangle();
        fixture.config.limits.max_vertices = 2;
        let mut diag = Diagnostics::new("test");
        fixture
            .builder()
            .build_mesh(
                &json!({ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }),
                &mut diag,
            )
            .unwrap();
        let err = diag.finish(()).unwrap_err();
        assert!(err.has_kind(crate::ErrorKind::Resource));
    }

    #[test]
    fn test_render_state() {
        let params = MaterialParams::default();
        let material = Material {
            alpha_mode: AlphaMode::Mask,
            double_sided: true,
            ..Material::default()
        };
        let state = RenderState::for_material(&material, &params);
        assert_eq!(state.blend, BlendMode::AlphaBlend);
        assert!(!state.depth_write);
        assert!(!state.cull_back_faces);

        let additive = RenderState::for_blend(BlendMode::Additive, &params);
        assert_eq!(additive.blend, BlendMode::Additive);
        assert!(!additive.depth_write);
    }

    #[test]
    fn test_bounds() {
        let mut bounds = Bounds::EMPTY;
        assert!(bounds.is_empty());
        bounds.add_point(Vec3::new(1.0, -1.0, 2.0));
        bounds.add_point(Vec3::new(-1.0, 1.0, 0.0));
        assert_eq!(bounds.center(), Vec3::new(0.0, 0.0, 1.0));
        let merged = bounds.union(&Bounds::new(Vec3::ZERO, Vec3::splat(3.0)));
        assert_eq!(merged.max, Vec3::splat(3.0));
        assert_eq!(merged.min, Vec3::new(-1.0, -1.0, 0.0));
    }
}
