//! Legacy scene archives
//!
//! A legacy archive carries `models.json`, an optional `models.bin` payload
//! and `.ktx`/`.pvr` textures. Every array in `models.json` is dual-encoded:
//! it is read from the binary payload when enough bytes remain there, and
//! otherwise parsed from the number list in the document string.
//!
//! The whole scene becomes one mesh on one node in one visible sub-scene.

pub mod cursor;
pub mod text;

use glam::{IVec4, Mat4, Quat, Vec2, Vec3, Vec4};
use serde_json::Value;

pub use cursor::BinaryCursor;
pub use text::{ArraySource, TextArrayError, TextElement, parse_text_array, parse_text_list, read_dual_array};

use crate::config::LoaderConfig;
use crate::container::Archive;
use crate::error::{Diagnostics, ModelError, malformed};
use crate::json::JsonExt;
use crate::model::material::LegacyTextureSlots;
use crate::model::collision::TRACE_LEAF_TRIANGLES;
use crate::model::{
    BlendMode, Bounds, CollisionPolytope, JointAnimation, Material, Mesh, ModelCollision, ModelFile, ModelJoint,
    ModelPrograms, ModelTag, ModelTrace, Node, RenderState, Sampler, ShadingTechnique, SubScene, Surface, Texture,
    TextureWrapper, TraceHeader, TraceLeaf, TraceNode, VertexAttribs,
};

/// First word of `models.bin`.
pub const MODELS_BIN_MAGIC: u32 = 0x6272_766F;

pub const MODELS_JSON: &str = "models.json";
pub const MODELS_BIN: &str = "models.bin";

pub const DEFAULT_MODEL_NAME: &str = "DefaultModelName";
pub const DEFAULT_NODE_NAME: &str = "DefaultNodeName";
pub const DEFAULT_SCENE_NAME: &str = "DefaultSceneName";

const ANISOTROPY_DIFFUSE: f32 = 2.0;
const LOD_CLAMP_EMISSIVE: u32 = 1;

/// Load a legacy scene from its archive.
pub fn load_legacy_scene(
    file: &str,
    archive: &Archive<'_>,
    programs: &ModelPrograms,
    config: &LoaderConfig,
) -> Result<ModelFile, ModelError> {
    let mut model = ModelFile::new(file);
    model.using_srgb_textures = config.material.use_srgb_textures;

    let mut json = None;
    let mut bin = None;
    for entry in archive.entries() {
        if entry.name.eq_ignore_ascii_case(MODELS_JSON) {
            json = Some(entry);
        } else if entry.name.eq_ignore_ascii_case(MODELS_BIN) {
            bin = Some(entry);
        } else if entry.has_extension(".pvr") || entry.has_extension(".ktx") {
            model
                .textures
                .push(Texture::from_encoded(&entry.name, &entry.data, &config.material, file));
        } else {
            tracing::trace!(file = %file, entry = %entry.name, "ignoring archive entry");
        }
    }

    let Some(json) = json else {
        return Err(malformed(file, format!("archive has no {MODELS_JSON}")));
    };

    let mut cursor = match bin {
        Some(bin) => {
            let mut cursor = BinaryCursor::new(&bin.data);
            match cursor.read_u32() {
                Some(MODELS_BIN_MAGIC) => cursor,
                Some(magic) => return Err(malformed(file, format!("bad {MODELS_BIN} magic {magic:#010x}"))),
                None => return Err(malformed(file, format!("{MODELS_BIN} is too short for its magic"))),
            }
        }
        None => BinaryCursor::empty(),
    };

    let doc: Value = serde_json::from_slice(&json.data).inspect_err(|e| {
        tracing::error!(file = %file, "failed to parse {MODELS_JSON}: {e}");
    })?;
    if !doc.is_object() {
        return Err(malformed(file, format!("{MODELS_JSON} root is not an object")));
    }

    let mut diag = Diagnostics::new(file);
    let mut scene = LegacyScene {
        programs,
        config,
        cursor: &mut cursor,
        diag: &mut diag,
    };
    scene.build(&doc, &mut model)?;

    if !cursor.is_at_end() {
        tracing::warn!(file = %file, remaining = cursor.remaining(), "{MODELS_BIN} was not fully read");
    }
    diag.finish(model)
}

struct LegacyScene<'a, 'b> {
    programs: &'a ModelPrograms,
    config: &'a LoaderConfig,
    cursor: &'a mut BinaryCursor<'b>,
    diag: &'a mut Diagnostics,
}

impl LegacyScene<'_, '_> {
    fn build(&mut self, doc: &Value, model: &mut ModelFile) -> Result<(), ModelError> {
        model.samplers.push(Sampler::default_sampler());
        model.materials.push(Material::default_material());

        let mut node = Node::new(DEFAULT_NODE_NAME);
        node.mesh = Some(0);
        let mut mesh = Mesh {
            name: DEFAULT_MODEL_NAME.to_string(),
            ..Mesh::default()
        };

        if let Some(render_model) = doc.child("render_model").filter(|r| r.is_object()) {
            tracing::debug!(file = %self.diag.file(), "loading render model");
            if let Some(transform) = render_model.child("node").filter(|n| n.is_object()) {
                self.read_node_transform(transform, &mut node);
            }
            self.load_textures(render_model, model);
            self.load_joints(render_model, model);
            self.load_tags(render_model, model);
            if let Some(surfaces) = render_model.child_array("surfaces") {
                for value in surfaces.iter().filter(|s| s.is_object()) {
                    mesh.surfaces.push(self.load_surface(value, model.texture_wrappers.len())?);
                }
            }
        }

        if let Some(polytopes) = doc.child_array("collision_model") {
            tracing::debug!(file = %self.diag.file(), "loading collision model");
            model.collisions = self.load_collision(polytopes, "collision_model");
        }
        if let Some(polytopes) = doc.child_array("ground_collision_model") {
            tracing::debug!(file = %self.diag.file(), "loading ground collision model");
            model.ground_collisions = self.load_collision(polytopes, "ground_collision_model");
        }
        if let Some(raytrace) = doc.child("raytrace_model").filter(|r| r.is_object()) {
            tracing::debug!(file = %self.diag.file(), "loading ray-trace model");
            model.trace = Some(self.load_trace(raytrace)?);
        }

        node.update_local_transform();
        node.global_transform = node.local_transform;
        model.nodes.push(node);
        model.meshes.push(mesh);
        model.sub_scenes.push(SubScene {
            name: DEFAULT_SCENE_NAME.to_string(),
            roots: vec![0],
            visible: true,
        });
        Ok(())
    }

    /// Read a dual-encoded array; a malformed string is a schema problem.
    fn read<T: TextElement>(&mut self, value: &Value, field: &str, count: i64, owner: &str) -> Option<Vec<T>> {
        match read_dual_array::<T>(value.child_str(field), count, self.cursor) {
            Ok(Some((values, source))) => {
                tracing::trace!(field, ?source, count = values.len(), "read array");
                Some(values)
            }
            Ok(None) => None,
            Err(e) => {
                self.diag.schema(format!("{field} of {owner}: {e}"));
                None
            }
        }
    }

    /// Parse a text-only field; absent strings keep the default.
    fn parse<T: TextElement>(&mut self, value: &Value, field: &str, owner: &str) -> Option<T> {
        let text = value.child_str(field);
        if text.is_empty() {
            return None;
        }
        match parse_text_array::<T>(text, 1) {
            Ok(values) => values.first().copied(),
            Err(e) => {
                self.diag.schema(format!("{field} of {owner}: {e}"));
                None
            }
        }
    }

    fn read_node_transform(&mut self, value: &Value, node: &mut Node) {
        let owner = "render model node";
        if let Some(t) = self.read::<Vec3>(value, "translation", 1, owner) {
            node.translation = t[0];
        }
        if let Some(r) = self.read::<Vec4>(value, "rotation", 1, owner) {
            node.rotation = Quat::from_vec4(r[0]);
        }
        if let Some(s) = self.read::<Vec3>(value, "scale", 1, owner) {
            node.scale = s[0];
        }
    }

    /// Bind the declared textures to archive textures, one wrapper each.
    fn load_textures(&mut self, render_model: &Value, model: &mut ModelFile) {
        let Some(textures) = render_model.child_array("textures") else {
            return;
        };
        let params = &self.config.material;
        for value in textures.iter().filter(|t| t.is_object()) {
            let name = value.child_str("name");
            let image = match model.textures.iter().position(|t| t.name.eq_ignore_ascii_case(name)) {
                Some(index) => index,
                None => {
                    tracing::debug!(file = %self.diag.file(), texture = %name, "texture defaulted");
                    model.textures.push(Texture::placeholder(name, params));
                    model.textures.len() - 1
                }
            };

            let hints = &mut model.textures[image].hints;
            match value.child_str("usage") {
                "diffuse" if params.enable_diffuse_aniso => hints.anisotropy = Some(ANISOTROPY_DIFFUSE),
                "emissive" if params.enable_emissive_lod_clamp => hints.lod_clamp = Some(LOD_CLAMP_EMISSIVE),
                _ => {}
            }

            model.texture_wrappers.push(TextureWrapper {
                name: name.to_string(),
                sampler: 0,
                image: Some(image),
            });
        }
    }

    fn load_joints(&mut self, render_model: &Value, model: &mut ModelFile) {
        let Some(joints) = render_model.child_array("joints") else {
            return;
        };
        for value in joints.iter().filter(|j| j.is_object()) {
            let name = value.child_str("name").to_string();
            let owner = format!("joint '{name}'");
            let animation = match value.child_str("animation") {
                "rotate" => JointAnimation::Rotate,
                "sway" => JointAnimation::Sway,
                "bob" => JointAnimation::Bob,
                _ => JointAnimation::None,
            };
            model.joints.push(ModelJoint {
                index: model.joints.len(),
                transform: self.parse::<Mat4>(value, "transform", &owner).unwrap_or(Mat4::IDENTITY),
                animation,
                parameters: Vec3::new(
                    value.child_f32("parmX", 0.0),
                    value.child_f32("parmY", 0.0),
                    value.child_f32("parmZ", 0.0),
                ),
                time_offset: value.child_f32("timeOffset", 0.0),
                time_scale: value.child_f32("timeScale", 0.0),
                name,
            });
        }
    }

    fn load_tags(&mut self, render_model: &Value, model: &mut ModelFile) {
        let Some(tags) = render_model.child_array("tags") else {
            return;
        };
        for value in tags.iter().filter(|t| t.is_object()) {
            let name = value.child_str("name").to_string();
            let owner = format!("tag '{name}'");
            model.tags.push(ModelTag {
                matrix: self.parse::<Mat4>(value, "matrix", &owner).unwrap_or(Mat4::IDENTITY),
                joint_indices: self.parse::<IVec4>(value, "jointIndices", &owner).unwrap_or(IVec4::ZERO),
                joint_weights: self.parse::<Vec4>(value, "jointWeights", &owner).unwrap_or(Vec4::ZERO),
                name,
            });
        }
    }

    fn texture_slot(&mut self, material: &Value, slot: &str, wrapper_count: usize, surface: &str) -> Option<usize> {
        let index = material.child_i64(slot, -1);
        if index < 0 {
            return None;
        }
        let index = self.diag.index(index, wrapper_count, format!("{slot} texture of surface '{surface}'"))?;
        Some(index)
    }

    fn load_surface(&mut self, value: &Value, wrapper_count: usize) -> Result<Surface, ModelError> {
        let name = value
            .child_array("source")
            .map(|sources| sources.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(";"))
            .unwrap_or_default();
        tracing::trace!(surface = %name, "loading surface");

        let mut blend = BlendMode::Opaque;
        let mut slots = LegacyTextureSlots::default();
        if let Some(material) = value.child("material").filter(|m| m.is_object()) {
            blend = match material.child_str("type") {
                "perforated" | "transparent" => BlendMode::AlphaBlend,
                "additive" => BlendMode::Additive,
                _ => BlendMode::Opaque,
            };
            slots = LegacyTextureSlots {
                diffuse: self.texture_slot(material, "diffuse", wrapper_count, &name),
                normal: self.texture_slot(material, "normal", wrapper_count, &name),
                specular: self.texture_slot(material, "specular", wrapper_count, &name),
                emissive: self.texture_slot(material, "emissive", wrapper_count, &name),
                reflection: self.texture_slot(material, "reflection", wrapper_count, &name),
            };
        }

        let owner = format!("surface '{name}'");
        let declared_bounds = {
            let text = value.child_str("bounds");
            if text.is_empty() {
                None
            } else {
                match parse_text_array::<Vec3>(text, 2) {
                    Ok(corners) => Some(Bounds::new(corners[0], corners[1])),
                    Err(e) => {
                        self.diag.schema(format!("bounds of {owner}: {e}"));
                        None
                    }
                }
            }
        };

        let mut attribs = VertexAttribs::default();
        if let Some(vertices) = value.child("vertices").filter(|v| v.is_object()) {
            let count = self.clamped_count(vertices, "vertexCount", self.config.limits.max_vertices, &owner);
            attribs.positions = self.read(vertices, "position", count, &owner).unwrap_or_default();
            attribs.normals = self.read(vertices, "normal", count, &owner).unwrap_or_default();
            attribs.tangents = self.read(vertices, "tangent", count, &owner).unwrap_or_default();
            attribs.binormals = self.read(vertices, "binormal", count, &owner).unwrap_or_default();
            attribs.colors = self.read(vertices, "color", count, &owner).unwrap_or_default();
            attribs.uv0 = self.read::<Vec2>(vertices, "uv0", count, &owner).unwrap_or_default();
            attribs.uv1 = self.read::<Vec2>(vertices, "uv1", count, &owner).unwrap_or_default();
            attribs.joint_indices = self.read(vertices, "jointIndices", count, &owner).unwrap_or_default();
            attribs.joint_weights = self.read(vertices, "jointWeights", count, &owner).unwrap_or_default();
        }

        let mut indices = Vec::new();
        if let Some(triangles) = value.child("triangles").filter(|t| t.is_object()) {
            let count = self.clamped_count(triangles, "indexCount", self.config.limits.max_indices, &owner);
            indices = self.read::<u16>(triangles, "indices", count, &owner).unwrap_or_default();
        }
        crate::model::mesh::check_indices(&name, &indices, attribs.positions.len(), self.diag);

        let bounds = declared_bounds.unwrap_or_else(|| {
            let mut bounds = Bounds::EMPTY;
            attribs.positions.iter().for_each(|&p| bounds.add_point(p));
            bounds
        });

        let technique = ShadingTechnique::for_legacy(&slots, !attribs.colors.is_empty());
        let skinned = attribs.is_skinned();
        let program = self.programs.require(technique.kind(), skinned, &name, self.diag.file())?;

        Ok(Surface {
            render_state: RenderState::for_blend(blend, &self.config.material),
            name,
            material: 0,
            attribs,
            indices,
            bounds,
            technique,
            program,
            skinned,
        })
    }

    fn load_collision(&mut self, polytopes: &[Value], section: &str) -> ModelCollision {
        let polytopes = polytopes
            .iter()
            .map(|value| {
                let name = value.child_str("name").to_string();
                let planes = match parse_text_list::<Vec4>(value.child_str("planes")) {
                    Ok(planes) => planes,
                    Err(e) => {
                        self.diag.schema(format!("planes of {section} '{name}': {e}"));
                        Vec::new()
                    }
                };
                CollisionPolytope { name, planes }
            })
            .collect();
        ModelCollision { polytopes }
    }

    /// Read the ray-trace model. Any inconsistency is fatal: the kd-tree is
    /// walked without bounds checks later on.
    fn load_trace(&mut self, value: &Value) -> Result<ModelTrace, ModelError> {
        let file = self.diag.file().to_string();
        let count = |field: &str| {
            let declared = value.child_i64(field, 0);
            usize::try_from(declared)
                .map_err(|_| malformed(&file, format!("raytrace_model {field} {declared} is negative")))
        };
        let header = TraceHeader {
            vertices: count("numVertices")?,
            uvs: count("numUvs")?,
            indices: count("numIndices")?,
            nodes: count("numNodes")?,
            leafs: count("numLeafs")?,
            overflow: count("numOverflow")?,
        };

        let mut trace = ModelTrace {
            header,
            ..ModelTrace::default()
        };
        let bounds = value.child_str("bounds");
        if !bounds.is_empty() {
            let corners = trace_text::<Vec3>(&file, bounds, 2, "bounds")?;
            trace.bounds = Bounds::new(corners[0], corners[1]);
        }

        trace.vertices = self.trace_array(&file, value, "vertices", header.vertices)?;
        trace.uvs = self.trace_array(&file, value, "uvs", header.uvs)?;
        trace.indices = self.trace_array(&file, value, "indices", header.indices)?;
        trace.nodes = match self.cursor.read_array::<TraceNode>(header.nodes) {
            Some(nodes) => nodes,
            None => trace_nodes(&file, value)?,
        };
        trace.leafs = match self.cursor.read_array::<TraceLeaf>(header.leafs) {
            Some(leafs) => leafs,
            None => trace_leafs(&file, value)?,
        };
        trace.overflow = self.trace_array(&file, value, "overflow", header.overflow)?;

        trace
            .validate()
            .map_err(|e| malformed(&file, format!("invalid raytrace_model: {e}")))?;
        tracing::debug!(
            file = %file,
            triangles = trace.triangle_count(),
            nodes = trace.nodes.len(),
            "ray-trace model loaded"
        );
        Ok(trace)
    }

    fn trace_array<T: TextElement>(
        &mut self,
        file: &str,
        value: &Value,
        field: &str,
        count: usize,
    ) -> Result<Vec<T>, ModelError> {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        match read_dual_array::<T>(value.child_str(field), count, self.cursor) {
            Ok(Some((values, _))) => Ok(values),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(malformed(file, format!("raytrace_model {field}: {e}"))),
        }
    }

    fn clamped_count(&mut self, value: &Value, field: &str, limit: usize, owner: &str) -> i64 {
        let count = value.child_i64(field, 0);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        if count > limit {
            tracing::warn!(file = %self.diag.file(), "{owner} {field} {count} clamped to {limit}");
            limit
        } else {
            count
        }
    }
}

fn trace_text<T: TextElement>(file: &str, text: &str, count: usize, field: &str) -> Result<Vec<T>, ModelError> {
    parse_text_array(text, count).map_err(|e| malformed(file, format!("raytrace_model {field}: {e}")))
}

fn trace_nodes(file: &str, value: &Value) -> Result<Vec<TraceNode>, ModelError> {
    let Some(nodes) = value.child_array("nodes") else {
        return Ok(Vec::new());
    };
    nodes
        .iter()
        .map(|node| -> Result<TraceNode, ModelError> {
            let data = node.child_i64("data", 0);
            let data = u32::try_from(data)
                .map_err(|_| malformed(file, format!("raytrace_model node data {data} is out of range")))?;
            Ok(TraceNode {
                data,
                dist: node.child_f32("dist", 0.0),
            })
        })
        .collect()
}

fn trace_leafs(file: &str, value: &Value) -> Result<Vec<TraceLeaf>, ModelError> {
    let Some(leafs) = value.child_array("leafs") else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(leafs.len());
    for leaf in leafs {
        let mut parsed = TraceLeaf::default();
        let triangles = leaf.child_str("triangles");
        if !triangles.is_empty() {
            let values = trace_text::<i32>(file, triangles, TRACE_LEAF_TRIANGLES, "leaf triangles")?;
            parsed.triangles.copy_from_slice(&values);
        }
        let ropes = leaf.child_str("ropes");
        if !ropes.is_empty() {
            let values = trace_text::<i32>(file, ropes, parsed.ropes.len(), "leaf ropes")?;
            parsed.ropes.copy_from_slice(&values);
        }
        let bounds = leaf.child_str("bounds");
        if !bounds.is_empty() {
            let corners = trace_text::<Vec3>(file, bounds, 2, "leaf bounds")?;
            parsed.min = corners[0];
            parsed.max = corners[1];
        }
        out.push(parsed);
    }
    Ok(out)
}
