//! Model loading entry points and the glTF scene assembler
//!
//! Loading runs in a fixed phase order. Buffers, buffer views and images
//! depend on the container; everything after the asset check reads only the
//! document and what earlier phases produced:
//!
//! ```text
//! buffers -> bufferViews -> images -> asset -> accessors
//!   -> samplers -> textures -> materials -> meshes -> cameras
//!   -> nodes -> animations -> skins -> scenes
//! ```
//!
//! Schema, reference and resource problems are collected and the remaining
//! phases still run, so a single load reports as much as it can. Nothing is
//! returned to the caller unless every phase came through clean.

use std::path::Path;

use serde_json::Value;

use crate::config::LoaderConfig;
use crate::container::{Archive, ContainerKind, GlbContainer};
use crate::error::{Diagnostics, ModelError, bounds_violation, malformed};
use crate::json::JsonExt;
use crate::legacy;
use crate::model::animation::{AnimationContext, TimeLines};
use crate::model::buffer::{load_accessor, load_buffer_view};
use crate::model::camera::load_camera;
use crate::model::material::{ends_with_ignore_case, load_material, load_sampler, load_texture_wrapper};
use crate::model::mesh::MeshBuilder;
use crate::model::node::{check_skin_refs, link_children, load_node, load_scene, update_global_transforms};
use crate::model::skin::load_skin;
use crate::model::{Buffer, Material, ModelFile, ModelPrograms, Sampler, Texture};

/// Buffer name used for the BIN chunk when the document gives none.
pub const GLB_BUFFER_NAME: &str = "glB_Buffer";

/// Load a model file from disk.
///
/// The container format is chosen from the file name (see
/// [`ContainerKind::from_file_name`]).
pub fn load_model(path: &Path, programs: &ModelPrograms, config: &LoaderConfig) -> Result<ModelFile, ModelError> {
    let bytes = std::fs::read(path)?;
    load_model_from_memory(&path.to_string_lossy(), &bytes, programs, config)
}

/// Load a model from an in-memory copy of its file.
///
/// `file_name` selects the container format and is used in diagnostics.
pub fn load_model_from_memory(
    file_name: &str,
    bytes: &[u8],
    programs: &ModelPrograms,
    config: &LoaderConfig,
) -> Result<ModelFile, ModelError> {
    let kind = ContainerKind::from_file_name(file_name);
    tracing::debug!(file = %file_name, ?kind, bytes = bytes.len(), "loading model");

    let model = match kind {
        ContainerKind::Glb => {
            let glb = GlbContainer::parse(bytes, file_name)?;
            let doc = parse_document(glb.json, file_name)?;
            let source = DataSource::Glb { bin: glb.bin };
            GltfLoader::new(file_name, &doc, programs, config).load(&source)?
        }
        ContainerKind::PackagedGltf => {
            let archive = Archive::from_bytes(bytes, file_name)?;
            load_packaged_gltf(file_name, &archive, programs, config)?
        }
        ContainerKind::LegacyScene => {
            let archive = Archive::from_bytes(bytes, file_name)?;
            legacy::load_legacy_scene(file_name, &archive, programs, config)?
        }
    };

    log_summary(&model);
    Ok(model)
}

/// Load a model stored as one entry of an already opened archive.
pub fn load_model_from_archive_entry(
    archive: &Archive<'_>,
    entry_name: &str,
    programs: &ModelPrograms,
    config: &LoaderConfig,
) -> Result<ModelFile, ModelError> {
    let entry = archive
        .find(entry_name)
        .ok_or_else(|| malformed(entry_name, format!("archive has no entry '{entry_name}'")))?;
    load_model_from_memory(&entry.name, &entry.data, programs, config)
}

fn parse_document(json: &[u8], file: &str) -> Result<Value, ModelError> {
    let doc: Value = serde_json::from_slice(json).inspect_err(|e| {
        tracing::error!(file = %file, "failed to parse document: {e}");
    })?;
    if !doc.is_object() {
        return Err(malformed(file, "document root is not an object"));
    }
    Ok(doc)
}

fn load_packaged_gltf(
    file: &str,
    archive: &Archive<'_>,
    programs: &ModelPrograms,
    config: &LoaderConfig,
) -> Result<ModelFile, ModelError> {
    let mut documents = archive.entries().iter().filter(|e| e.has_extension(".gltf"));
    let Some(entry) = documents.next() else {
        return Err(malformed(file, "archive has no .gltf entry"));
    };
    for extra in documents {
        tracing::warn!(file = %file, entry = %extra.name, "ignoring additional .gltf entry");
    }
    tracing::debug!(file = %file, entry = %entry.name, "using document");

    let doc = parse_document(&entry.data, file)?;
    GltfLoader::new(file, &doc, programs, config).load(&DataSource::Archive(archive))
}

fn log_summary(model: &ModelFile) {
    tracing::info!(
        file = %model.file_name,
        buffers = model.buffers.len(),
        buffer_views = model.buffer_views.len(),
        accessors = model.accessors.len(),
        textures = model.textures.len(),
        texture_wrappers = model.texture_wrappers.len(),
        materials = model.materials.len(),
        meshes = model.meshes.len(),
        cameras = model.cameras.len(),
        nodes = model.nodes.len(),
        animations = model.animations.len(),
        timelines = model.timelines.len(),
        skins = model.skins.len(),
        sub_scenes = model.sub_scenes.len(),
        "model loaded"
    );
}

/// Where buffer and image bytes come from.
enum DataSource<'a> {
    /// The BIN chunk of a GLB file
    Glb { bin: &'a [u8] },
    /// Entries of a packaged glTF archive, addressed by uri
    Archive(&'a Archive<'a>),
}

/// One glTF load in progress.
struct GltfLoader<'a> {
    doc: &'a Value,
    programs: &'a ModelPrograms,
    config: &'a LoaderConfig,
    diag: Diagnostics,
    model: ModelFile,
}

impl<'a> GltfLoader<'a> {
    fn new(file: &str, doc: &'a Value, programs: &'a ModelPrograms, config: &'a LoaderConfig) -> Self {
        let mut model = ModelFile::new(file);
        model.using_srgb_textures = config.material.use_srgb_textures;
        Self {
            doc,
            programs,
            config,
            diag: Diagnostics::new(file),
            model,
        }
    }

    /// Array child of the document root; empty when absent.
    fn section(&self, name: &str) -> &'a [Value] {
        self.doc.child_array(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn load(mut self, source: &DataSource<'_>) -> Result<ModelFile, ModelError> {
        match source {
            DataSource::Glb { bin } => self.load_glb_buffers(bin)?,
            DataSource::Archive(archive) => self.load_archive_buffers(archive)?,
        }
        self.load_buffer_views()?;
        match source {
            DataSource::Glb { .. } => self.load_glb_images(),
            DataSource::Archive(archive) => self.load_archive_images(archive),
        }
        self.check_asset();
        self.load_accessors()?;

        // Later phases read through buffer views and accessors; with a broken
        // data layer they would only report knock-on failures.
        if !self.diag.is_loaded() {
            return self.diag.finish(self.model);
        }

        self.load_samplers();
        self.load_textures();
        self.load_materials();
        self.load_meshes()?;
        self.load_cameras();
        self.load_nodes();
        self.load_animations()?;
        self.load_skins()?;
        self.load_scenes();

        self.diag.finish(self.model)
    }

    fn load_glb_buffers(&mut self, bin: &[u8]) -> Result<(), ModelError> {
        tracing::debug!("loading buffers");
        let buffers = self.section("buffers");
        if buffers.len() > 1 {
            self.diag
                .schema(format!("GLB declares {} buffers, at most one is supported", buffers.len()));
        }
        let Some(value) = buffers.first() else {
            return Ok(());
        };

        let uri = value.child_str("uri");
        if !uri.is_empty() {
            self.diag.schema(format!("GLB buffer has uri '{uri}'; only the BIN chunk is supported"));
        }
        let byte_length = self.buffer_byte_length(value);
        if byte_length > bin.len() {
            return Err(bounds_violation(
                self.diag.file(),
                format!("buffer byteLength {} exceeds the {} byte BIN chunk", byte_length, bin.len()),
            ));
        }

        let name = match value.child_str("name") {
            "" if uri.is_empty() => GLB_BUFFER_NAME,
            "" => uri,
            name => name,
        };
        self.model.buffers.push(Buffer::new(name, bin[..byte_length].to_vec()));
        Ok(())
    }

    fn load_archive_buffers(&mut self, archive: &Archive<'_>) -> Result<(), ModelError> {
        tracing::debug!("loading buffers");
        for value in self.section("buffers") {
            let uri = value.child_str("uri");
            if !ends_with_ignore_case(uri, ".bin") {
                self.diag
                    .schema(format!("buffer uri '{uri}' is not a .bin file; only .bin buffers are supported"));
                continue;
            }
            let Some(entry) = archive.find(uri) else {
                return Err(malformed(self.diag.file(), format!("buffer '{uri}' is missing from the archive")));
            };

            let byte_length = self.buffer_byte_length(value);
            if byte_length > entry.data.len() {
                return Err(bounds_violation(
                    self.diag.file(),
                    format!(
                        "buffer '{}' byteLength {} exceeds its {} byte entry",
                        uri,
                        byte_length,
                        entry.data.len()
                    ),
                ));
            }

            let name = match value.child_str("name") {
                "" => uri,
                name => name,
            };
            self.model.buffers.push(Buffer::new(name, entry.data[..byte_length].to_vec()));
        }
        Ok(())
    }

    fn buffer_byte_length(&mut self, value: &Value) -> usize {
        if value.child("byteLength").is_none() {
            self.diag.schema("buffer has no byteLength");
        }
        let length = value.child_i64("byteLength", 0);
        usize::try_from(length).unwrap_or_else(|_| {
            self.diag.schema(format!("negative buffer byteLength {length}"));
            0
        })
    }

    fn load_buffer_views(&mut self) -> Result<(), ModelError> {
        tracing::debug!("loading buffer views");
        for value in self.section("bufferViews") {
            let view = load_buffer_view(value, &self.model.buffers, &mut self.diag)?;
            self.model.buffer_views.push(view);
        }
        Ok(())
    }

    fn load_glb_images(&mut self) {
        tracing::debug!("loading images");
        let params = &self.config.material;
        for (index, value) in self.section("images").iter().enumerate() {
            let name = match value.child_str("name") {
                "" => format!("image_{index}"),
                name => name.to_string(),
            };
            let bytes = usize::try_from(value.child_i64("bufferView", -1))
                .ok()
                .and_then(|i| self.model.buffer_views.get(i))
                .and_then(|view| {
                    let buffer = self.model.buffers.get(view.buffer)?;
                    buffer.data().get(view.byte_offset..view.byte_offset.checked_add(view.byte_length)?)
                });
            let texture = match bytes {
                Some(bytes) => Texture::from_encoded(&name, bytes, params, self.diag.file()),
                None => {
                    tracing::warn!(file = %self.diag.file(), image = %name, "image has no usable bufferView, using default texture");
                    Texture::placeholder(&name, params)
                }
            };
            self.model.textures.push(texture);
        }
    }

    fn load_archive_images(&mut self, archive: &Archive<'_>) {
        tracing::debug!("loading images");
        let params = &self.config.material;
        for (index, value) in self.section("images").iter().enumerate() {
            if value.child("bufferView").is_some() {
                tracing::warn!(file = %self.diag.file(), image = index, "images in buffer views are not supported in archives, using default texture");
                self.model.textures.push(Texture::placeholder(value.child_str("name"), params));
                continue;
            }

            let uri = value.child_str("uri");
            if !ends_with_ignore_case(uri, ".ktx") {
                tracing::warn!(file = %self.diag.file(), image = %uri, "image is not a .ktx container");
            }
            let texture = match archive.find(uri) {
                Some(entry) => Texture::from_encoded(uri, &entry.data, params, self.diag.file()),
                None => {
                    tracing::warn!(file = %self.diag.file(), image = %uri, "image is missing from the archive, using default texture");
                    Texture::placeholder(uri, params)
                }
            };
            self.model.textures.push(texture);
        }
    }

    fn check_asset(&mut self) {
        let Some(asset) = self.doc.child("asset").filter(|a| a.is_object()) else {
            self.diag.schema("document has no asset");
            return;
        };
        let version = asset.child_str("version");
        let min_version = asset.child_str("minVersion");
        if !version.eq_ignore_ascii_case("2.0") && !min_version.eq_ignore_ascii_case("2.0") {
            self.diag
                .schema(format!("unsupported asset version '{version}', only 2.0 is supported"));
        }
    }

    fn load_accessors(&mut self) -> Result<(), ModelError> {
        tracing::debug!("loading accessors");
        for value in self.section("accessors") {
            let accessor = load_accessor(value, &self.model.buffer_views, &mut self.diag)?;
            self.model.accessors.push(accessor);
        }
        Ok(())
    }

    fn load_samplers(&mut self) {
        tracing::debug!("loading samplers");
        for value in self.section("samplers") {
            let sampler = load_sampler(value, &mut self.diag);
            self.model.samplers.push(sampler);
        }
        self.model.samplers.push(Sampler::default_sampler());
    }

    fn load_textures(&mut self) {
        tracing::debug!("loading textures");
        let default_sampler = self.model.samplers.len() - 1;
        for value in self.section("textures") {
            let wrapper = load_texture_wrapper(
                value,
                default_sampler,
                default_sampler,
                self.model.textures.len(),
                &mut self.diag,
            );
            self.model.texture_wrappers.push(wrapper);
        }
    }

    fn load_materials(&mut self) {
        tracing::debug!("loading materials");
        for value in self.section("materials") {
            let material = load_material(value, self.model.texture_wrappers.len(), &mut self.diag);
            self.model.materials.push(material);
        }
        self.model.materials.push(Material::default_material());
    }

    fn load_meshes(&mut self) -> Result<(), ModelError> {
        tracing::debug!("loading meshes");
        let builder = MeshBuilder {
            buffers: &self.model.buffers,
            views: &self.model.buffer_views,
            accessors: &self.model.accessors,
            materials: &self.model.materials,
            default_material: self.model.materials.len() - 1,
            programs: self.programs,
            config: self.config,
        };
        let mut meshes = Vec::new();
        for value in self.section("meshes") {
            meshes.push(builder.build_mesh(value, &mut self.diag)?);
        }
        self.model.meshes = meshes;
        Ok(())
    }

    fn load_cameras(&mut self) {
        tracing::debug!("loading cameras");
        for value in self.section("cameras") {
            let camera = load_camera(value, &mut self.diag);
            self.model.cameras.push(camera);
        }
    }

    fn load_nodes(&mut self) {
        tracing::debug!("loading nodes");
        let mut raw_children = Vec::new();
        for value in self.section("nodes") {
            let (node, children) = load_node(
                value,
                self.model.meshes.len(),
                self.model.cameras.len(),
                &mut self.diag,
            );
            self.model.nodes.push(node);
            raw_children.push(children);
        }
        link_children(&mut self.model.nodes, &raw_children, &mut self.diag);
    }

    fn load_animations(&mut self) -> Result<(), ModelError> {
        tracing::debug!("loading animations");
        let context = AnimationContext {
            accessors: &self.model.accessors,
            views: &self.model.buffer_views,
            buffers: &self.model.buffers,
            node_count: self.model.nodes.len(),
        };
        let mut timelines = TimeLines::default();
        let mut animations = Vec::new();
        for value in self.section("animations") {
            animations.push(context.load_animation(value, &mut timelines, &mut self.diag)?);
        }

        let (start, end) = timelines.time_domain();
        self.model.animations = animations;
        self.model.timelines = timelines.timelines;
        self.model.animation_start_time = start;
        self.model.animation_end_time = end;
        Ok(())
    }

    fn load_skins(&mut self) -> Result<(), ModelError> {
        tracing::debug!("loading skins");
        for value in self.section("skins") {
            let skin = load_skin(
                value,
                self.model.nodes.len(),
                &self.model.accessors,
                &self.model.buffer_views,
                &self.model.buffers,
                &mut self.diag,
            )?;
            self.model.skins.push(skin);
        }
        check_skin_refs(&mut self.model.nodes, self.model.skins.len(), &mut self.diag);
        Ok(())
    }

    fn load_scenes(&mut self) {
        tracing::debug!("loading scenes");
        for value in self.section("scenes") {
            let scene = load_scene(value, self.model.nodes.len(), &mut self.diag);
            self.model.sub_scenes.push(scene);
        }

        let roots: Vec<usize> = self
            .model
            .sub_scenes
            .iter()
            .flat_map(|s| s.roots.iter().copied())
            .collect();
        update_global_transforms(&mut self.model.nodes, &roots);

        if self.doc.child("scene").is_some() {
            let index = self.doc.child_i64("scene", -1);
            if let Some(scene) = self.diag.index(index, self.model.sub_scenes.len(), "default scene") {
                self.model.sub_scenes[scene].visible = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::model::ProgramHandle;
    use serde_json::json;

    fn programs() -> ModelPrograms {
        ModelPrograms::single_texture(ProgramHandle(1))
    }

    fn load_doc(doc: &Value, bin: &[u8]) -> Result<ModelFile, ModelError> {
        let config = LoaderConfig::default();
        let programs = programs();
        GltfLoader::new("test.glb", doc, &programs, &config).load(&DataSource::Glb { bin })
    }

    fn asset() -> Value {
        json!({ "version": "2.0" })
    }

    #[test]
    fn test_empty_document_gets_defaults() {
        let model = load_doc(&json!({ "asset": asset() }), &[]).unwrap();
        assert_eq!(model.samplers.len(), 1);
        assert_eq!(model.materials.len(), 1);
        assert_eq!(model.default_material_index(), Some(0));
        assert!(model.buffers.is_empty());
    }

    #[test]
    fn test_min_version_is_accepted() {
        let doc = json!({ "asset": { "version": "3.0", "minVersion": "2.0" } });
        assert!(load_doc(&doc, &[]).is_ok());

        let err = load_doc(&json!({ "asset": { "version": "1.0" } }), &[]).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Schema));
        assert_eq!(load_doc(&json!({}), &[]).unwrap_err().kind(), Some(ErrorKind::Schema));
    }

    #[test]
    fn test_glb_buffer_rules() {
        let bin = [0u8; 16];
        let model = load_doc(&json!({ "asset": asset(), "buffers": [{ "byteLength": 12 }] }), &bin).unwrap();
        assert_eq!(model.buffers[0].name, GLB_BUFFER_NAME);
        assert_eq!(model.buffers[0].byte_length(), 12);

        let err = load_doc(&json!({ "asset": asset(), "buffers": [{ "byteLength": 17 }] }), &bin).unwrap_err();
        assert!(matches!(err, ModelError::Bounds(_)));

        let doc = json!({ "asset": asset(), "buffers": [{ "byteLength": 4, "uri": "a.bin" }, { "byteLength": 4 }] });
        let err = load_doc(&doc, &bin).unwrap_err();
        assert_eq!(err.problems().len(), 2);
    }

    #[test]
    fn test_default_scene_is_visible() {
        let doc = json!({
            "asset": asset(),
            "nodes": [{ "translation": [0, 1, 0], "children": [1] }, { "translation": [2, 0, 0] }],
            "scenes": [{ "name": "a", "nodes": [0] }, { "name": "b", "nodes": [1] }],
            "scene": 0
        });
        let model = load_doc(&doc, &[]).unwrap();
        assert!(model.sub_scenes[0].visible);
        assert!(!model.sub_scenes[1].visible);
        assert_eq!(model.nodes[1].parent, Some(0));
        assert_eq!(model.nodes[1].global_transform.w_axis.truncate(), glam::Vec3::new(2.0, 1.0, 0.0));

        let doc = json!({ "asset": asset(), "scenes": [], "scene": 3 });
        assert_eq!(load_doc(&doc, &[]).unwrap_err().kind(), Some(ErrorKind::Reference));
    }

    #[test]
    fn test_broken_data_layer_stops_early() {
        let doc = json!({
            "asset": asset(),
            "bufferViews": [{ "buffer": 4, "byteLength": 4 }],
            "nodes": [{ "mesh": 9 }]
        });
        let err = load_doc(&doc, &[]).unwrap_err();
        // the node's dangling mesh is never looked at
        assert_eq!(err.problems().len(), 1);
        assert_eq!(err.kind(), Some(ErrorKind::Reference));
    }

    #[test]
    fn test_archive_entry_missing() {
        let archive = Archive::default();
        let err = load_model_from_archive_entry(&archive, "scene.glb", &programs(), &LoaderConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MalformedContainer));
    }

    #[test]
    fn test_document_must_be_object() {
        assert!(matches!(parse_document(b"[1, 2]", "x"), Err(ModelError::MalformedContainer(_))));
        assert!(matches!(parse_document(b"{ nope", "x"), Err(ModelError::Json(_))));
    }
}
