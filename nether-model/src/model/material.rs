//! Samplers, textures, materials and shading technique selection
//!
//! Every texture reference in a [`Material`] or [`ShadingTechnique`] is an
//! index into [`ModelFile::texture_wrappers`](crate::ModelFile). A wrapper
//! pairs a sampler with an optional texture; `None` means the renderer's
//! default texture.

use glam::{Vec3, Vec4};
use serde_json::Value;

use crate::config::MaterialParams;
use crate::error::{Diagnostics, ModelError};
use crate::json::{JsonExt, fixed_f32s};

// =============================================================================
// Samplers
// =============================================================================

pub const GL_NEAREST: u32 = 9728;
pub const GL_LINEAR: u32 = 9729;
pub const GL_NEAREST_MIPMAP_NEAREST: u32 = 9984;
pub const GL_LINEAR_MIPMAP_NEAREST: u32 = 9985;
pub const GL_NEAREST_MIPMAP_LINEAR: u32 = 9986;
pub const GL_LINEAR_MIPMAP_LINEAR: u32 = 9987;
pub const GL_CLAMP_TO_EDGE: u32 = 33071;
pub const GL_MIRRORED_REPEAT: u32 = 33648;
pub const GL_REPEAT: u32 = 10497;

pub const DEFAULT_SAMPLER_NAME: &str = "Default_Sampler";
pub const DEFAULT_MATERIAL_NAME: &str = "Default_Material";

const MAG_FILTERS: [u32; 2] = [GL_NEAREST, GL_LINEAR];
const MIN_FILTERS: [u32; 6] = [
    GL_NEAREST,
    GL_LINEAR,
    GL_NEAREST_MIPMAP_NEAREST,
    GL_LINEAR_MIPMAP_NEAREST,
    GL_NEAREST_MIPMAP_LINEAR,
    GL_LINEAR_MIPMAP_LINEAR,
];
const WRAP_MODES: [u32; 3] = [GL_CLAMP_TO_EDGE, GL_MIRRORED_REPEAT, GL_REPEAT];

/// Filtering and wrap modes, as GL enum values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sampler {
    pub name: String,
    pub mag_filter: u32,
    pub min_filter: u32,
    pub wrap_s: u32,
    pub wrap_t: u32,
}

impl Sampler {
    /// The sampler appended after every document's samplers.
    pub fn default_sampler() -> Self {
        Self {
            name: DEFAULT_SAMPLER_NAME.to_string(),
            mag_filter: GL_LINEAR,
            min_filter: GL_NEAREST_MIPMAP_LINEAR,
            wrap_s: GL_REPEAT,
            wrap_t: GL_REPEAT,
        }
    }
}

fn gl_enum(
    value: &Value,
    field: &str,
    default: u32,
    allowed: &[u32],
    owner: &str,
    diag: &mut Diagnostics,
) -> u32 {
    let raw = value.child_i64(field, i64::from(default));
    match u32::try_from(raw) {
        Ok(v) if allowed.contains(&v) => v,
        _ => {
            diag.schema(format!("invalid {field} {raw} in sampler '{owner}'"));
            default
        }
    }
}

pub(crate) fn load_sampler(value: &Value, diag: &mut Diagnostics) -> Sampler {
    let name = value.child_str("name").to_string();
    Sampler {
        mag_filter: gl_enum(value, "magFilter", GL_LINEAR, &MAG_FILTERS, &name, diag),
        min_filter: gl_enum(value, "minFilter", GL_NEAREST_MIPMAP_LINEAR, &MIN_FILTERS, &name, diag),
        wrap_s: gl_enum(value, "wrapS", GL_REPEAT, &WRAP_MODES, &name, diag),
        wrap_t: gl_enum(value, "wrapT", GL_REPEAT, &WRAP_MODES, &name, diag),
        name,
    }
}

// =============================================================================
// Textures
// =============================================================================

/// GPU container formats passed through undecoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressedFormat {
    Ktx,
    Pvr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextureData {
    Decoded(image::RgbaImage),
    Compressed { format: CompressedFormat, bytes: Vec<u8> },
    /// Missing or undecodable image; the renderer binds its default texture
    Placeholder,
}

/// Upload hints for the GPU layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextureHints {
    pub srgb: bool,
    pub clamp_to_edge: bool,
    pub anisotropy: Option<f32>,
    pub lod_clamp: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    /// Source name without its extension
    pub name: String,
    pub data: TextureData,
    pub hints: TextureHints,
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if !name[dot..].contains('/') => &name[..dot],
        _ => name,
    }
}

pub(crate) fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.as_bytes()[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

impl Texture {
    /// Build a texture from an encoded image.
    ///
    /// `.ktx` and `.pvr` sources are kept as-is; anything else goes through
    /// the image decoder. A decode failure yields a placeholder and a warning.
    pub fn from_encoded(source_name: &str, bytes: &[u8], params: &MaterialParams, file: &str) -> Self {
        let data = if bytes.is_empty() {
            TextureData::Placeholder
        } else if ends_with_ignore_case(source_name, ".ktx") {
            TextureData::Compressed {
                format: CompressedFormat::Ktx,
                bytes: bytes.to_vec(),
            }
        } else if ends_with_ignore_case(source_name, ".pvr") {
            TextureData::Compressed {
                format: CompressedFormat::Pvr,
                bytes: bytes.to_vec(),
            }
        } else {
            match image::load_from_memory(bytes) {
                Ok(img) => TextureData::Decoded(img.to_rgba8()),
                Err(e) => {
                    tracing::warn!(file = %file, texture = %source_name, "failed to decode image: {e}");
                    TextureData::Placeholder
                }
            }
        };

        Self {
            name: strip_extension(source_name).to_string(),
            data,
            hints: TextureHints {
                srgb: params.use_srgb_textures,
                clamp_to_edge: source_name.contains("_c."),
                anisotropy: None,
                lod_clamp: None,
            },
        }
    }

    pub fn placeholder(source_name: &str, params: &MaterialParams) -> Self {
        Self::from_encoded(source_name, &[], params, "")
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.data, TextureData::Placeholder)
    }
}

/// A sampler paired with an optional texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureWrapper {
    pub name: String,
    pub sampler: usize,
    pub image: Option<usize>,
}

/// Resolve a document texture entry. `default_sampler` is used when the
/// entry names none.
pub(crate) fn load_texture_wrapper(
    value: &Value,
    sampler_count: usize,
    default_sampler: usize,
    texture_count: usize,
    diag: &mut Diagnostics,
) -> TextureWrapper {
    let name = value.child_str("name").to_string();
    let sampler = match value.child("sampler") {
        Some(_) => diag
            .index(value.child_i64("sampler", -1), sampler_count, "texture sampler")
            .unwrap_or(default_sampler),
        None => default_sampler,
    };
    let image = match value.child("source") {
        Some(_) => diag.index(value.child_i64("source", -1), texture_count, "texture source"),
        None => None,
    };
    TextureWrapper { name, sampler, image }
}

// =============================================================================
// Materials
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Rendered exactly like [`AlphaMode::Blend`]
    Mask,
    Blend,
}

/// A reference to a texture wrapper plus the UV set it samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRef {
    pub wrapper: usize,
    pub tex_coord: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color_factor: Vec4,
    pub base_color_texture: Option<TextureRef>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub metallic_roughness_texture: Option<TextureRef>,
    pub normal_texture: Option<TextureRef>,
    pub normal_scale: f32,
    pub occlusion_texture: Option<TextureRef>,
    pub occlusion_strength: f32,
    pub emissive_texture: Option<TextureRef>,
    pub emissive_factor: Vec3,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_factor: Vec4::ONE,
            base_color_texture: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
            normal_texture: None,
            normal_scale: 1.0,
            occlusion_texture: None,
            occlusion_strength: 1.0,
            emissive_texture: None,
            emissive_factor: Vec3::ZERO,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
        }
    }
}

impl Material {
    /// The material appended after every document's materials.
    pub fn default_material() -> Self {
        Self {
            name: DEFAULT_MATERIAL_NAME.to_string(),
            ..Self::default()
        }
    }

    /// Whether the surface goes through the blended pass.
    pub fn is_blended(&self) -> bool {
        matches!(self.alpha_mode, AlphaMode::Mask | AlphaMode::Blend)
    }
}

fn texture_ref(
    value: Option<&Value>,
    wrapper_count: usize,
    slot: &str,
    diag: &mut Diagnostics,
) -> Option<TextureRef> {
    let info = value.filter(|v| v.is_object())?;
    let wrapper = diag.index(info.child_i64("index", -1), wrapper_count, slot)?;
    let tex_coord = u32::try_from(info.child_i64("texCoord", 0)).unwrap_or_else(|_| {
        diag.schema(format!("negative texCoord on {slot}"));
        0
    });
    Some(TextureRef { wrapper, tex_coord })
}

pub(crate) fn load_material(value: &Value, wrapper_count: usize, diag: &mut Diagnostics) -> Material {
    let mut material = Material {
        name: value.child_str("name").to_string(),
        ..Material::default()
    };

    if let Some(factor) = value.child("emissiveFactor") {
        match fixed_f32s::<3>(factor) {
            Some(f) => material.emissive_factor = Vec3::from_array(f),
            None => diag.schema(format!("emissiveFactor of material '{}' needs 3 items", material.name)),
        }
    }

    let alpha_mode = value.child_str_or("alphaMode", "OPAQUE");
    material.alpha_mode = if alpha_mode.eq_ignore_ascii_case("OPAQUE") {
        AlphaMode::Opaque
    } else if alpha_mode.eq_ignore_ascii_case("MASK") {
        tracing::warn!(
            file = %diag.file(),
            material = %material.name,
            "alpha mode MASK is rendered as BLEND"
        );
        AlphaMode::Mask
    } else if alpha_mode.eq_ignore_ascii_case("BLEND") {
        AlphaMode::Blend
    } else {
        diag.schema(format!("invalid alphaMode '{alpha_mode}' in material '{}'", material.name));
        AlphaMode::Opaque
    };
    material.alpha_cutoff = value.child_f32("alphaCutoff", 0.5);
    material.double_sided = value.child_bool("doubleSided", false);

    if let Some(pbr) = value.child("pbrMetallicRoughness").filter(|v| v.is_object()) {
        if let Some(factor) = pbr.child("baseColorFactor") {
            match fixed_f32s::<4>(factor) {
                Some(f) => material.base_color_factor = Vec4::from_array(f),
                None => diag.schema(format!("baseColorFactor of material '{}' needs 4 items", material.name)),
            }
        }
        material.base_color_texture =
            texture_ref(pbr.child("baseColorTexture"), wrapper_count, "baseColorTexture", diag);
        material.metallic_factor = pbr.child_f32("metallicFactor", 1.0);
        material.roughness_factor = pbr.child_f32("roughnessFactor", 1.0);
        material.metallic_roughness_texture = texture_ref(
            pbr.child("metallicRoughnessTexture"),
            wrapper_count,
            "metallicRoughnessTexture",
            diag,
        );
    }

    if let Some(normal) = value.child("normalTexture") {
        material.normal_texture = texture_ref(Some(normal), wrapper_count, "normalTexture", diag);
        material.normal_scale = normal.child_f32("scale", 1.0);
    }
    if let Some(occlusion) = value.child("occlusionTexture") {
        material.occlusion_texture =
            texture_ref(Some(occlusion), wrapper_count, "occlusionTexture", diag);
        material.occlusion_strength = occlusion.child_f32("strength", 1.0);
    }
    material.emissive_texture =
        texture_ref(value.child("emissiveTexture"), wrapper_count, "emissiveTexture", diag);

    material
}

// =============================================================================
// Shading techniques and programs
// =============================================================================

/// Shader family, without texture payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TechniqueKind {
    SingleTexture,
    VertexColor,
    LightMapped,
    ReflectionMapped,
    SimplePbr,
    BaseColorPbr,
    BaseColorEmissivePbr,
}

impl TechniqueKind {
    pub const ALL: [TechniqueKind; 7] = [
        TechniqueKind::SingleTexture,
        TechniqueKind::VertexColor,
        TechniqueKind::LightMapped,
        TechniqueKind::ReflectionMapped,
        TechniqueKind::SimplePbr,
        TechniqueKind::BaseColorPbr,
        TechniqueKind::BaseColorEmissivePbr,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    /// Whether the technique samples two textures in one pass.
    pub fn is_dual_texture(self) -> bool {
        matches!(
            self,
            TechniqueKind::LightMapped
                | TechniqueKind::ReflectionMapped
                | TechniqueKind::BaseColorEmissivePbr
        )
    }
}

/// The shading technique chosen for a surface, with the texture wrappers it
/// binds. `None` binds the default texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingTechnique {
    SingleTexture {
        diffuse: Option<usize>,
    },
    VertexColor,
    LightMapped {
        diffuse: usize,
        emissive: usize,
    },
    ReflectionMapped {
        diffuse: usize,
        emissive: usize,
        normal: usize,
        specular: usize,
        reflection: usize,
    },
    SimplePbr,
    BaseColorPbr {
        base_color: usize,
    },
    BaseColorEmissivePbr {
        base_color: usize,
        emissive: usize,
    },
}

impl ShadingTechnique {
    pub fn kind(&self) -> TechniqueKind {
        match self {
            ShadingTechnique::SingleTexture { .. } => TechniqueKind::SingleTexture,
            ShadingTechnique::VertexColor => TechniqueKind::VertexColor,
            ShadingTechnique::LightMapped { .. } => TechniqueKind::LightMapped,
            ShadingTechnique::ReflectionMapped { .. } => TechniqueKind::ReflectionMapped,
            ShadingTechnique::SimplePbr => TechniqueKind::SimplePbr,
            ShadingTechnique::BaseColorPbr { .. } => TechniqueKind::BaseColorPbr,
            ShadingTechnique::BaseColorEmissivePbr { .. } => TechniqueKind::BaseColorEmissivePbr,
        }
    }

    /// Technique for a glTF material.
    pub fn for_material(material: &Material) -> Self {
        match (material.base_color_texture, material.emissive_texture) {
            (Some(base), Some(emissive)) => ShadingTechnique::BaseColorEmissivePbr {
                base_color: base.wrapper,
                emissive: emissive.wrapper,
            },
            (Some(base), None) => ShadingTechnique::BaseColorPbr {
                base_color: base.wrapper,
            },
            (None, _) => ShadingTechnique::SimplePbr,
        }
    }

    /// Technique for a legacy surface from its already-validated texture slots.
    pub fn for_legacy(slots: &LegacyTextureSlots, has_vertex_colors: bool) -> Self {
        match (slots.diffuse, slots.emissive) {
            (Some(diffuse), Some(emissive)) => match (slots.normal, slots.specular, slots.reflection) {
                (Some(normal), Some(specular), Some(reflection)) => ShadingTechnique::ReflectionMapped {
                    diffuse,
                    emissive,
                    normal,
                    specular,
                    reflection,
                },
                _ => ShadingTechnique::LightMapped { diffuse, emissive },
            },
            (Some(diffuse), None) => ShadingTechnique::SingleTexture {
                diffuse: Some(diffuse),
            },
            (None, _) if has_vertex_colors => ShadingTechnique::VertexColor,
            (None, _) => ShadingTechnique::SingleTexture { diffuse: None },
        }
    }
}

/// Texture slots of a legacy surface material, each already range-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyTextureSlots {
    pub diffuse: Option<usize>,
    pub normal: Option<usize>,
    pub specular: Option<usize>,
    pub emissive: Option<usize>,
    pub reflection: Option<usize>,
}

/// Renderer-supplied program id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// Shading programs available to a load, one optional slot per technique
/// kind and skinning variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPrograms {
    /// `[unskinned, skinned]` per technique kind
    slots: [[Option<ProgramHandle>; 2]; 7],
}

impl ModelPrograms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one program for every technique.
    pub fn single_texture(program: ProgramHandle) -> Self {
        Self::single_and_dual(program, program)
    }

    /// Use `dual` for two-texture techniques and `single` for the rest.
    pub fn single_and_dual(single: ProgramHandle, dual: ProgramHandle) -> Self {
        let mut programs = Self::new();
        for kind in TechniqueKind::ALL {
            let program = if kind.is_dual_texture() { dual } else { single };
            programs = programs
                .with_program(kind, false, program)
                .with_program(kind, true, program);
        }
        programs
    }

    pub fn with_program(mut self, kind: TechniqueKind, skinned: bool, program: ProgramHandle) -> Self {
        self.slots[kind.slot()][usize::from(skinned)] = Some(program);
        self
    }

    pub fn program(&self, kind: TechniqueKind, skinned: bool) -> Option<ProgramHandle> {
        self.slots[kind.slot()][usize::from(skinned)]
    }

    /// Look up a program that a surface cannot render without.
    pub(crate) fn require(
        &self,
        kind: TechniqueKind,
        skinned: bool,
        surface: &str,
        file: &str,
    ) -> Result<ProgramHandle, ModelError> {
        self.program(kind, skinned).ok_or_else(|| {
            let message = format!(
                "no {} program for {:?} required by surface '{}'",
                if skinned { "skinned" } else { "unskinned" },
                kind,
                surface
            );
            tracing::error!(file = %file, "configuration violation: {message}");
            ModelError::Configuration(message)
        })
    }
}
