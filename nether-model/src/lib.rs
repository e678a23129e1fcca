//! Nether-Model: packaged 3D scene loader for Nethercore tools
//!
//! This crate loads a scene file into a fully validated, renderer-agnostic
//! [`ModelFile`]: buffers, accessors, textures, materials, meshes, cameras,
//! a node hierarchy, skins, animations and sub-scenes. It never touches the
//! GPU; surfaces carry the shading technique, program handle and render
//! state the upload layer needs.
//!
//! # Containers
//!
//! - **GLB** (`*.glb`): header, JSON chunk, BIN chunk
//! - **Packaged glTF** (`*.gltf.ovrscene`): zip holding one `.gltf`
//!   document, its `.bin` buffers and images
//! - **Legacy scene** (any other name): zip holding `models.json`, an
//!   optional `models.bin` payload and `.ktx`/`.pvr` textures
//!
//! # Failure model
//!
//! A load either returns a complete model or an error. Malformed containers,
//! out-of-range reads and missing shading programs stop the load at once.
//! Schema, reference and resource problems are collected across the whole
//! file and returned together as [`ModelError::Invalid`].
//!
//! # Usage
//!
//! ```no_run
//! use nether_model::{LoaderConfig, ModelPrograms, ProgramHandle, load_model};
//! use std::path::Path;
//!
//! let programs = ModelPrograms::single_texture(ProgramHandle(0));
//! let model = load_model(Path::new("room.glb"), &programs, &LoaderConfig::default())?;
//!
//! println!("Nodes: {}", model.nodes.len());
//! for surface in model.surfaces() {
//!     println!("  {} ({:?})", surface.name, surface.technique.kind());
//! }
//! # Ok::<(), nether_model::ModelError>(())
//! ```

pub mod config;
pub mod container;
pub mod error;
mod json;
pub mod legacy;
pub mod loader;
pub mod model;

pub use config::{GeometryLimits, LoaderConfig, MaterialParams};
pub use container::{Archive, ArchiveEntry, ContainerKind};
pub use error::{ErrorKind, ModelError, Problem};
pub use loader::{load_model, load_model_from_archive_entry, load_model_from_memory};
pub use model::{
    Accessor, Animation, AnimationChannel, AnimationPath, AnimationSampler, AnimationTimeType, BlendMode, Bounds, Buffer,
    BufferView, Camera, CollisionPolytope, Interpolation, JointAnimation, Material, Mesh, ModelCollision, ModelFile,
    ModelGeometry, ModelJoint, ModelPrograms, ModelTag, ModelTrace, Node, ProgramHandle, Projection, RenderState,
    Sampler, ShadingTechnique, Skin, SubScene, Surface, TechniqueKind, Texture, TextureData, TextureWrapper, TimeLine,
    VertexAttribs,
};
