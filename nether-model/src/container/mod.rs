//! Container formats a model can arrive in.

pub mod archive;
pub mod glb;

pub use archive::{Archive, ArchiveEntry};
pub use glb::GlbContainer;

/// Container shape, chosen from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Self-contained binary glTF
    Glb,
    /// Zip archive holding a `.gltf` document, `.bin` buffers and images
    PackagedGltf,
    /// Zip archive holding `models.json`, optional `models.bin` and textures
    LegacyScene,
}

impl ContainerKind {
    /// Pick the container shape by case-insensitive substring match.
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains(".glb") {
            ContainerKind::Glb
        } else if lower.contains(".gltf.ovrscene") {
            ContainerKind::PackagedGltf
        } else {
            ContainerKind::LegacyScene
        }
    }
}
