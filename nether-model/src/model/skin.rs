//! Skins and their inverse bind matrices
//!
//! A skin names the nodes that act as its joints. The joint count is capped
//! at [`MAX_JOINTS`], the size of the skinning uniform storage.

use glam::Mat4;
use serde_json::Value;

use super::buffer::{Accessor, Buffer, BufferView, ComponentType, ElementType};
use crate::error::{Diagnostics, ModelError};
use crate::json::JsonExt;

/// Joint capacity of the skinning uniform storage.
pub const MAX_JOINTS: usize = 96;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Skin {
    pub name: String,
    pub skeleton_root: Option<usize>,
    /// Node index per joint
    pub joints: Vec<usize>,
    pub inverse_bind_matrices_accessor: Option<usize>,
    /// One per joint when an accessor is present, otherwise empty
    pub inverse_bind_matrices: Vec<Mat4>,
}

pub(crate) fn load_skin(
    value: &Value,
    node_count: usize,
    accessors: &[Accessor],
    views: &[BufferView],
    buffers: &[Buffer],
    diag: &mut Diagnostics,
) -> Result<Skin, ModelError> {
    let mut skin = Skin {
        name: value.child_str("name").to_string(),
        ..Skin::default()
    };

    if value.child("skeleton").is_some() {
        skin.skeleton_root = diag.index(value.child_i64("skeleton", -1), node_count, "skin skeleton");
    }

    match value.child_array("joints") {
        None => diag.schema(format!("skin '{}' has no joints", skin.name)),
        Some(joints) => {
            for joint in joints {
                let index = joint.as_i64().unwrap_or(-1);
                if let Some(node) = diag.index(index, node_count, "skin joint") {
                    skin.joints.push(node);
                }
            }
            if joints.len() > MAX_JOINTS {
                diag.resource(format!(
                    "skin '{}' has {} joints, only {} are supported",
                    skin.name,
                    joints.len(),
                    MAX_JOINTS
                ));
            }
        }
    }

    if value.child("inverseBindMatrices").is_some() {
        let index = value.child_i64("inverseBindMatrices", -1);
        if let Some(i) = diag.index(index, accessors.len(), "inverseBindMatrices accessor") {
            let accessor = &accessors[i];
            skin.inverse_bind_matrices_accessor = Some(i);
            if accessor.element_type != ElementType::Mat4 || accessor.component_type != ComponentType::Float {
                diag.schema(format!(
                    "inverseBindMatrices accessor '{}' of skin '{}' is not MAT4 FLOAT",
                    accessor.name, skin.name
                ));
            } else if accessor.count < skin.joints.len() {
                diag.schema(format!(
                    "skin '{}' has {} joints but only {} inverse bind matrices",
                    skin.name,
                    skin.joints.len(),
                    accessor.count
                ));
            } else {
                // Column-major on disk, which is also glam's layout.
                skin.inverse_bind_matrices = accessor
                    .read::<[f32; 16]>(views, buffers)?
                    .iter()
                    .map(Mat4::from_cols_array)
                    .collect();
            }
        }
    }

    Ok(skin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::buffer::BufferUsage;
    use serde_json::json;

    fn matrix_data(count: usize) -> (Vec<Accessor>, Vec<BufferView>, Vec<Buffer>) {
        let mut floats = Vec::new();
        for i in 0..count {
            let m = Mat4::from_translation(glam::Vec3::new(i as f32, 0.0, 0.0));
            floats.extend_from_slice(&m.to_cols_array());
        }
        let bytes: Vec<u8> = bytemuck::cast_slice(&floats).to_vec();
        let len = bytes.len();
        (
            vec![Accessor {
                name: "ibm".into(),
                buffer_view: 0,
                byte_offset: 0,
                element_type: ElementType::Mat4,
                component_type: ComponentType::Float,
                count,
                normalized: false,
                range: None,
            }],
            vec![BufferView {
                name: String::new(),
                buffer: 0,
                byte_offset: 0,
                byte_length: len,
                byte_stride: 0,
                usage: BufferUsage::Generic,
            }],
            vec![Buffer::new("bin", bytes)],
        )
    }

    #[test]
    fn test_load_skin() {
        let (accessors, views, buffers) = matrix_data(2);
        let mut diag = Diagnostics::new("test");
        let skin = load_skin(
            &json!({ "name": "rig", "joints": [1, 2], "skeleton": 1, "inverseBindMatrices": 0 }),
            3,
            &accessors,
            &views,
            &buffers,
            &mut diag,
        )
        .unwrap();
        assert!(diag.is_loaded());
        assert_eq!(skin.joints, vec![1, 2]);
        assert_eq!(skin.skeleton_root, Some(1));
        assert_eq!(skin.inverse_bind_matrices.len(), 2);
        assert_eq!(skin.inverse_bind_matrices[1].w_axis.x, 1.0);
    }

    #[test]
    fn test_too_many_joints() {
        let joints: Vec<usize> = (0..MAX_JOINTS + 1).collect();
        let mut diag = Diagnostics::new("test");
        load_skin(&json!({ "joints": joints }), MAX_JOINTS + 1, &[], &[], &[], &mut diag).unwrap();
        let err = diag.finish(()).unwrap_err();
        assert_eq!(err.kind(), Some(crate::ErrorKind::Resource));
    }

    #[test]
    fn test_skin_problems() {
        let (accessors, views, buffers) = matrix_data(1);
        let mut diag = Diagnostics::new("test");
        load_skin(
            &json!({ "joints": [0, 7], "inverseBindMatrices": 0 }),
            2,
            &accessors,
            &views,
            &buffers,
            &mut diag,
        )
        .unwrap();
        load_skin(&json!({ "name": "empty" }), 2, &accessors, &views, &buffers, &mut diag).unwrap();
        // bad joint, missing joints
        assert_eq!(diag.finish(()).unwrap_err().problems().len(), 2);
    }
}
