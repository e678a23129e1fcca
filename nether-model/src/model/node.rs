//! Node hierarchy and transforms
//!
//! Nodes live in one flat list; parent and child links are indices into it.
//! After [`link_children`] every child has exactly one parent that lists it,
//! and nodes caught in a parent cycle are reported.

use glam::{Mat3, Mat4, Quat, Vec3};
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::Diagnostics;
use crate::json::{JsonExt, fixed_f32s};

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub local_transform: Mat4,
    pub global_transform: Mat4,
    pub parent: Option<usize>,
    pub children: SmallVec<[usize; 4]>,
    pub mesh: Option<usize>,
    pub camera: Option<usize>,
    pub skin: Option<usize>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            local_transform: Mat4::IDENTITY,
            global_transform: Mat4::IDENTITY,
            parent: None,
            children: SmallVec::new(),
            mesh: None,
            camera: None,
            skin: None,
        }
    }

    /// Rebuild the local transform from translation, rotation and scale.
    pub fn update_local_transform(&mut self) {
        self.local_transform =
            Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation);
    }
}

/// A named set of root nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubScene {
    pub name: String,
    pub roots: Vec<usize>,
    pub visible: bool,
}

/// Rotation of an orthonormal basis, using the trace method with four
/// branches picked by the largest diagonal term.
pub fn quat_from_rotation(m: &Mat3) -> Quat {
    // m_rc: row r, column c
    let (m00, m10, m20) = (m.x_axis.x, m.x_axis.y, m.x_axis.z);
    let (m01, m11, m21) = (m.y_axis.x, m.y_axis.y, m.y_axis.z);
    let (m02, m12, m22) = (m.z_axis.x, m.z_axis.y, m.z_axis.z);

    let trace = m00 + m11 + m22;
    let q = if trace > 0.0 {
        let s = 0.5 / (trace + 1.0).sqrt();
        Quat::from_xyzw((m21 - m12) * s, (m02 - m20) * s, (m10 - m01) * s, 0.25 / s)
    } else if m00 > m11 && m00 > m22 {
        let s = 2.0 * (1.0 + m00 - m11 - m22).sqrt();
        Quat::from_xyzw(0.25 * s, (m01 + m10) / s, (m02 + m20) / s, (m21 - m12) / s)
    } else if m11 > m22 {
        let s = 2.0 * (1.0 + m11 - m00 - m22).sqrt();
        Quat::from_xyzw((m01 + m10) / s, 0.25 * s, (m12 + m21) / s, (m02 - m20) / s)
    } else {
        let s = 2.0 * (1.0 + m22 - m00 - m11).sqrt();
        Quat::from_xyzw((m02 + m20) / s, (m12 + m21) / s, 0.25 * s, (m10 - m01) / s)
    };
    q.normalize()
}

/// Split an affine matrix into translation, rotation and per-axis scale.
///
/// Scale is the length of each basis column. Zero-length columns keep a
/// scale of zero and contribute an identity axis to the rotation.
pub fn decompose_matrix(m: &Mat4) -> (Vec3, Quat, Vec3) {
    let translation = m.w_axis.truncate();
    let columns = [m.x_axis.truncate(), m.y_axis.truncate(), m.z_axis.truncate()];
    let scale = Vec3::new(columns[0].length(), columns[1].length(), columns[2].length());

    let identity = [Vec3::X, Vec3::Y, Vec3::Z];
    let mut basis = [Vec3::ZERO; 3];
    for i in 0..3 {
        basis[i] = if scale[i] > f32::EPSILON {
            columns[i] / scale[i]
        } else {
            identity[i]
        };
    }

    let rotation = quat_from_rotation(&Mat3::from_cols(basis[0], basis[1], basis[2]));
    (translation, rotation, scale)
}

/// Parse one node. Child links are returned raw and resolved by
/// [`link_children`] once every node exists.
pub(crate) fn load_node(
    value: &Value,
    mesh_count: usize,
    camera_count: usize,
    diag: &mut Diagnostics,
) -> (Node, Vec<i64>) {
    let mut node = Node::new(value.child_str("name"));

    if let Some(matrix) = value.child("matrix") {
        match fixed_f32s::<16>(matrix) {
            Some(cols) => {
                let (t, r, s) = decompose_matrix(&Mat4::from_cols_array(&cols));
                node.translation = t;
                node.rotation = r;
                node.scale = s;
            }
            None => diag.schema(format!("matrix of node '{}' needs 16 items", node.name)),
        }
    }
    if let Some(t) = value.child("translation") {
        match fixed_f32s::<3>(t) {
            Some(t) => node.translation = Vec3::from_array(t),
            None => diag.schema(format!("translation of node '{}' needs 3 items", node.name)),
        }
    }
    if let Some(r) = value.child("rotation") {
        match fixed_f32s::<4>(r) {
            Some(r) => node.rotation = Quat::from_array(r),
            None => diag.schema(format!("rotation of node '{}' needs 4 items", node.name)),
        }
    }
    if let Some(s) = value.child("scale") {
        match fixed_f32s::<3>(s) {
            Some(s) => node.scale = Vec3::from_array(s),
            None => diag.schema(format!("scale of node '{}' needs 3 items", node.name)),
        }
    }
    node.update_local_transform();

    if value.child("mesh").is_some() {
        node.mesh = diag.index(value.child_i64("mesh", -1), mesh_count, "node mesh");
    }
    if value.child("camera").is_some() {
        node.camera = diag.index(value.child_i64("camera", -1), camera_count, "node camera");
    }
    // Skins are built after nodes; see `check_skin_refs`.
    if value.child("skin").is_some() {
        let skin = value.child_i64("skin", -1);
        node.skin = usize::try_from(skin).ok();
        if node.skin.is_none() {
            diag.reference(format!("invalid skin index {} on node '{}'", skin, node.name));
        }
    }

    let children = value
        .child_array("children")
        .map(|c| c.iter().map(|v| v.as_i64().unwrap_or(-1)).collect())
        .unwrap_or_default();
    (node, children)
}

/// Resolve raw child lists into parent/child links.
///
/// Out-of-range children, self references and second parents are reference
/// problems and are left unlinked. Nodes that cannot be reached from any
/// parentless node sit on a parent cycle and are reported too.
pub(crate) fn link_children(nodes: &mut [Node], raw_children: &[Vec<i64>], diag: &mut Diagnostics) {
    let count = nodes.len();
    for (parent, children) in raw_children.iter().enumerate() {
        for &raw in children {
            let Some(child) = diag.index(raw, count, "node child") else {
                continue;
            };
            if child == parent {
                diag.reference(format!("node {parent} lists itself as a child"));
            } else if let Some(existing) = nodes[child].parent {
                diag.reference(format!(
                    "node {child} has more than one parent ({existing} and {parent})"
                ));
            } else {
                nodes[child].parent = Some(parent);
                nodes[parent].children.push(child);
            }
        }
    }

    let roots: Vec<usize> = (0..count).filter(|&i| nodes[i].parent.is_none()).collect();
    let reached = visit_order(nodes, &roots).len();
    if reached < count {
        diag.reference(format!("{} nodes form a parent cycle", count - reached));
    }
}

/// Depth-first order from `roots`, visiting each node at most once.
fn visit_order(nodes: &[Node], roots: &[usize]) -> Vec<usize> {
    let mut visited = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    let mut stack: Vec<usize> = Vec::new();
    for &root in roots {
        if root >= nodes.len() || visited[root] {
            continue;
        }
        stack.push(root);
        while let Some(index) = stack.pop() {
            if visited[index] {
                continue;
            }
            visited[index] = true;
            order.push(index);
            stack.extend(nodes[index].children.iter().rev().copied().filter(|&c| c < visited.len() && !visited[c]));
        }
    }
    order
}

/// Recompute every reachable node's global transform top-down.
///
/// Traversal starts at the parentless `scene_roots`, then picks up any other
/// parentless node not yet reached. Each node is visited exactly once; the visit order is
/// returned.
pub fn update_global_transforms(nodes: &mut [Node], scene_roots: &[usize]) -> Vec<usize> {
    // A scene root with a parent is reached through that parent.
    let mut roots: Vec<usize> = scene_roots
        .iter()
        .copied()
        .filter(|&r| nodes.get(r).is_some_and(|n| n.parent.is_none()))
        .collect();
    roots.extend((0..nodes.len()).filter(|&i| nodes[i].parent.is_none()));

    let order = visit_order(nodes, &roots);
    let mut done = vec![false; nodes.len()];
    for &index in &order {
        let parent_global = nodes[index]
            .parent
            .filter(|&p| p < done.len() && done[p])
            .map(|p| nodes[p].global_transform);
        let local = nodes[index].local_transform;
        nodes[index].global_transform = match parent_global {
            Some(parent) => parent * local,
            None => local,
        };
        done[index] = true;
    }
    order
}

/// Drop skin links that point past the skin list.
pub(crate) fn check_skin_refs(nodes: &mut [Node], skin_count: usize, diag: &mut Diagnostics) {
    for node in nodes.iter_mut() {
        if let Some(skin) = node.skin.filter(|&s| s >= skin_count) {
            diag.reference(format!(
                "node '{}' references skin {} (count {})",
                node.name, skin, skin_count
            ));
            node.skin = None;
        }
    }
}

pub(crate) fn load_scene(value: &Value, node_count: usize, diag: &mut Diagnostics) -> SubScene {
    let name = value.child_str("name").to_string();
    let roots = value
        .child_array("nodes")
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| diag.index(n.as_i64().unwrap_or(-1), node_count, "scene node"))
                .collect()
        })
        .unwrap_or_default();
    SubScene {
        name,
        roots,
        visible: false,
    }
}
