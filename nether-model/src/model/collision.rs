//! Collision and ray-trace data from legacy scenes
//!
//! Collision sets are convex polytopes described by their bounding planes.
//! The trace model is a triangle soup with a kd-tree over it; leaves list up
//! to [`TRACE_LEAF_TRIANGLES`] triangles and spill the rest into a shared
//! overflow list.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

use super::Bounds;

/// Triangle slots stored directly in a kd-tree leaf.
pub const TRACE_LEAF_TRIANGLES: usize = 4;

/// End of a leaf's triangle list.
pub const TRACE_END_OF_LIST: i32 = -1;

/// A named convex volume; each plane is `(normal, distance)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollisionPolytope {
    pub name: String,
    pub planes: Vec<Vec4>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelCollision {
    pub polytopes: Vec<CollisionPolytope>,
}

impl ModelCollision {
    pub fn is_empty(&self) -> bool {
        self.polytopes.is_empty()
    }
}

/// Element counts declared ahead of the trace arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceHeader {
    pub vertices: usize,
    pub uvs: usize,
    pub indices: usize,
    pub nodes: usize,
    pub leafs: usize,
    pub overflow: usize,
}

/// kd-tree node (8 bytes)
///
/// Bit 0 of `data` marks a leaf, bits 1-2 hold the split axis and the rest
/// index the left child (or the leaf). The right child follows the left one.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct TraceNode {
    pub data: u32,
    pub dist: f32,
}

impl TraceNode {
    pub fn is_leaf(&self) -> bool {
        self.data & 1 != 0
    }

    /// Left child for an inner node, leaf index for a leaf.
    pub fn index(&self) -> usize {
        (self.data >> 3) as usize
    }
}

/// kd-tree leaf (64 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct TraceLeaf {
    /// Triangle indices; [`TRACE_END_OF_LIST`] ends the list and any other
    /// negative value continues it in the overflow list
    pub triangles: [i32; TRACE_LEAF_TRIANGLES],
    /// Neighbouring node across each face of the leaf box
    pub ropes: [i32; 6],
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelTrace {
    pub header: TraceHeader,
    pub bounds: Bounds,
    pub vertices: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<i32>,
    pub nodes: Vec<TraceNode>,
    pub leafs: Vec<TraceLeaf>,
    pub overflow: Vec<i32>,
}

impl ModelTrace {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Check that every array matches the header and every index stays in
    /// range, so tracing never reads outside the model.
    pub fn validate(&self) -> Result<(), String> {
        let h = &self.header;
        let lengths = [
            ("vertices", h.vertices, self.vertices.len()),
            ("uvs", h.uvs, self.uvs.len()),
            ("indices", h.indices, self.indices.len()),
            ("nodes", h.nodes, self.nodes.len()),
            ("leafs", h.leafs, self.leafs.len()),
            ("overflow", h.overflow, self.overflow.len()),
        ];
        for (what, declared, found) in lengths {
            if declared != found {
                return Err(format!("header declares {declared} {what}, found {found}"));
            }
        }

        if !self.uvs.is_empty() && self.uvs.len() != self.vertices.len() {
            return Err(format!(
                "{} uvs for {} vertices; expected none or one per vertex",
                self.uvs.len(),
                self.vertices.len()
            ));
        }
        if self.indices.len() % 3 != 0 {
            return Err(format!("{} indices do not form whole triangles", self.indices.len()));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            let (index, count, what) = if node.is_leaf() {
                (node.index(), self.leafs.len(), "leaf")
            } else {
                (node.index() + 1, self.nodes.len(), "right child")
            };
            if index >= count {
                return Err(format!("node {i} {what} {index} is out of range (count {count})"));
            }
        }

        let triangles = self.triangle_count();
        for (i, leaf) in self.leafs.iter().enumerate() {
            for &triangle in &leaf.triangles {
                if triangle == TRACE_END_OF_LIST {
                    break;
                }
                if triangle < 0 {
                    let overflow = (triangle & i32::MAX) as usize;
                    if overflow >= self.overflow.len() {
                        return Err(format!(
                            "leaf {i} overflow index {overflow} is out of range (count {})",
                            self.overflow.len()
                        ));
                    }
                } else if triangle as usize >= triangles {
                    return Err(format!("leaf {i} triangle {triangle} is out of range (count {triangles})"));
                }
            }
        }

        for (i, &triangle) in self.overflow.iter().enumerate() {
            if triangle < 0 || triangle as usize >= triangles {
                return Err(format!("overflow {i} triangle {triangle} is out of range (count {triangles})"));
            }
        }
        for (i, &index) in self.indices.iter().enumerate() {
            if index < 0 || index as usize >= self.vertices.len() {
                return Err(format!(
                    "index {i} value {index} is out of range (count {})",
                    self.vertices.len()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> ModelTrace {
        let leaf = TraceLeaf {
            triangles: [0, 1, TRACE_END_OF_LIST, 0],
            ropes: [-1; 6],
            min: Vec3::ZERO,
            max: Vec3::new(1.0, 0.0, 1.0),
        };
        ModelTrace {
            header: TraceHeader {
                vertices: 4,
                indices: 6,
                nodes: 1,
                leafs: 1,
                ..TraceHeader::default()
            },
            bounds: Bounds::new(leaf.min, leaf.max),
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 0.0, 1.0), Vec3::Z],
            indices: vec![0, 1, 2, 0, 2, 3],
            nodes: vec![TraceNode { data: 1, dist: 0.0 }],
            leafs: vec![leaf],
            ..ModelTrace::default()
        }
    }

    #[test]
    fn test_valid_trace() {
        let trace = quad();
        assert_eq!(trace.triangle_count(), 2);
        assert!(trace.nodes[0].is_leaf());
        assert_eq!(trace.validate(), Ok(()));
    }

    #[test]
    fn test_header_must_match_arrays() {
        let mut trace = quad();
        trace.header.vertices = 5;
        assert!(trace.validate().unwrap_err().contains("vertices"));
    }

    #[test]
    fn test_out_of_range_references() {
        let mut trace = quad();
        trace.indices[5] = 4;
        assert!(trace.validate().is_err());

        let mut trace = quad();
        trace.leafs[0].triangles[1] = 2;
        assert!(trace.validate().is_err());

        // Negative slots other than the terminator point into the overflow list.
        let mut trace = quad();
        trace.leafs[0].triangles[2] = i32::MIN;
        assert!(trace.validate().is_err());
        trace.overflow.push(1);
        trace.header.overflow = 1;
        assert_eq!(trace.validate(), Ok(()));

        let mut trace = quad();
        trace.nodes[0].data = 0;
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_uvs_are_all_or_nothing() {
        let mut trace = quad();
        trace.uvs = vec![Vec2::ZERO; 2];
        trace.header.uvs = 2;
        assert!(trace.validate().is_err());
        trace.uvs = vec![Vec2::ZERO; 4];
        trace.header.uvs = 4;
        assert_eq!(trace.validate(), Ok(()));
    }
}
