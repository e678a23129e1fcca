//! Programmatic scene generation for integration tests.
//!
//! Builds glTF documents with `serde_json::json!`, packs their binary data
//! and assembles GLB files and zip archives around them.

#![allow(dead_code)]

mod zip_assembly;

pub use zip_assembly::{assemble_zip, assemble_zip_stored};

use nether_model::container::glb::{CHUNK_BIN, CHUNK_JSON, GLB_MAGIC, GLB_VERSION};
use serde_json::{Value, json};

const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const FLOAT: u32 = 5126;
const UNSIGNED_SHORT: u32 = 5123;

/// Packs arrays into one binary buffer and records matching buffer views
/// and accessors.
#[derive(Default)]
pub struct BufferPacker {
    data: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BufferPacker {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_view(&mut self, bytes: &[u8], target: Option<u32>) -> usize {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.data.len(),
            "byteLength": bytes.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.data.extend_from_slice(bytes);
        self.views.push(view);
        self.views.len() - 1
    }

    fn push_float_accessor<const N: usize>(&mut self, values: &[[f32; N]], kind: &str, target: Option<u32>) -> usize {
        let view = self.push_view(bytemuck::cast_slice(values), target);
        self.float_accessor(view, values, kind)
    }

    fn float_accessor<const N: usize>(&mut self, view: usize, values: &[[f32; N]], kind: &str) -> usize {
        let mut min = [f32::MAX; N];
        let mut max = [f32::MIN; N];
        for value in values {
            for i in 0..N {
                min[i] = min[i].min(value[i]);
                max[i] = max[i].max(value[i]);
            }
        }
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": FLOAT,
            "count": values.len(),
            "type": kind,
            "min": min.to_vec(),
            "max": max.to_vec(),
        }));
        self.accessors.len() - 1
    }

    pub fn scalars(&mut self, values: &[f32]) -> usize {
        let wrapped: Vec<[f32; 1]> = values.iter().map(|&v| [v]).collect();
        self.push_float_accessor(&wrapped, "SCALAR", None)
    }

    pub fn vec3s(&mut self, values: &[[f32; 3]]) -> usize {
        self.push_float_accessor(values, "VEC3", Some(TARGET_ARRAY_BUFFER))
    }

    /// VEC3 floats interleaved `stride` bytes apart, starting `offset` bytes
    /// into a view that ends exactly after the last element.
    pub fn strided_vec3s(&mut self, values: &[[f32; 3]], stride: usize, offset: usize) -> usize {
        let mut bytes = vec![0u8; offset + stride * (values.len() - 1) + 12];
        for (i, value) in values.iter().enumerate() {
            let at = offset + i * stride;
            bytes[at..at + 12].copy_from_slice(bytemuck::cast_slice(value));
        }
        let view = self.push_view(&bytes, Some(TARGET_ARRAY_BUFFER));
        self.views[view]["byteStride"] = json!(stride);
        let accessor = self.float_accessor(view, values, "VEC3");
        self.accessors[accessor]["byteOffset"] = json!(offset);
        accessor
    }

    pub fn vec4s(&mut self, values: &[[f32; 4]]) -> usize {
        self.push_float_accessor(values, "VEC4", None)
    }

    pub fn indices(&mut self, values: &[u16]) -> usize {
        let view = self.push_view(bytemuck::cast_slice(values), Some(TARGET_ELEMENT_ARRAY_BUFFER));
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": UNSIGNED_SHORT,
            "count": values.len(),
            "type": "SCALAR",
        }));
        self.accessors.len() - 1
    }

    /// Raw bytes in their own view, e.g. an encoded image.
    pub fn blob(&mut self, bytes: &[u8]) -> usize {
        self.push_view(bytes, None)
    }

    pub fn accessors_mut(&mut self) -> &mut Vec<Value> {
        &mut self.accessors
    }

    /// Install buffer views and accessors into `doc` and return the buffer
    /// bytes. The single buffer entry gets `byteLength` (and `uri`, if given).
    pub fn finish(self, doc: &mut Value, uri: Option<&str>) -> Vec<u8> {
        let mut buffer = json!({ "byteLength": self.data.len() });
        if let Some(uri) = uri {
            buffer["uri"] = json!(uri);
        }
        doc["buffers"] = json!([buffer]);
        doc["bufferViews"] = Value::Array(self.views);
        doc["accessors"] = Value::Array(self.accessors);
        self.data
    }
}

/// One GLB chunk, padded to four bytes with `pad`.
fn glb_chunk(kind: u32, body: &[u8], pad: u8) -> Vec<u8> {
    let padded = body.len().next_multiple_of(4);
    let mut chunk = Vec::with_capacity(8 + padded);
    chunk.extend_from_slice(&(padded as u32).to_le_bytes());
    chunk.extend_from_slice(&kind.to_le_bytes());
    chunk.extend_from_slice(body);
    chunk.resize(8 + padded, pad);
    chunk
}

/// Wrap a document and its binary buffer in a GLB container.
pub fn assemble_glb(doc: &Value, bin: &[u8]) -> Vec<u8> {
    let json = serde_json::to_vec(doc).expect("document serializes");
    let chunks = [glb_chunk(CHUNK_JSON, &json, b' '), glb_chunk(CHUNK_BIN, bin, 0)];
    let length = 12 + chunks.iter().map(Vec::len).sum::<usize>();

    let mut glb = Vec::with_capacity(length);
    for word in [GLB_MAGIC, GLB_VERSION, length as u32] {
        glb.extend_from_slice(&word.to_le_bytes());
    }
    chunks.iter().for_each(|chunk| glb.extend_from_slice(chunk));
    glb
}

pub const TRIANGLE_POSITIONS: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

/// A document with one triangle mesh on one node, plus its packer.
///
/// Accessor 0 holds positions and accessor 1 holds indices.
pub fn triangle_document(node: Value) -> (Value, BufferPacker) {
    let mut packer = BufferPacker::new();
    let positions = packer.vec3s(&TRIANGLE_POSITIONS);
    let indices = packer.indices(&[0, 1, 2]);

    let mut node = node;
    node["mesh"] = json!(0);
    let doc = json!({
        "asset": { "version": "2.0", "generator": "nether-model tests" },
        "meshes": [{
            "name": "Triangle",
            "primitives": [{ "attributes": { "POSITION": positions }, "indices": indices }]
        }],
        "nodes": [node],
        "scenes": [{ "name": "Main", "nodes": [0] }],
        "scene": 0
    });
    (doc, packer)
}

/// A GLB holding [`triangle_document`] for `node`.
pub fn triangle_glb(node: Value) -> Vec<u8> {
    let (mut doc, packer) = triangle_document(node);
    let bin = packer.finish(&mut doc, None);
    assemble_glb(&doc, &bin)
}

/// Serialize `doc` with its buffer into a GLB.
pub fn glb_from(mut doc: Value, packer: BufferPacker) -> Vec<u8> {
    let bin = packer.finish(&mut doc, None);
    assemble_glb(&doc, &bin)
}

/// A 2x2 PNG image.
pub fn png_image() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    bytes.into_inner()
}
