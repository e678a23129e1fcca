//! Buffers, buffer views and accessors.
//!
//! Every range is validated against its backing storage when it is resolved,
//! and again by [`Accessor::read`] before any byte is copied. A range that
//! does not fit is a bounds violation and ends the load.

use bytemuck::Pod;
use serde_json::Value;

use crate::error::{Diagnostics, ModelError, bounds_violation};
use crate::json::{JsonExt, padded_f32s, padded_i64s};

/// glTF buffer view target for vertex data.
pub const TARGET_ARRAY_BUFFER: i64 = 34962;
/// glTF buffer view target for index data.
pub const TARGET_ELEMENT_ARRAY_BUFFER: i64 = 34963;
/// Largest byte stride a buffer view may declare.
pub const MAX_BYTE_STRIDE: usize = 255;

/// An owned block of bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub name: String,
    data: Vec<u8>,
}

impl Buffer {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn byte_length(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Intended use of a buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsage {
    #[default]
    Generic,
    Vertex,
    Index,
}

/// A byte range inside one [`Buffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct BufferView {
    pub name: String,
    pub buffer: usize,
    pub byte_offset: usize,
    pub byte_length: usize,
    /// 0 means tightly packed
    pub byte_stride: usize,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementType {
    /// Parse a document type name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        const NAMES: [(&str, ElementType); 7] = [
            ("SCALAR", ElementType::Scalar),
            ("VEC2", ElementType::Vec2),
            ("VEC3", ElementType::Vec3),
            ("VEC4", ElementType::Vec4),
            ("MAT2", ElementType::Mat2),
            ("MAT3", ElementType::Mat3),
            ("MAT4", ElementType::Mat4),
        ];
        NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, t)| *t)
    }

    pub fn component_count(self) -> usize {
        match self {
            ElementType::Scalar => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 | ElementType::Mat2 => 4,
            ElementType::Mat3 => 9,
            ElementType::Mat4 => 16,
        }
    }
}

/// Component storage type, keyed by its GL enum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Float,
}

impl ComponentType {
    pub fn from_gl(value: i64) -> Option<Self> {
        match value {
            5120 => Some(ComponentType::Byte),
            5121 => Some(ComponentType::UnsignedByte),
            5122 => Some(ComponentType::Short),
            5123 => Some(ComponentType::UnsignedShort),
            5124 => Some(ComponentType::Int),
            5125 => Some(ComponentType::UnsignedInt),
            5126 => Some(ComponentType::Float),
            _ => None,
        }
    }

    pub fn gl(self) -> u32 {
        match self {
            ComponentType::Byte => 5120,
            ComponentType::UnsignedByte => 5121,
            ComponentType::Short => 5122,
            ComponentType::UnsignedShort => 5123,
            ComponentType::Int => 5124,
            ComponentType::UnsignedInt => 5125,
            ComponentType::Float => 5126,
        }
    }

    pub fn size(self) -> usize {
        match self {
            ComponentType::Byte | ComponentType::UnsignedByte => 1,
            ComponentType::Short | ComponentType::UnsignedShort => 2,
            ComponentType::Int | ComponentType::UnsignedInt | ComponentType::Float => 4,
        }
    }
}

/// Declared per-component min/max, padded to the component count.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessorRange {
    Int { min: Vec<i64>, max: Vec<i64> },
    Float { min: Vec<f32>, max: Vec<f32> },
}

/// A typed view over a [`BufferView`].
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub name: String,
    pub buffer_view: usize,
    /// Added to the buffer view's offset
    pub byte_offset: usize,
    pub element_type: ElementType,
    pub component_type: ComponentType,
    pub count: usize,
    pub normalized: bool,
    pub range: Option<AccessorRange>,
}

impl Accessor {
    pub fn element_size(&self) -> usize {
        self.element_type.component_count() * self.component_type.size()
    }

    /// Float min/max when the accessor declares them.
    pub fn float_range(&self) -> Option<(&[f32], &[f32])> {
        match &self.range {
            Some(AccessorRange::Float { min, max }) => Some((min, max)),
            _ => None,
        }
    }

    /// Copy `count` elements of type `T` out of the backing buffer.
    ///
    /// `T` must match the accessor's element layout; callers check
    /// type and component type first. A non-zero view stride that differs
    /// from `size_of::<T>()` is honored element by element.
    pub fn read<T: Pod>(&self, views: &[BufferView], buffers: &[Buffer]) -> Result<Vec<T>, ModelError> {
        let size = size_of::<T>();
        let view = views.get(self.buffer_view).ok_or_else(|| {
            ModelError::Bounds(format!(
                "accessor '{}' references missing buffer view {}",
                self.name, self.buffer_view
            ))
        })?;
        let buffer = buffers.get(view.buffer).ok_or_else(|| {
            ModelError::Bounds(format!(
                "buffer view '{}' references missing buffer {}",
                view.name, view.buffer
            ))
        })?;

        let stride = if view.byte_stride == 0 { size } else { view.byte_stride };
        if stride < size {
            return Err(ModelError::Bounds(format!(
                "accessor '{}' stride {} is smaller than its {} byte element",
                self.name, stride, size
            )));
        }

        let span = strided_span(self.count, size, stride).ok_or_else(|| {
            ModelError::Bounds(format!("accessor '{}' byte range overflows", self.name))
        })?;
        let start = view.byte_offset.checked_add(self.byte_offset);
        let end = start.and_then(|s| s.checked_add(span));
        let view_end = self.byte_offset.checked_add(span);
        let bytes = match (start, end, view_end) {
            (Some(start), Some(end), Some(view_end)) if view_end <= view.byte_length => {
                buffer.data().get(start..end)
            }
            _ => None,
        }
        .ok_or_else(|| {
            ModelError::Bounds(format!(
                "accessor '{}' requests {} bytes at offset {} of view '{}' ({} bytes, buffer {} bytes)",
                self.name,
                span,
                self.byte_offset,
                view.name,
                view.byte_length,
                buffer.byte_length()
            ))
        })?;

        if stride == size {
            Ok(bytes
                .chunks_exact(size)
                .map(bytemuck::pod_read_unaligned)
                .collect())
        } else {
            Ok((0..self.count)
                .map(|i| bytemuck::pod_read_unaligned(&bytes[i * stride..i * stride + size]))
                .collect())
        }
    }
}

/// Bytes covered by `count` elements of `size` bytes placed `stride` apart.
fn strided_span(count: usize, size: usize, stride: usize) -> Option<usize> {
    if count == 0 {
        return Some(0);
    }
    stride.checked_mul(count - 1)?.checked_add(size)
}

fn non_negative(diag: &mut Diagnostics, value: i64, what: &str) -> usize {
    usize::try_from(value).unwrap_or_else(|_| {
        diag.schema(format!("negative {what} {value}"));
        0
    })
}

/// Resolve one buffer view entry.
pub(crate) fn load_buffer_view(
    value: &Value,
    buffers: &[Buffer],
    diag: &mut Diagnostics,
) -> Result<BufferView, ModelError> {
    let name = value.child_str("name").to_string();
    let buffer_index = diag.index(value.child_i64("buffer", -1), buffers.len(), "buffer");
    let byte_offset = non_negative(diag, value.child_i64("byteOffset", 0), "bufferView byteOffset");
    if value.child("byteLength").is_none() {
        diag.schema(format!("bufferView '{name}' has no byteLength"));
    }
    let byte_length = non_negative(diag, value.child_i64("byteLength", 0), "bufferView byteLength");

    let stride = value.child_i64("byteStride", 0);
    let byte_stride = match usize::try_from(stride) {
        Ok(s) if s <= MAX_BYTE_STRIDE => s,
        _ => {
            diag.schema(format!("invalid byteStride {stride} in bufferView '{name}'"));
            0
        }
    };

    let usage = match value.child_i64("target", 0) {
        TARGET_ARRAY_BUFFER => BufferUsage::Vertex,
        TARGET_ELEMENT_ARRAY_BUFFER => BufferUsage::Index,
        t if t < 0 => {
            diag.schema(format!("invalid target {t} in bufferView '{name}'"));
            BufferUsage::Generic
        }
        _ => BufferUsage::Generic,
    };

    if let Some(buffer) = buffer_index.and_then(|i| buffers.get(i)) {
        let fits = byte_offset
            .checked_add(byte_length)
            .is_some_and(|end| end <= buffer.byte_length());
        if !fits {
            return Err(bounds_violation(
                diag.file(),
                format!(
                    "bufferView '{}' range {}+{} exceeds buffer '{}' ({} bytes)",
                    name,
                    byte_offset,
                    byte_length,
                    buffer.name,
                    buffer.byte_length()
                ),
            ));
        }
    }

    Ok(BufferView {
        name,
        buffer: buffer_index.unwrap_or(0),
        byte_offset,
        byte_length,
        byte_stride,
        usage,
    })
}

/// Resolve one accessor entry and check its byte range.
pub(crate) fn load_accessor(
    value: &Value,
    views: &[BufferView],
    diag: &mut Diagnostics,
) -> Result<Accessor, ModelError> {
    let name = value.child_str("name").to_string();
    let view_index = diag.index(value.child_i64("bufferView", -1), views.len(), "bufferView");
    let byte_offset = non_negative(diag, value.child_i64("byteOffset", 0), "accessor byteOffset");
    let count = non_negative(diag, value.child_i64("count", 0), "accessor count");
    let normalized = value.child_bool("normalized", false);

    let type_name = value.child_str("type");
    let element_type = ElementType::from_name(type_name).unwrap_or_else(|| {
        diag.schema(format!("invalid type '{type_name}' in accessor '{name}'"));
        ElementType::Scalar
    });

    let gl_type = value.child_i64("componentType", 0);
    let component_type = ComponentType::from_gl(gl_type).unwrap_or_else(|| {
        diag.schema(format!("invalid componentType {gl_type} in accessor '{name}'"));
        ComponentType::Float
    });

    let components = element_type.component_count();
    let range = match (value.child("min"), value.child("max")) {
        (Some(min), Some(max)) => Some(match component_type {
            ComponentType::Float => AccessorRange::Float {
                min: padded_f32s(min, components),
                max: padded_f32s(max, components),
            },
            _ => AccessorRange::Int {
                min: padded_i64s(min, components),
                max: padded_i64s(max, components),
            },
        }),
        _ => None,
    };

    let accessor = Accessor {
        name,
        buffer_view: view_index.unwrap_or(0),
        byte_offset,
        element_type,
        component_type,
        count,
        normalized,
        range,
    };

    if let Some(view) = view_index.and_then(|i| views.get(i)) {
        let size = accessor.element_size();
        let stride = view.byte_stride.max(size);
        let fits = strided_span(count, size, stride)
            .and_then(|span| byte_offset.checked_add(span))
            .is_some_and(|end| end <= view.byte_length);
        if !fits {
            return Err(bounds_violation(
                diag.file(),
                format!(
                    "accessor '{}' ({} x {} bytes at offset {}) exceeds bufferView '{}' ({} bytes)",
                    accessor.name, count, size, byte_offset, view.name, view.byte_length
                ),
            ));
        }
    }

    Ok(accessor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use serde_json::json;

    fn float_buffer(values: &[f32]) -> Buffer {
        Buffer::new("test", bytemuck::cast_slice(values).to_vec())
    }

    fn view(buffer: usize, byte_offset: usize, byte_length: usize, byte_stride: usize) -> BufferView {
        BufferView {
            name: "view".into(),
            buffer,
            byte_offset,
            byte_length,
            byte_stride,
            usage: BufferUsage::Generic,
        }
    }

    fn vec3_accessor(count: usize, byte_offset: usize) -> Accessor {
        Accessor {
            name: "positions".into(),
            buffer_view: 0,
            byte_offset,
            element_type: ElementType::Vec3,
            component_type: ComponentType::Float,
            count,
            normalized: false,
            range: None,
        }
    }

    #[test]
    fn test_element_type_names() {
        assert_eq!(ElementType::from_name("vec3"), Some(ElementType::Vec3));
        assert_eq!(ElementType::from_name("MAT4"), Some(ElementType::Mat4));
        assert_eq!(ElementType::from_name("VEC5"), None);
        assert_eq!(ElementType::Mat3.component_count(), 9);
    }

    #[test]
    fn test_component_types() {
        assert_eq!(ComponentType::from_gl(5123), Some(ComponentType::UnsignedShort));
        assert_eq!(ComponentType::from_gl(5127), None);
        assert_eq!(ComponentType::Float.gl(), 5126);
        assert_eq!(ComponentType::Short.size(), 2);
    }

    #[test]
    fn test_read_contiguous() {
        let buffers = [float_buffer(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])];
        let views = [view(0, 0, 24, 0)];
        let out: Vec<Vec3> = vec3_accessor(2, 0).read(&views, &buffers).unwrap();
        assert_eq!(out, vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]);
    }

    #[test]
    fn test_read_strided() {
        // Two vec3 positions interleaved with a float of padding each.
        let buffers = [float_buffer(&[1.0, 2.0, 3.0, -1.0, 4.0, 5.0, 6.0, -1.0])];
        let views = [view(0, 0, 32, 16)];
        let out: Vec<Vec3> = vec3_accessor(2, 0).read(&views, &buffers).unwrap();
        assert_eq!(out, vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]);
    }

    #[test]
    fn test_read_past_view_fails() {
        let buffers = [float_buffer(&[0.0; 12])];
        let views = [view(0, 0, 24, 0)];
        let err = vec3_accessor(3, 0).read::<Vec3>(&views, &buffers).unwrap_err();
        assert!(matches!(err, ModelError::Bounds(_)));
    }

    #[test]
    fn test_read_past_buffer_fails() {
        let buffers = [float_buffer(&[0.0; 6])];
        // View claims more than the buffer holds; only reachable when built by hand.
        let views = [view(0, 12, 24, 0)];
        let err = vec3_accessor(2, 0).read::<Vec3>(&views, &buffers).unwrap_err();
        assert!(matches!(err, ModelError::Bounds(_)));
    }

    #[test]
    fn test_load_buffer_view_bounds() {
        let buffers = [Buffer::new("bin", vec![0; 16])];
        let mut diag = Diagnostics::new("test");

        let ok = load_buffer_view(
            &json!({ "buffer": 0, "byteOffset": 4, "byteLength": 12, "target": 34963 }),
            &buffers,
            &mut diag,
        )
        .unwrap();
        assert_eq!(ok.usage, BufferUsage::Index);
        assert!(diag.is_loaded());

        let err = load_buffer_view(
            &json!({ "buffer": 0, "byteOffset": 8, "byteLength": 12 }),
            &buffers,
            &mut diag,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Bounds(_)));
    }

    #[test]
    fn test_load_buffer_view_schema_problems() {
        let buffers = [Buffer::new("bin", vec![0; 16])];
        let mut diag = Diagnostics::new("test");
        load_buffer_view(
            &json!({ "buffer": 3, "byteLength": 4, "byteStride": 300, "target": -2 }),
            &buffers,
            &mut diag,
        )
        .unwrap();
        let err = diag.finish(()).unwrap_err();
        assert_eq!(err.problems().len(), 3);
    }

    #[test]
    fn test_load_accessor_range_and_bounds() {
        let views = [view(0, 0, 24, 0)];
        let mut diag = Diagnostics::new("test");

        let accessor = load_accessor(
            &json!({
                "bufferView": 0, "componentType": 5126, "count": 2, "type": "VEC3",
                "min": [0, 0, 0], "max": [1, 2]
            }),
            &views,
            &mut diag,
        )
        .unwrap();
        let (min, max) = accessor.float_range().unwrap();
        assert_eq!(min, &[0.0, 0.0, 0.0]);
        assert_eq!(max, &[1.0, 2.0, 0.0]);
        assert!(diag.is_loaded());

        let err = load_accessor(
            &json!({ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" }),
            &views,
            &mut diag,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Bounds(_)));
    }

    #[test]
    fn test_load_accessor_int_range() {
        let views = [view(0, 0, 6, 0)];
        let mut diag = Diagnostics::new("test");
        let accessor = load_accessor(
            &json!({
                "bufferView": 0, "componentType": 5123, "count": 3, "type": "SCALAR",
                "min": [0], "max": [2]
            }),
            &views,
            &mut diag,
        )
        .unwrap();
        assert_eq!(
            accessor.range,
            Some(AccessorRange::Int {
                min: vec![0],
                max: vec![2]
            })
        );
        assert_eq!(accessor.element_size(), 2);
    }
}
