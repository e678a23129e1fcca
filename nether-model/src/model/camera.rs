use serde_json::Value;

use crate::error::Diagnostics;
use crate::json::JsonExt;

/// Far plane used when a perspective camera leaves `zfar` out.
pub const DEFAULT_PERSPECTIVE_ZFAR: f32 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        aspect_ratio: f32,
        fov_degrees_x: f32,
        fov_degrees_y: f32,
        near_z: f32,
        far_z: f32,
    },
    Orthographic {
        mag_x: f32,
        mag_y: f32,
        near_z: f32,
        far_z: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub name: String,
    pub projection: Projection,
}

pub(crate) fn load_camera(value: &Value, diag: &mut Diagnostics) -> Camera {
    let name = value.child_str("name").to_string();
    let kind = value.child_str("type");

    let projection = if kind.eq_ignore_ascii_case("orthographic") {
        let ortho = value.child("orthographic").filter(|v| v.is_object());
        if ortho.is_none() {
            diag.schema(format!("orthographic camera '{name}' has no orthographic object"));
        }
        let field = |f: &str| ortho.map_or(0.0, |o| o.child_f32(f, 0.0));
        let (mag_x, mag_y, near_z, far_z) = (field("xmag"), field("ymag"), field("znear"), field("zfar"));
        if mag_x <= 0.0 || mag_y <= 0.0 || near_z <= 0.0 || far_z <= near_z {
            diag.schema(format!("invalid orthographic parameters on camera '{name}'"));
        }
        Projection::Orthographic {
            mag_x,
            mag_y,
            near_z,
            far_z,
        }
    } else {
        if !kind.eq_ignore_ascii_case("perspective") {
            diag.schema(format!("invalid type '{kind}' on camera '{name}'"));
        }
        let persp = value.child("perspective").filter(|v| v.is_object());
        if persp.is_none() {
            diag.schema(format!("perspective camera '{name}' has no perspective object"));
        }
        let field = |f: &str, default: f32| persp.map_or(default, |p| p.child_f32(f, default));
        let aspect_ratio = field("aspectRatio", 0.0);
        let yfov = field("yfov", 0.0);
        let near_z = field("znear", 0.0);
        let far_z = field("zfar", DEFAULT_PERSPECTIVE_ZFAR);
        let fov_degrees_x = 2.0 * ((yfov * 0.5).tan() * aspect_ratio).atan().to_degrees();
        let fov_degrees_y = yfov.to_degrees();
        if fov_degrees_x <= 0.0 || fov_degrees_y <= 0.0 || near_z <= 0.0 || far_z <= 0.0 {
            diag.schema(format!("invalid perspective parameters on camera '{name}'"));
        }
        Projection::Perspective {
            aspect_ratio,
            fov_degrees_x,
            fov_degrees_y,
            near_z,
            far_z,
        }
    };

    Camera { name, projection }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_perspective_camera() {
        let mut diag = Diagnostics::new("test");
        let camera = load_camera(
            &json!({
                "name": "main",
                "type": "perspective",
                "perspective": { "aspectRatio": 1.0, "yfov": std::f32::consts::FRAC_PI_2, "znear": 0.1 }
            }),
            &mut diag,
        );
        assert!(diag.is_loaded());
        let Projection::Perspective {
            fov_degrees_x,
            fov_degrees_y,
            far_z,
            ..
        } = camera.projection
        else {
            panic!("expected a perspective camera");
        };
        assert!((fov_degrees_y - 90.0).abs() < 1e-4);
        assert!((fov_degrees_x - 90.0).abs() < 1e-3);
        assert_eq!(far_z, DEFAULT_PERSPECTIVE_ZFAR);
    }

    #[test]
    fn test_orthographic_camera() {
        let mut diag = Diagnostics::new("test");
        let camera = load_camera(
            &json!({
                "type": "orthographic",
                "orthographic": { "xmag": 2, "ymag": 1, "znear": 0.5, "zfar": 50 }
            }),
            &mut diag,
        );
        assert!(diag.is_loaded());
        assert_eq!(
            camera.projection,
            Projection::Orthographic {
                mag_x: 2.0,
                mag_y: 1.0,
                near_z: 0.5,
                far_z: 50.0
            }
        );
    }

    #[test]
    fn test_invalid_cameras() {
        let mut diag = Diagnostics::new("test");
        load_camera(
            &json!({
                "type": "orthographic",
                "orthographic": { "xmag": 1, "ymag": 1, "znear": 5, "zfar": 5 }
            }),
            &mut diag,
        );
        load_camera(&json!({ "type": "perspective", "perspective": { "yfov": 1.0, "znear": 0.1 } }), &mut diag);
        load_camera(&json!({ "type": "fisheye" }), &mut diag);
        // ortho range, perspective aspect, fisheye type + missing object + parameters
        assert_eq!(diag.finish(()).unwrap_err().problems().len(), 5);
    }
}
