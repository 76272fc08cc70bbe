use nalgebra::{Matrix3, Matrix4, Point2, Point3, RealField, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Mat4 = Matrix4<Real>;

/// Lift an `f64` constant into any solver scalar.
#[inline]
pub fn lit<T: RealField>(v: f64) -> T {
    nalgebra::convert(v)
}

/// Lift an `f64` vector into any solver scalar.
pub fn lift_vec2<T: RealField>(v: &Vec2) -> Vector2<T> {
    Vector2::new(lit(v.x), lit(v.y))
}

/// Lift an `f64` vector into any solver scalar.
pub fn lift_vec3<T: RealField>(v: &Vec3) -> Vector3<T> {
    Vector3::new(lit(v.x), lit(v.y), lit(v.z))
}

/// Lift an `f64` matrix into any solver scalar.
pub fn lift_mat4<T: RealField>(m: &Mat4) -> Matrix4<T> {
    m.map(|v| lit::<T>(v))
}

pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Mean of a set of 3D positions, `None` when empty.
pub fn centroid(points: &[Vec3]) -> Option<Vec3> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Vec3::zeros(), |acc, p| acc + p);
    Some(sum / points.len() as f64)
}
