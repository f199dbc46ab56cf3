//! Geometric primitives for spatial queries: axis aligned boxes,
//! spheres and view frustums.

use nalgebra::{Matrix4, Point3};

/// 3D axis aligned bounding box
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, min_z: f64, max_x: f64, max_y: f64, max_z: f64) -> Bounds {
        Bounds {
            min_x,
            min_y,
            min_z,
            max_x,
            max_y,
            max_z,
        }
    }

    /// True when the boxes share at least one point (touching faces
    /// count as overlap).
    pub fn intersects(&self, r: &Bounds) -> bool {
        let overlaps = |self_min: f64, self_max: f64, r_min: f64, r_max: f64| {
            self_min <= r_max && r_min <= self_max
        };
        overlaps(self.min_x, self.max_x, r.min_x, r.max_x)
            && overlaps(self.min_y, self.max_y, r.min_y, r.max_y)
            && overlaps(self.min_z, self.max_z, r.min_z, r.max_z)
    }

    /// True when `self` lies entirely inside `r`.
    pub fn within(&self, r: &Bounds) -> bool {
        self.min_x >= r.min_x
            && self.min_y >= r.min_y
            && self.min_z >= r.min_z
            && self.max_x <= r.max_x
            && self.max_y <= r.max_y
            && self.max_z <= r.max_z
    }

    pub fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        self.min_x <= x
            && x <= self.max_x
            && self.min_y <= y
            && y <= self.max_y
            && self.min_z <= z
            && z <= self.max_z
    }

    pub fn center(&self) -> Point3<f64> {
        Point3::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
            (self.min_z + self.max_z) / 2.0,
        )
    }

    /// The eight corners, min corner first.
    fn corners(&self) -> [Point3<f64>; 8] {
        [
            Point3::new(self.min_x, self.min_y, self.min_z),
            Point3::new(self.min_x, self.min_y, self.max_z),
            Point3::new(self.min_x, self.max_y, self.min_z),
            Point3::new(self.min_x, self.max_y, self.max_z),
            Point3::new(self.max_x, self.min_y, self.min_z),
            Point3::new(self.max_x, self.min_y, self.max_z),
            Point3::new(self.max_x, self.max_y, self.min_z),
            Point3::new(self.max_x, self.max_y, self.max_z),
        ]
    }
}

/// A sphere, for distance-from-point queries.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Sphere {
    pub center: Point3<f64>,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center_x: f64, center_y: f64, center_z: f64, radius: f64) -> Sphere {
        Sphere {
            center: Point3::new(center_x, center_y, center_z),
            radius,
        }
    }

    /// Sphere/box overlap via the box point closest to the center.
    pub fn intersects_bounds(&self, bounds: &Bounds) -> bool {
        let closest_x = self.center.x.clamp(bounds.min_x, bounds.max_x);
        let closest_y = self.center.y.clamp(bounds.min_y, bounds.max_y);
        let closest_z = self.center.z.clamp(bounds.min_z, bounds.max_z);
        let dx = self.center.x - closest_x;
        let dy = self.center.y - closest_y;
        let dz = self.center.z - closest_z;
        dx * dx + dy * dy + dz * dz <= self.radius * self.radius
    }
}

/// An oriented plane `normal . p = b`, with the positive side facing the
/// inside of whatever volume it bounds.
#[derive(Clone, Copy, Debug)]
struct Plane {
    normal: nalgebra::Vector3<f64>,
    b: f64,
}

impl Plane {
    fn from_triangle(p1: Point3<f64>, p2: Point3<f64>, p3: Point3<f64>) -> Self {
        let normal = (p2 - p1).cross(&(p3 - p1)).normalize();
        let b = normal.dot(&p1.coords);
        Plane { normal, b }
    }

    fn signed_distance(&self, p: Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) - self.b
    }

    fn is_on_negative_side(&self, p: Point3<f64>) -> bool {
        self.signed_distance(p) < 0.0
    }

    fn flipped(self) -> Self {
        Plane {
            normal: -self.normal,
            b: -self.b,
        }
    }
}

/// A view frustum: six inward-facing planes plus the frustum corners.
///
/// Built from a view-projection matrix by unprojecting the corners of
/// the NDC cube, so it works for any invertible projection.
#[derive(Clone, Debug)]
pub struct Frustum {
    vertices: [Point3<f64>; 8],
    planes: [Plane; 6],
}

impl Frustum {
    /// Builds the frustum of a view-projection matrix.
    ///
    /// Returns `None` when the matrix is singular.
    pub fn from_view_projection(view_projection: &Matrix4<f64>) -> Option<Frustum> {
        let inverse = view_projection.try_inverse()?;

        let ndc_corners = Bounds::new(-1.0, -1.0, -1.0, 1.0, 1.0, 1.0).corners();
        let mut vertices = [Point3::origin(); 8];
        for (vertex, ndc) in vertices.iter_mut().zip(ndc_corners) {
            *vertex = inverse.transform_point(&ndc);
        }

        let centroid = nalgebra::center(
            &nalgebra::center(&vertices[0], &vertices[7]),
            &nalgebra::center(&vertices[3], &vertices[4]),
        );

        // Corner indices follow Bounds::corners: bit 2 selects max x,
        // bit 1 max y, bit 0 max z.
        let faces = [
            [0, 2, 1], // x min
            [4, 5, 6], // x max
            [0, 1, 4], // y min
            [2, 6, 3], // y max
            [0, 4, 2], // z min
            [1, 3, 5], // z max
        ];
        let planes = faces.map(|[a, b, c]| {
            let plane = Plane::from_triangle(vertices[a], vertices[b], vertices[c]);
            if plane.is_on_negative_side(centroid) {
                plane.flipped()
            } else {
                plane
            }
        });

        Some(Frustum { vertices, planes })
    }

    /// Builds the frustum from a column-major 4x4 matrix slice.
    pub fn from_matrix(matrix: &[f64; 16]) -> Option<Frustum> {
        Self::from_view_projection(&Matrix4::from_column_slice(matrix))
    }

    /// Builds the frustum from a column-major single-precision matrix,
    /// as handed over by typical rendering engines.
    pub fn from_matrix_f32(matrix: &[f32; 16]) -> Option<Frustum> {
        let mut widened = [0f64; 16];
        for (wide, narrow) in widened.iter_mut().zip(matrix) {
            *wide = *narrow as f64;
        }
        Self::from_matrix(&widened)
    }

    /// Frustum/box overlap test.
    ///
    /// Both volumes are convex, so the separating axis theorem applies:
    /// check the box corners against every frustum plane, then the
    /// frustum corners against every box face.
    pub fn intersects_bounds(&self, bounds: &Bounds) -> bool {
        let corners = bounds.corners();
        if self
            .planes
            .iter()
            .any(|plane| corners.iter().all(|corner| plane.is_on_negative_side(*corner)))
        {
            return false;
        }

        if self.vertices.iter().all(|v| v.x < bounds.min_x)
            || self.vertices.iter().all(|v| v.x > bounds.max_x)
            || self.vertices.iter().all(|v| v.y < bounds.min_y)
            || self.vertices.iter().all(|v| v.y > bounds.max_y)
            || self.vertices.iter().all(|v| v.z < bounds.min_z)
            || self.vertices.iter().all(|v| v.z > bounds.max_z)
        {
            return false;
        }
        true
    }
}
