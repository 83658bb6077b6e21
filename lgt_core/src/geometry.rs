//! Geometric primitives the core owns: convex hull and weighted
//! mean/covariance of a 2-D point set. Delaunay triangulation is
//! deliberately *not* grown here beyond a trait and one default
//! implementation - the design notes treat the triangulator as a plug-in
//! dependency, the core only ever consumes its edge list.

use nalgebra::{Matrix2, Point2, Vector2};

pub type Point2f = Point2<f32>;

/// An axis-aligned rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        (self.width.max(0.0)) * (self.height.max(0.0))
    }

    pub fn center(&self) -> Point2f {
        Point2f::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn expanded(&self, margin: f32) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    pub fn contains_point(&self, p: Point2f) -> bool {
        p.x >= self.x && p.x < self.x + self.width && p.y >= self.y && p.y < self.y + self.height
    }

    pub fn is_zero_area(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Convex hull via Andrew's monotone chain. Input order is irrelevant;
/// output is the hull vertices in counter-clockwise order with no
/// duplicate of the closing point.
pub fn convex_hull(points: &[Point2f]) -> Vec<Point2f> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap()
            .then(a.y.partial_cmp(&b.y).unwrap())
    });
    pts.dedup_by(|a, b| (a.x - b.x).abs() < f32::EPSILON && (a.y - b.y).abs() < f32::EPSILON);
    if pts.len() < 3 {
        return pts;
    }

    fn cross(o: Point2f, a: Point2f, b: Point2f) -> f32 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    }

    let mut lower: Vec<Point2f> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<Point2f> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Expands each hull vertex outward from `center` by `margin` pixels.
pub fn expand_hull(hull: &[Point2f], center: Point2f, margin: f32) -> Vec<Point2f> {
    hull.iter()
        .map(|&p| {
            let dir = p - center;
            let len = dir.norm();
            if len < f32::EPSILON {
                p
            } else {
                p + dir.normalize() * margin
            }
        })
        .collect()
}

/// Weighted mean of a point set. Returns `None` for an empty set or when
/// all weights are non-positive.
pub fn weighted_mean(points: &[Point2f], weights: &[f32]) -> Option<Point2f> {
    debug_assert_eq!(points.len(), weights.len());
    let total: f32 = weights.iter().sum();
    if points.is_empty() || total <= 0.0 {
        return None;
    }
    let mut acc = Vector2::zeros();
    for (p, &w) in points.iter().zip(weights) {
        acc += p.coords * w;
    }
    Some(Point2f::from(acc / total))
}

/// 2x2 weighted covariance around `mean`. Returns a zero matrix for fewer
/// than two points.
pub fn weighted_covariance(points: &[Point2f], weights: &[f32], mean: Point2f) -> Matrix2<f32> {
    let total: f32 = weights.iter().sum();
    if points.len() < 2 || total <= 0.0 {
        return Matrix2::zeros();
    }
    let mut cov = Matrix2::zeros();
    for (p, &w) in points.iter().zip(weights) {
        let d = p.coords - mean.coords;
        cov += Matrix2::new(d.x * d.x, d.x * d.y, d.x * d.y, d.y * d.y) * w;
    }
    cov / total
}

/// An undirected constraint graph over `n` indices: `edges[i]` holds `i`'s
/// neighbour indices, symmetric by construction.
#[derive(Debug, Clone, Default)]
pub struct NeighborGraph {
    pub edges: Vec<Vec<usize>>,
}

impl NeighborGraph {
    pub fn new(n: usize) -> Self {
        Self {
            edges: vec![Vec::new(); n],
        }
    }

    fn add_edge(&mut self, a: usize, b: usize) {
        if !self.edges[a].contains(&b) {
            self.edges[a].push(b);
        }
        if !self.edges[b].contains(&a) {
            self.edges[b].push(a);
        }
    }

    /// Builds a symmetrised graph from a triangulator's edge list, then
    /// ensures every node has at least 3 neighbours by appending its
    /// nearest non-neighbour (per the local-CE neighbourhood rule).
    pub fn from_triangulation(points: &[Point2f], edges: &[(usize, usize)]) -> Self {
        let mut g = Self::new(points.len());
        for &(a, b) in edges {
            g.add_edge(a, b);
        }
        for i in 0..points.len() {
            while g.edges[i].len() < 3 && points.len() > g.edges[i].len() + 1 {
                let mut best: Option<(usize, f32)> = None;
                for j in 0..points.len() {
                    if j == i || g.edges[i].contains(&j) {
                        continue;
                    }
                    let d = (points[j] - points[i]).norm();
                    if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                        best = Some((j, d));
                    }
                }
                match best {
                    Some((j, _)) => g.add_edge(i, j),
                    None => break,
                }
            }
        }
        g
    }
}

/// Plug-in seam for Delaunay triangulation: the core only assumes the
/// returned edges triangulate the given distinct points, never a specific
/// triangulator implementation (design note: "treat as a plug-in
/// dependency returning the edge list").
pub trait Triangulator {
    fn triangulate(&self, points: &[Point2f]) -> Vec<(usize, usize)>;
}

/// Incremental Bowyer-Watson triangulator; the default plug-in satisfying
/// [`Triangulator`]. Degenerate inputs (collinear points, duplicates) yield
/// whatever edges the incremental construction manages - callers recover
/// the "≥3 neighbours" invariant via [`NeighborGraph::from_triangulation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BowyerWatsonTriangulator;

#[derive(Clone, Copy)]
struct Triangle(usize, usize, usize);

impl Triangulator for BowyerWatsonTriangulator {
    fn triangulate(&self, points: &[Point2f]) -> Vec<(usize, usize)> {
        let n = points.len();
        if n < 3 {
            return Vec::new();
        }

        // Super-triangle large enough to contain every input point.
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let dx = (max_x - min_x).max(1.0);
        let dy = (max_y - min_y).max(1.0);
        let d = dx.max(dy) * 20.0;
        let mid_x = (min_x + max_x) / 2.0;
        let mid_y = (min_y + max_y) / 2.0;

        let mut pts: Vec<Point2f> = points.to_vec();
        let super_a = pts.len();
        pts.push(Point2f::new(mid_x - d, mid_y - d));
        let super_b = pts.len();
        pts.push(Point2f::new(mid_x + d, mid_y - d));
        let super_c = pts.len();
        pts.push(Point2f::new(mid_x, mid_y + d));

        let mut triangles = vec![Triangle(super_a, super_b, super_c)];

        for i in 0..n {
            let p = pts[i];
            let mut bad = Vec::new();
            for (ti, tri) in triangles.iter().enumerate() {
                if in_circumcircle(p, pts[tri.0], pts[tri.1], pts[tri.2]) {
                    bad.push(ti);
                }
            }
            if bad.is_empty() {
                continue;
            }

            // Boundary of the polygonal hole: edges not shared by two bad triangles.
            let mut edge_count: Vec<((usize, usize), u32)> = Vec::new();
            for &ti in &bad {
                let t = triangles[ti];
                for e in [(t.0, t.1), (t.1, t.2), (t.2, t.0)] {
                    let key = (e.0.min(e.1), e.0.max(e.1));
                    if let Some(entry) = edge_count.iter_mut().find(|(k, _)| *k == key) {
                        entry.1 += 1;
                    } else {
                        edge_count.push((key, 1));
                    }
                }
            }
            let boundary: Vec<(usize, usize)> = edge_count
                .into_iter()
                .filter(|(_, c)| *c == 1)
                .map(|(k, _)| k)
                .collect();

            let mut kept = Vec::with_capacity(triangles.len() - bad.len());
            for (ti, tri) in triangles.into_iter().enumerate() {
                if !bad.contains(&ti) {
                    kept.push(tri);
                }
            }
            for (a, b) in boundary {
                kept.push(Triangle(a, b, i));
            }
            triangles = kept;
        }

        triangles.retain(|t| {
            t.0 != super_a
                && t.0 != super_b
                && t.0 != super_c
                && t.1 != super_a
                && t.1 != super_b
                && t.1 != super_c
                && t.2 != super_a
                && t.2 != super_b
                && t.2 != super_c
        });

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for t in triangles {
            for (a, b) in [(t.0, t.1), (t.1, t.2), (t.2, t.0)] {
                let key = (a.min(b), a.max(b));
                if !edges.contains(&key) {
                    edges.push(key);
                }
            }
        }
        edges
    }
}

fn in_circumcircle(p: Point2f, a: Point2f, b: Point2f, c: Point2f) -> bool {
    let ax = a.x - p.x;
    let ay = a.y - p.y;
    let bx = b.x - p.x;
    let by = b.y - p.y;
    let cx = c.x - p.x;
    let cy = c.y - p.y;

    let det = (ax * ax + ay * ay) * (bx * cy - cx * by)
        - (bx * bx + by * by) * (ax * cy - cx * ay)
        + (cx * cx + cy * cy) * (ax * by - bx * ay);

    // Orientation-dependent sign; since we don't force CCW ordering on
    // construction we check both sides against zero via orientation.
    let orientation = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
    if orientation > 0.0 {
        det > 0.0
    } else {
        det < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hull_of_square_is_itself() {
        let pts = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 1.0),
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
    }

    #[test]
    fn hull_drops_interior_point() {
        let pts = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(2.0, 0.0),
            Point2f::new(2.0, 2.0),
            Point2f::new(0.0, 2.0),
            Point2f::new(1.0, 1.0), // interior
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
    }

    #[test]
    fn weighted_mean_matches_unweighted_for_uniform_weights() {
        let pts = vec![Point2f::new(0.0, 0.0), Point2f::new(2.0, 0.0)];
        let w = vec![1.0, 1.0];
        let mean = weighted_mean(&pts, &w).unwrap();
        assert_relative_eq!(mean.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(mean.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn triangulation_connects_every_point() {
        let pts = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(4.0, 0.0),
            Point2f::new(4.0, 4.0),
            Point2f::new(0.0, 4.0),
            Point2f::new(2.0, 2.0),
        ];
        let tri = BowyerWatsonTriangulator;
        let edges = tri.triangulate(&pts);
        assert!(!edges.is_empty());
        let graph = NeighborGraph::from_triangulation(&pts, &edges);
        for neighbors in &graph.edges {
            assert!(neighbors.len() >= 3);
        }
    }
}
