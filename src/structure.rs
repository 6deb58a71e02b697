//! Structural shape graphs.
//!
//! A shape is a set of parts ([`Node`], either a curve or a sheet) connected
//! by [`Link`]s. Each node owns a control lattice, a row-major grid of
//! control points; curves are lattices with a single row. Links attach to
//! their endpoint nodes at parametric coordinates inside the unit square,
//! which lets an attachment survive arbitrary deformation of the underlying
//! lattice.
//!
//! Geometry here is deliberately approximate: parametric evaluation is
//! piecewise-bilinear over the lattice, and coordinate recovery snaps to the
//! nearest lattice point. Exact surface evaluation lives outside this crate.

use glam::{DVec2, DVec3};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Node ids containing this token denote parts that do not exist in the
/// graph they are named in. They are used to detect growth and shrinkage
/// when two graphs are put in correspondence.
pub const NULL_TOKEN: &str = "null";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Curve,
    Sheet,
}

/// A single structural part and its control lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    points: Vec<DVec3>,
    rows: usize,
    cols: usize,
    /// Control points were zeroed out ahead of a growth run.
    pub zero_geometry: bool,
    /// The node is deforming in the current frame.
    pub is_active: bool,
    /// The node belongs to a cut group and must be kept alive pre-emptively
    /// during execution so the structure does not disconnect.
    pub cut_group: bool,
    /// Incident links were re-targeted by the pre-growth collapse.
    pub edges_modified: bool,
}

impl Node {
    /// Creates a curve from a polyline of control points.
    pub fn curve(id: impl Into<String>, points: Vec<DVec3>) -> Self {
        let cols = points.len();
        Self {
            id: id.into(),
            kind: NodeKind::Curve,
            points,
            rows: 1,
            cols,
            zero_geometry: false,
            is_active: false,
            cut_group: false,
            edges_modified: false,
        }
    }

    /// Creates a sheet from a row-major `rows x cols` control lattice.
    pub fn sheet(
        id: impl Into<String>,
        rows: usize,
        cols: usize,
        points: Vec<DVec3>,
    ) -> Result<Self, GraphError> {
        if points.len() != rows * cols {
            return Err(GraphError::LatticeShape {
                expected: rows * cols,
                found: points.len(),
            });
        }

        Ok(Self {
            id: id.into(),
            kind: NodeKind::Sheet,
            points,
            rows,
            cols,
            zero_geometry: false,
            is_active: false,
            cut_group: false,
            edges_modified: false,
        })
    }

    pub fn is_null(&self) -> bool {
        self.id.contains(NULL_TOKEN)
    }

    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    pub fn lattice(&self) -> (&[DVec3], usize, usize) {
        (&self.points, self.rows, self.cols)
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Replaces the control lattice, possibly changing its shape.
    pub(crate) fn set_lattice(&mut self, points: Vec<DVec3>, rows: usize, cols: usize) {
        debug_assert_eq!(points.len(), rows * cols);
        self.points = points;
        self.rows = rows;
        self.cols = cols;
    }

    /// Moves every control point onto `anchor`.
    pub(crate) fn collapse_to(&mut self, anchor: DVec3) {
        for point in &mut self.points {
            *point = anchor;
        }
    }

    /// Evaluates the lattice at a parametric coordinate, `u` across columns
    /// and `v` across rows, both clamped to the unit interval.
    pub fn position_at(&self, coord: DVec2) -> DVec3 {
        sample_lattice(&self.points, self.rows, self.cols, coord.x, coord.y)
    }

    /// Recovers the parametric coordinate of the lattice point nearest to
    /// `pos`. The first nearest point wins on ties.
    pub fn approx_coord(&self, pos: DVec3) -> DVec2 {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;

        for (i, point) in self.points.iter().enumerate() {
            let dist = point.distance_squared(pos);
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }

        let r = best / self.cols.max(1);
        let c = best % self.cols.max(1);

        DVec2::new(axis_param(c, self.cols), axis_param(r, self.rows))
    }

    pub fn centroid(&self) -> DVec3 {
        if self.points.is_empty() {
            return DVec3::ZERO;
        }

        self.points.iter().sum::<DVec3>() / self.points.len() as f64
    }
}

fn axis_param(index: usize, count: usize) -> f64 {
    if count > 1 {
        index as f64 / (count - 1) as f64
    } else {
        0.0
    }
}

/// Bilinear sample of a row-major lattice at `(u, v)` in the unit square.
pub(crate) fn sample_lattice(points: &[DVec3], rows: usize, cols: usize, u: f64, v: f64) -> DVec3 {
    if points.is_empty() {
        return DVec3::ZERO;
    }

    let u = u.clamp(0.0, 1.0) * (cols - 1) as f64;
    let v = v.clamp(0.0, 1.0) * (rows - 1) as f64;

    let c0 = u.floor() as usize;
    let r0 = v.floor() as usize;
    let c1 = (c0 + 1).min(cols - 1);
    let r1 = (r0 + 1).min(rows - 1);
    let fu = u - c0 as f64;
    let fv = v - r0 as f64;

    let p00 = points[r0 * cols + c0];
    let p01 = points[r0 * cols + c1];
    let p10 = points[r1 * cols + c0];
    let p11 = points[r1 * cols + c1];

    p00.lerp(p01, fu).lerp(p10.lerp(p11, fu), fv)
}

/// Resamples a lattice to a new shape with piecewise-bilinear interpolation.
pub(crate) fn resample_lattice(
    points: &[DVec3],
    rows: usize,
    cols: usize,
    new_rows: usize,
    new_cols: usize,
) -> Vec<DVec3> {
    let mut out = Vec::with_capacity(new_rows * new_cols);

    for r in 0..new_rows {
        let v = axis_param(r, new_rows);
        for c in 0..new_cols {
            let u = axis_param(c, new_cols);
            out.push(sample_lattice(points, rows, cols, u, v));
        }
    }

    out
}

/// A connection between two nodes, anchored at a parametric coordinate on
/// each endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub n1: String,
    pub n2: String,
    pub coord1: DVec2,
    pub coord2: DVec2,
    /// Delta interpolated between this link and its correspondent during
    /// execution, refreshed every frame.
    pub blended_delta: DVec3,
    /// Index of the matching link in the other graph, when known.
    pub correspond: Option<usize>,
}

impl Link {
    pub fn new(n1: impl Into<String>, n2: impl Into<String>, coord1: DVec2, coord2: DVec2) -> Self {
        Self {
            n1: n1.into(),
            n2: n2.into(),
            coord1,
            coord2,
            blended_delta: DVec3::ZERO,
            correspond: None,
        }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.n1 == id || self.n2 == id
    }

    /// The id of the endpoint opposite to `id`.
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.n1 == id {
            Some(&self.n2)
        } else if self.n2 == id {
            Some(&self.n1)
        } else {
            None
        }
    }

    pub fn coord_of(&self, id: &str) -> Option<DVec2> {
        if self.n1 == id {
            Some(self.coord1)
        } else if self.n2 == id {
            Some(self.coord2)
        } else {
            None
        }
    }

    pub fn set_coord(&mut self, id: &str, coord: DVec2) {
        if self.n1 == id {
            self.coord1 = coord;
        } else if self.n2 == id {
            self.coord2 = coord;
        }
    }

    /// Re-targets the endpoint currently attached to `old` so it attaches to
    /// `new` at `coord` instead.
    pub fn replace(&mut self, old: &str, new: &str, coord: DVec2) {
        if self.n1 == old {
            self.n1 = new.to_owned();
            self.coord1 = coord;
        } else if self.n2 == old {
            self.n2 = new.to_owned();
            self.coord2 = coord;
        }
    }
}

/// A structural graph: node and link arenas plus named rigid groups.
///
/// Nodes are addressed by string id. Adjacency is derived from the link
/// arena; there is no separate adjacency store to keep in sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Node>,
    links: Vec<Link>,
    /// Ordered sets of node ids that must share timing during scheduling.
    pub groups: Vec<Vec<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.has_node(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }

        self.nodes.push(node);
        Ok(())
    }

    /// Connects two existing nodes and returns the new link's index.
    pub fn add_link(
        &mut self,
        n1: &str,
        n2: &str,
        coord1: DVec2,
        coord2: DVec2,
    ) -> Result<usize, GraphError> {
        for id in [n1, n2] {
            if !self.has_node(id) {
                return Err(GraphError::NodeNotFound(id.to_owned()));
            }
        }

        self.links.push(Link::new(n1, n2, coord1, coord2));
        Ok(self.links.len() - 1)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut [Link] {
        &mut self.links
    }

    pub fn link(&self, index: usize) -> Option<&Link> {
        self.links.get(index)
    }

    /// Indices of all links incident to `id`, in insertion order.
    pub fn links_of(&self, id: &str) -> Vec<usize> {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, l)| l.touches(id))
            .map(|(i, _)| i)
            .collect()
    }

    /// Structural connectivity degree of a node.
    pub fn valence(&self, id: &str) -> usize {
        self.links.iter().filter(|l| l.touches(id)).count()
    }

    /// Whether two nodes share at least one link.
    pub fn linked(&self, a: &str, b: &str) -> bool {
        self.links
            .iter()
            .any(|l| (l.n1 == a && l.n2 == b) || (l.n1 == b && l.n2 == a))
    }

    /// The world position of a link endpoint, evaluated on the current
    /// geometry of the endpoint's node.
    pub fn link_position(&self, index: usize, id: &str) -> Option<DVec3> {
        let link = self.links.get(index)?;
        let coord = link.coord_of(id)?;
        Some(self.node(id)?.position_at(coord))
    }

    /// The current geometric delta carried by a link, from its first
    /// endpoint to its second.
    pub fn link_delta(&self, index: usize) -> Option<DVec3> {
        let link = self.links.get(index)?;
        let p1 = self.link_position(index, &link.n1)?;
        let p2 = self.link_position(index, &link.n2)?;
        Some(p2 - p1)
    }

    /// Whether removing `id` would disconnect its neighborhood, i.e. the
    /// node is an articulation point of the graph.
    pub fn is_cut_node(&self, id: &str) -> bool {
        let neighbors: Vec<&str> = self
            .links
            .iter()
            .filter_map(|l| l.other(id))
            .collect();

        if neighbors.len() < 2 {
            return false;
        }

        // Connectivity of the graph with `id` removed.
        let mut graph = UnGraph::<&str, ()>::default();
        let mut index = std::collections::HashMap::new();

        for node in &self.nodes {
            if node.id != id {
                index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
            }
        }

        for link in &self.links {
            if link.touches(id) {
                continue;
            }
            if let (Some(&a), Some(&b)) = (index.get(link.n1.as_str()), index.get(link.n2.as_str()))
            {
                graph.add_edge(a, b, ());
            }
        }

        let mut components = UnionFind::<usize>::new(graph.node_count());
        for edge in graph.edge_indices() {
            if let Some((a, b)) = graph.edge_endpoints(edge) {
                components.union(a.index(), b.index());
            }
        }

        let roots: Vec<usize> = neighbors
            .iter()
            .filter_map(|n| index.get(n))
            .map(|ix: &NodeIndex| components.find(ix.index()))
            .collect();

        roots.windows(2).any(|w| w[0] != w[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64, z: f64) -> DVec3 {
        DVec3::new(x, y, z)
    }

    fn segment(id: &str, from: DVec3, to: DVec3) -> Node {
        Node::curve(id, vec![from, to])
    }

    #[test]
    fn test_curve_sampling() {
        let node = Node::curve("a", vec![pt(0.0, 0.0, 0.0), pt(2.0, 0.0, 0.0)]);

        assert_eq!(node.position_at(DVec2::new(0.0, 0.0)), pt(0.0, 0.0, 0.0));
        assert_eq!(node.position_at(DVec2::new(0.5, 0.0)), pt(1.0, 0.0, 0.0));
        assert_eq!(node.position_at(DVec2::new(1.0, 0.0)), pt(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_sheet_sampling() {
        let node = Node::sheet(
            "s",
            2,
            2,
            vec![
                pt(0.0, 0.0, 0.0),
                pt(1.0, 0.0, 0.0),
                pt(0.0, 1.0, 0.0),
                pt(1.0, 1.0, 0.0),
            ],
        )
        .unwrap();

        assert_eq!(node.position_at(DVec2::new(0.5, 0.5)), pt(0.5, 0.5, 0.0));
        assert_eq!(node.position_at(DVec2::new(1.0, 1.0)), pt(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_sheet_shape_checked() {
        assert!(Node::sheet("s", 2, 3, vec![DVec3::ZERO; 5]).is_err());
    }

    #[test]
    fn test_approx_coord_roundtrip() {
        let node = Node::curve(
            "a",
            vec![pt(0.0, 0.0, 0.0), pt(1.0, 0.0, 0.0), pt(2.0, 0.0, 0.0)],
        );

        let coord = node.approx_coord(pt(1.9, 0.1, 0.0));
        assert_eq!(coord, DVec2::new(1.0, 0.0));
    }

    #[test]
    fn test_resample_preserves_endpoints() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(3.0, 0.0, 0.0)];
        let out = resample_lattice(&points, 1, 2, 1, 4);

        assert_eq!(out.len(), 4);
        assert_eq!(out[0], pt(0.0, 0.0, 0.0));
        assert_eq!(out[1], pt(1.0, 0.0, 0.0));
        assert_eq!(out[3], pt(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_valence_counts_incident_links() {
        let mut graph = Graph::new();
        for id in ["a", "b", "c"] {
            graph
                .add_node(segment(id, DVec3::ZERO, pt(1.0, 0.0, 0.0)))
                .unwrap();
        }
        graph.add_link("a", "b", DVec2::ZERO, DVec2::ZERO).unwrap();
        graph.add_link("a", "c", DVec2::ZERO, DVec2::ZERO).unwrap();

        assert_eq!(graph.valence("a"), 2);
        assert_eq!(graph.valence("b"), 1);
        assert_eq!(graph.valence("missing"), 0);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = Graph::new();
        graph
            .add_node(segment("a", DVec3::ZERO, DVec3::ZERO))
            .unwrap();

        assert!(
            graph
                .add_node(segment("a", DVec3::ZERO, DVec3::ZERO))
                .is_err()
        );
    }

    #[test]
    fn test_cut_node_detection() {
        // a - b - c: b is an articulation point, a and c are not.
        let mut graph = Graph::new();
        for id in ["a", "b", "c"] {
            graph
                .add_node(segment(id, DVec3::ZERO, pt(1.0, 0.0, 0.0)))
                .unwrap();
        }
        graph.add_link("a", "b", DVec2::ZERO, DVec2::ZERO).unwrap();
        graph.add_link("b", "c", DVec2::ZERO, DVec2::ZERO).unwrap();

        assert!(graph.is_cut_node("b"));
        assert!(!graph.is_cut_node("a"));

        // Closing the triangle removes the articulation.
        graph.add_link("a", "c", DVec2::ZERO, DVec2::ZERO).unwrap();
        assert!(!graph.is_cut_node("b"));
    }
}
