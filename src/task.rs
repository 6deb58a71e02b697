//! Per-part transformation tasks.
//!
//! A [`Task`] owns the transformation of a single node across a local time
//! window on the shared timeline. Its lifecycle is a one-way state machine:
//! *pending* while the global time is ahead of its window, *active* while
//! local progress is inside `[0, 1)`, *done* once progress reaches `1` —
//! never re-entered within a run.
//!
//! The kind of transformation is fixed at construction from the
//! correspondence: a null source grows, a null target shrinks, anything
//! else morphs.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::structure::{Graph, resample_lattice};

/// Default task window length in timeline units.
pub const DEFAULT_LENGTH: i32 = 80;

/// Phase order during scheduling: shrink first, growth last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Shrink,
    Morph,
    Grow,
}

#[derive(Debug, Clone)]
pub struct Task {
    /// Id of the node this task deforms, in the active graph.
    pub node_id: String,
    /// Id of the corresponding node in the target graph, absent for
    /// shrinking parts.
    pub target_id: Option<String>,
    pub kind: TaskKind,
    pub start: i32,
    pub length: i32,
    pub current_time: i32,
    /// Local progress recorded by the last `execute` call.
    pub t: f64,
    pub done: bool,
    prepared: bool,
    from_points: Vec<DVec3>,
    to_points: Vec<DVec3>,
    rows: usize,
    cols: usize,
}

impl Task {
    pub fn new(node_id: impl Into<String>, target_id: Option<String>, kind: TaskKind) -> Self {
        Self {
            node_id: node_id.into(),
            target_id,
            kind,
            start: 0,
            length: DEFAULT_LENGTH,
            current_time: 0,
            t: 0.0,
            done: false,
            prepared: false,
            from_points: Vec::new(),
            to_points: Vec::new(),
            rows: 0,
            cols: 0,
        }
    }

    pub fn end_time(&self) -> i32 {
        self.start + self.length
    }

    pub fn set_start(&mut self, start: i32) {
        self.start = start;
        self.current_time = start;
    }

    pub fn set_length(&mut self, length: i32) {
        self.length = length;
    }

    /// Maps a global timeline position into this task's local progress.
    ///
    /// Returns a negative value before the window opens, the clamped
    /// fraction inside it, and `1.0` from the window's end onward.
    pub fn local_t(&self, global: f64) -> f64 {
        let start = self.start as f64;
        if global < start {
            return -1.0;
        }

        let length = self.length.max(1) as f64;
        ((global - start) / length).min(1.0)
    }

    pub fn is_active(&self, local_time: f64) -> bool {
        (0.0..1.0).contains(&local_time)
    }

    /// One-time setup before the first `execute` call of a run.
    ///
    /// Captures the lattices the task interpolates between: growth starts
    /// from a lattice collapsed onto the attachment anchor and ends at the
    /// target geometry, shrinkage is the time-reverse, and a morph resamples
    /// the target lattice to the source shape. Idempotent.
    pub fn prepare(&mut self, active: &Graph, target: &Graph) {
        if self.prepared {
            return;
        }
        self.prepared = true;

        match self.kind {
            TaskKind::Morph => {
                let (Some(node), Some(tgt)) = (
                    active.node(&self.node_id),
                    self.target_id.as_deref().and_then(|id| target.node(id)),
                ) else {
                    return;
                };

                let (points, rows, cols) = node.lattice();
                let (tp, tr, tc) = tgt.lattice();

                self.from_points = points.to_vec();
                self.to_points = resample_lattice(tp, tr, tc, rows, cols);
                self.rows = rows;
                self.cols = cols;
            }
            TaskKind::Grow => {
                let Some(tgt) = self.target_id.as_deref().and_then(|id| target.node(id)) else {
                    return;
                };

                let (tp, tr, tc) = tgt.lattice();
                let anchor = attachment_anchor(active, &self.node_id);

                self.from_points = vec![anchor; tp.len()];
                self.to_points = tp.to_vec();
                self.rows = tr;
                self.cols = tc;
            }
            TaskKind::Shrink => {
                let Some(node) = active.node(&self.node_id) else {
                    return;
                };

                let (points, rows, cols) = node.lattice();
                let anchor = attachment_anchor(active, &self.node_id);

                self.from_points = points.to_vec();
                self.to_points = vec![anchor; points.len()];
                self.rows = rows;
                self.cols = cols;
            }
        }
    }

    /// Advances internal bookkeeping. `local_time` must be non-decreasing
    /// within a run.
    pub fn execute(&mut self, local_time: f64) {
        self.t = local_time;
        self.current_time = self.start + (local_time * self.length as f64) as i32;

        if local_time >= 1.0 {
            self.done = true;
        }
    }

    /// Writes the interpolated control lattice for `local_time` back into
    /// the active graph.
    pub fn geometry_morph(&self, local_time: f64, active: &mut Graph) {
        if !self.prepared || self.from_points.is_empty() {
            return;
        }

        let t = local_time.clamp(0.0, 1.0);
        let Some(node) = active.node_mut(&self.node_id) else {
            return;
        };

        let points = self
            .from_points
            .iter()
            .zip(&self.to_points)
            .map(|(a, b)| a.lerp(*b, t))
            .collect();

        node.set_lattice(points, self.rows, self.cols);
    }
}

/// The world position a degenerate lattice collapses onto: the contact
/// point with the node's first linked neighbor, or the node centroid when
/// the node is unlinked.
fn attachment_anchor(graph: &Graph, id: &str) -> DVec3 {
    for index in graph.links_of(id) {
        let Some(link) = graph.link(index) else {
            continue;
        };
        if let Some(other) = link.other(id)
            && let Some(pos) = graph.link_position(index, other)
        {
            return pos;
        }
    }

    graph.node(id).map(|n| n.centroid()).unwrap_or(DVec3::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::Node;
    use glam::DVec2;

    fn pt(x: f64) -> DVec3 {
        DVec3::new(x, 0.0, 0.0)
    }

    #[test]
    fn test_local_t_window() {
        let mut task = Task::new("a", None, TaskKind::Shrink);
        task.set_start(10);
        task.set_length(20);

        assert!(task.local_t(5.0) < 0.0);
        assert_eq!(task.local_t(10.0), 0.0);
        assert_eq!(task.local_t(20.0), 0.5);
        assert_eq!(task.local_t(30.0), 1.0);
        assert_eq!(task.local_t(95.0), 1.0);
    }

    #[test]
    fn test_execute_marks_done() {
        let mut task = Task::new("a", None, TaskKind::Shrink);

        task.execute(0.5);
        assert!(!task.done);
        assert_eq!(task.t, 0.5);

        task.execute(1.0);
        assert!(task.done);
    }

    #[test]
    fn test_morph_interpolates_toward_target() {
        let mut active = Graph::new();
        let mut target = Graph::new();
        active
            .add_node(Node::curve("a", vec![pt(0.0), pt(1.0)]))
            .unwrap();
        target
            .add_node(Node::curve("a2", vec![pt(2.0), pt(3.0)]))
            .unwrap();

        let mut task = Task::new("a", Some("a2".into()), TaskKind::Morph);
        task.prepare(&active, &target);

        task.geometry_morph(1.0, &mut active);
        assert_eq!(active.node("a").unwrap().points(), &[pt(2.0), pt(3.0)]);

        task.geometry_morph(0.0, &mut active);
        assert_eq!(active.node("a").unwrap().points(), &[pt(0.0), pt(1.0)]);
    }

    #[test]
    fn test_grow_starts_at_parent_contact() {
        let mut active = Graph::new();
        let mut target = Graph::new();
        active
            .add_node(Node::curve("parent", vec![pt(0.0), pt(4.0)]))
            .unwrap();
        active
            .add_node(Node::curve("null_a", vec![pt(0.0), pt(0.0)]))
            .unwrap();
        active
            .add_link("null_a", "parent", DVec2::ZERO, DVec2::new(0.5, 0.0))
            .unwrap();
        target
            .add_node(Node::curve("a2", vec![pt(2.0), pt(6.0)]))
            .unwrap();

        let mut task = Task::new("null_a", Some("a2".into()), TaskKind::Grow);
        task.prepare(&active, &target);

        // At the window start the part sits at the contact with its parent.
        task.geometry_morph(0.0, &mut active);
        assert_eq!(active.node("null_a").unwrap().points(), &[pt(2.0), pt(2.0)]);

        // At the window end it has reached the target geometry.
        task.geometry_morph(1.0, &mut active);
        assert_eq!(active.node("null_a").unwrap().points(), &[pt(2.0), pt(6.0)]);
    }

    #[test]
    fn test_shrink_collapses_onto_anchor() {
        let mut active = Graph::new();
        let target = Graph::new();
        active
            .add_node(Node::curve("a", vec![pt(0.0), pt(2.0)]))
            .unwrap();
        active
            .add_node(Node::curve("b", vec![pt(2.0), pt(4.0)]))
            .unwrap();
        active
            .add_link("a", "b", DVec2::new(1.0, 0.0), DVec2::ZERO)
            .unwrap();

        let mut task = Task::new("a", None, TaskKind::Shrink);
        task.prepare(&active, &target);

        task.geometry_morph(1.0, &mut active);
        assert_eq!(active.node("a").unwrap().points(), &[pt(2.0), pt(2.0)]);
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let mut active = Graph::new();
        let mut target = Graph::new();
        active
            .add_node(Node::curve("a", vec![pt(0.0), pt(1.0)]))
            .unwrap();
        target
            .add_node(Node::curve("a2", vec![pt(5.0), pt(6.0)]))
            .unwrap();

        let mut task = Task::new("a", Some("a2".into()), TaskKind::Morph);
        task.prepare(&active, &target);

        // Deform, then prepare again: the captured lattices must not move.
        task.geometry_morph(0.5, &mut active);
        task.prepare(&active, &target);
        task.geometry_morph(0.0, &mut active);

        assert_eq!(active.node("a").unwrap().points(), &[pt(0.0), pt(1.0)]);
    }
}
