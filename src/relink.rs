//! Link attachment maintenance under deformation.
//!
//! As tasks deform control lattices, the parametric coordinates links were
//! attached with drift away from the true contact points between parts.
//! [`execute`] re-anchors every link endpoint whose node is currently
//! deforming; endpoints of inactive nodes are left untouched. It runs once
//! before a run starts, to snap freshly zeroed parts into a valid initial
//! position, and once per frame after geometry morphing.

use std::collections::HashSet;

use glam::DVec2;

use crate::structure::{Graph, NULL_TOKEN};

/// Recomputes attachment coordinates for every link endpoint whose node is
/// in the active set.
///
/// The new coordinate approximates the contact point with the opposite
/// endpoint's node, evaluated on current geometry. Contact points are
/// gathered before any coordinate is written so updates within one call do
/// not feed each other.
pub(crate) fn execute(graph: &mut Graph, active: &HashSet<String>) {
    let mut updates: Vec<(usize, String, DVec2)> = Vec::new();

    for (index, link) in graph.links().iter().enumerate() {
        for (this_id, other_id) in [(&link.n1, &link.n2), (&link.n2, &link.n1)] {
            if !active.contains(this_id.as_str()) {
                continue;
            }

            let Some(contact) = graph.link_position(index, other_id) else {
                continue;
            };
            let Some(node) = graph.node(this_id) else {
                continue;
            };

            updates.push((index, this_id.clone(), node.approx_coord(contact)));
        }
    }

    for (index, id, coord) in updates {
        graph.links_mut()[index].set_coord(&id, coord);
    }
}

/// Collapses multi-attachment of to-be-grown parts to a single parent.
///
/// Growth assumes exactly one parent attachment. Every null node connected
/// to two or more existing neighbors keeps only the link to the neighbor
/// with the highest structural valence; every other incident link is
/// re-targeted to that neighbor at its corresponding coordinate, and the
/// node is marked as having modified edges. Cut nodes are skipped, their
/// attachments hold the structure together.
pub(crate) fn collapse_to_single_parent(graph: &mut Graph) {
    let null_ids: Vec<String> = graph
        .nodes()
        .iter()
        .filter(|n| n.is_null())
        .map(|n| n.id.clone())
        .collect();

    for id in null_ids {
        if graph.is_cut_node(&id) {
            continue;
        }

        // Links whose opposite endpoint already exists, with its valence.
        let mut existing: Vec<(usize, usize)> = Vec::new();
        for index in graph.links_of(&id) {
            let Some(other) = graph.link(index).and_then(|l| l.other(&id)) else {
                continue;
            };
            if other.contains(NULL_TOKEN) {
                continue;
            }
            let valence = graph.valence(other);
            existing.push((index, valence));
        }

        if existing.len() < 2 {
            continue;
        }

        let mut keep = existing[0];
        for &candidate in &existing[1..] {
            if candidate.1 > keep.1 {
                keep = candidate;
            }
        }

        let (kept_other, kept_coord) = {
            let link = &graph.links()[keep.0];
            let Some(other) = link.other(&id) else {
                continue;
            };
            let Some(coord) = link.coord_of(other) else {
                continue;
            };
            (other.to_owned(), coord)
        };

        for index in graph.links_of(&id) {
            if index == keep.0 {
                continue;
            }
            let Some(other) = graph.link(index).and_then(|l| l.other(&id)).map(str::to_owned)
            else {
                continue;
            };
            graph.links_mut()[index].replace(&other, &kept_other, kept_coord);
        }

        if let Some(node) = graph.node_mut(&id) {
            node.edges_modified = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::Node;
    use glam::DVec3;

    fn pt(x: f64) -> DVec3 {
        DVec3::new(x, 0.0, 0.0)
    }

    #[test]
    fn test_inactive_endpoints_untouched() {
        let mut graph = Graph::new();
        graph
            .add_node(Node::curve("a", vec![pt(0.0), pt(2.0)]))
            .unwrap();
        graph
            .add_node(Node::curve("b", vec![pt(2.0), pt(4.0)]))
            .unwrap();
        graph
            .add_link("a", "b", DVec2::new(0.25, 0.0), DVec2::new(0.75, 0.0))
            .unwrap();

        let active = HashSet::from(["a".to_owned()]);
        execute(&mut graph, &active);

        let link = &graph.links()[0];
        // The active endpoint snapped to the contact with "b".
        assert_eq!(link.coord1, DVec2::new(1.0, 0.0));
        // The inactive endpoint kept its exact coordinate.
        assert_eq!(link.coord2, DVec2::new(0.75, 0.0));
    }

    #[test]
    fn test_execute_without_active_nodes_is_noop() {
        let mut graph = Graph::new();
        graph
            .add_node(Node::curve("a", vec![pt(0.0), pt(2.0)]))
            .unwrap();
        graph
            .add_node(Node::curve("b", vec![pt(2.0), pt(4.0)]))
            .unwrap();
        graph
            .add_link("a", "b", DVec2::new(0.25, 0.0), DVec2::new(0.75, 0.0))
            .unwrap();

        let before = graph.links().to_vec();
        execute(&mut graph, &HashSet::new());

        assert_eq!(graph.links(), &before[..]);
    }

    #[test]
    fn test_collapse_keeps_highest_valence_parent() {
        let mut graph = Graph::new();
        graph
            .add_node(Node::curve("null_x", vec![pt(0.0), pt(0.0)]))
            .unwrap();
        graph
            .add_node(Node::curve("a", vec![pt(0.0), pt(1.0)]))
            .unwrap();
        graph
            .add_node(Node::curve("b", vec![pt(1.0), pt(2.0)]))
            .unwrap();
        graph
            .add_node(Node::curve("c", vec![pt(2.0), pt(3.0)]))
            .unwrap();

        // "b" has the highest valence: the null part plus both ends.
        graph
            .add_link("null_x", "a", DVec2::ZERO, DVec2::ZERO)
            .unwrap();
        graph
            .add_link("null_x", "b", DVec2::ZERO, DVec2::new(0.5, 0.0))
            .unwrap();
        graph.add_link("a", "b", DVec2::ZERO, DVec2::ZERO).unwrap();
        graph.add_link("b", "c", DVec2::ZERO, DVec2::ZERO).unwrap();

        collapse_to_single_parent(&mut graph);

        // The link that used to reach "a" now reaches "b" at the kept
        // link's coordinate.
        let moved = &graph.links()[0];
        assert_eq!(moved.other("null_x"), Some("b"));
        assert_eq!(moved.coord_of("b"), Some(DVec2::new(0.5, 0.0)));
        assert!(graph.node("null_x").unwrap().edges_modified);
    }

    #[test]
    fn test_collapse_ignores_single_attachment() {
        let mut graph = Graph::new();
        graph
            .add_node(Node::curve("null_x", vec![pt(0.0), pt(0.0)]))
            .unwrap();
        graph
            .add_node(Node::curve("a", vec![pt(0.0), pt(1.0)]))
            .unwrap();
        graph
            .add_link("null_x", "a", DVec2::ZERO, DVec2::ZERO)
            .unwrap();

        let before = graph.links().to_vec();
        collapse_to_single_parent(&mut graph);

        assert_eq!(graph.links(), &before[..]);
        assert!(!graph.node("null_x").unwrap().edges_modified);
    }
}
