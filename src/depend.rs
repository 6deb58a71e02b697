//! Transient dependency graphs for phase ordering.
//!
//! Scheduling a shrink or grow phase needs to know which parts can move
//! together and which must wait for their neighbors. Both questions are
//! answered on a throwaway graph whose vertices are the phase's tasks and
//! whose edges mirror the structural adjacency of their underlying nodes:
//! [`split`] separates independent connected components, [`peel`] orders one
//! component into layers by repeatedly stripping its leaves.

use petgraph::stable_graph::{NodeIndex, StableUnGraph};

use crate::structure::Graph;

/// A task handle paired with the structural node id it maps to in the
/// snapshot the phase is ordered against.
pub(crate) type Item<'a> = (usize, &'a str);

/// Partitions tasks into connected components under structural adjacency.
///
/// Components come back in discovery order over the input sequence, and the
/// members of each component keep their input order. Tasks whose nodes are
/// not linked to any other task's node form singleton components.
pub(crate) fn split<'a>(items: &[Item<'a>], graph: &Graph) -> Vec<Vec<Item<'a>>> {
    let mut component_of = vec![usize::MAX; items.len()];
    let mut count = 0;

    for seed in 0..items.len() {
        if component_of[seed] != usize::MAX {
            continue;
        }

        let component = count;
        count += 1;

        let mut queue = vec![seed];
        component_of[seed] = component;

        while let Some(current) = queue.pop() {
            for next in 0..items.len() {
                if component_of[next] == usize::MAX
                    && graph.linked(items[current].1, items[next].1)
                {
                    component_of[next] = component;
                    queue.push(next);
                }
            }
        }
    }

    let mut components = vec![Vec::new(); count];
    for (position, &component) in component_of.iter().enumerate() {
        components[component].push(items[position]);
    }

    components
}

/// Peels one component into layers of simultaneously schedulable tasks.
///
/// Each round removes the current leaves, the tasks whose node has at most
/// one remaining neighbor within the component, and emits them as a layer.
/// A remainder with no leaves (a cycle, or denser) is emitted whole as the
/// final layer, so every round removes at least one task and every task
/// lands in exactly one layer.
pub(crate) fn peel(items: &[Item<'_>], graph: &Graph) -> Vec<Vec<usize>> {
    let mut adjacency = StableUnGraph::<usize, ()>::default();

    let vertices: Vec<NodeIndex> = items
        .iter()
        .map(|&(task, _)| adjacency.add_node(task))
        .collect();

    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if graph.linked(items[i].1, items[j].1) {
                adjacency.add_edge(vertices[i], vertices[j], ());
            }
        }
    }

    let mut layers = Vec::new();

    while adjacency.node_count() > 0 {
        let mut layer: Vec<NodeIndex> = adjacency
            .node_indices()
            .filter(|&ix| adjacency.neighbors(ix).count() <= 1)
            .collect();

        if layer.is_empty() {
            layer = adjacency.node_indices().collect();
        }

        // Keep input order within the layer.
        layer.sort_by_key(|&ix| ix.index());

        layers.push(layer.iter().map(|&ix| adjacency[ix]).collect());

        for ix in layer {
            adjacency.remove_node(ix);
        }
    }

    layers
}
