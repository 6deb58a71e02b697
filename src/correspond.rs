//! Node correspondence between a source and a target shape.
//!
//! A correspondence maps every source node id to a target node id. Either
//! side may name a non-existent part with the [`NULL_TOKEN`] sentinel, which
//! is how growth (source side null) and shrinkage (target side null) are
//! encoded. The mapping itself is produced elsewhere; this crate only
//! consumes it.

use crate::error::CorrespondError;
use crate::structure::{Graph, NULL_TOKEN};

/// An ordered source-to-target node mapping.
#[derive(Debug, Clone, Default)]
pub struct Correspondence {
    pairs: Vec<(String, String)>,
}

impl Correspondence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<S, T>(pairs: impl IntoIterator<Item = (S, T)>) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(s, t)| (s.into(), t.into()))
                .collect(),
        }
    }

    pub fn push(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.pairs.push((source.into(), target.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(s, t)| (s.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Checks that every entry resolves before any task is generated.
    ///
    /// Source ids must name a node present in the active graph; null
    /// placeholders for parts that will grow are inserted there ahead of
    /// time, so this holds for them too. Target ids must name a node in the
    /// target graph unless they carry the null sentinel.
    pub fn validate(&self, active: &Graph, target: &Graph) -> Result<(), CorrespondError> {
        for (source, tgt) in self.iter() {
            let source_is_null = source.contains(NULL_TOKEN);
            let target_is_null = tgt.contains(NULL_TOKEN);

            if source_is_null && target_is_null {
                return Err(CorrespondError::NullToNull(source.to_owned()));
            }

            if !active.has_node(source) {
                return Err(CorrespondError::MissingNode(source.to_owned()));
            }

            if !target_is_null && !target.has_node(tgt) {
                return Err(CorrespondError::MissingNode(tgt.to_owned()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::Node;
    use glam::DVec3;

    fn graph_with(ids: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for id in ids {
            graph
                .add_node(Node::curve(*id, vec![DVec3::ZERO, DVec3::ONE]))
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_validate_accepts_resolvable_entries() {
        let active = graph_with(&["a", "null_b"]);
        let target = graph_with(&["a2", "b2"]);

        let corr = Correspondence::from_pairs([("a", "a2"), ("null_b", "b2")]);
        assert!(corr.validate(&active, &target).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_source() {
        let active = graph_with(&["a"]);
        let target = graph_with(&["a2"]);

        let corr = Correspondence::from_pairs([("ghost", "a2")]);
        assert!(matches!(
            corr.validate(&active, &target),
            Err(CorrespondError::MissingNode(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_validate_rejects_null_to_null() {
        let active = graph_with(&["null_a"]);
        let target = graph_with(&[]);

        let corr = Correspondence::from_pairs([("null_a", "null_b")]);
        assert!(matches!(
            corr.validate(&active, &target),
            Err(CorrespondError::NullToNull(_))
        ));
    }

    #[test]
    fn test_null_target_skips_target_lookup() {
        let active = graph_with(&["a"]);
        let target = graph_with(&[]);

        let corr = Correspondence::from_pairs([("a", "null_a")]);
        assert!(corr.validate(&active, &target).is_ok());
    }
}
