//! Stage Declarations
//!
//! The raw, unvalidated description of a stage graph as supplied by the
//! caller. Nothing here checks the declaration; that is the resolver's job.
//!
//! The serialized form is the declaration format used by configuration files:
//!
//! ```json
//! { "nodes": { "filter": {}, "sort": { "dependsOn": ["filter"] } } }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// A single stage declaration: the stages it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageNode<S> {
    /// Predecessor stages. Empty for a root stage.
    #[serde(default = "Vec::new", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<S>,
}

impl<S> StageNode<S> {
    /// A root stage with no dependencies.
    pub fn root() -> Self {
        Self {
            depends_on: Vec::new(),
        }
    }

    /// A stage depending on `deps`, in the given order.
    pub fn depends_on<I>(deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        Self {
            depends_on: deps.into_iter().collect(),
        }
    }
}

impl<S> Default for StageNode<S> {
    fn default() -> Self {
        Self::root()
    }
}

/// A raw stage graph declaration.
///
/// Entries keep their insertion order, which becomes the declaration order
/// used to break ties in the topological sort. Duplicate keys are accepted
/// here and rejected during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "GraphRepr<S>",
    into = "GraphRepr<S>",
    bound(
        serialize = "S: Stage + Serialize",
        deserialize = "S: Stage + Deserialize<'de>"
    )
)]
pub struct StageGraph<S> {
    nodes: Vec<(S, StageNode<S>)>,
}

impl<S: Stage> StageGraph<S> {
    /// Create an empty declaration.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Builder-style [`declare`](Self::declare).
    pub fn stage<I>(mut self, stage: S, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        self.declare(stage, depends_on);
        self
    }

    /// Append a stage declaration.
    pub fn declare<I>(&mut self, stage: S, depends_on: I)
    where
        I: IntoIterator<Item = S>,
    {
        self.nodes.push((stage, StageNode::depends_on(depends_on)));
    }

    /// Declared entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&S, &StageNode<S>)> {
        self.nodes.iter().map(|(stage, node)| (stage, node))
    }

    /// Number of declared entries, counting duplicates.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entries as a map. Later duplicates overwrite earlier ones.
    pub(crate) fn into_nodes(self) -> IndexMap<S, StageNode<S>> {
        self.nodes.into_iter().collect()
    }
}

impl<S: Stage> Default for StageGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stage> FromIterator<(S, StageNode<S>)> for StageGraph<S> {
    fn from_iter<T: IntoIterator<Item = (S, StageNode<S>)>>(iter: T) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl<S: Stage> From<IndexMap<S, StageNode<S>>> for StageGraph<S> {
    fn from(nodes: IndexMap<S, StageNode<S>>) -> Self {
        nodes.into_iter().collect()
    }
}

/// Wire shape of [`StageGraph`].
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Stage + Serialize",
    deserialize = "S: Stage + Deserialize<'de>"
))]
struct GraphRepr<S> {
    nodes: IndexMap<S, StageNode<S>>,
}

impl<S: Stage> From<GraphRepr<S>> for StageGraph<S> {
    fn from(repr: GraphRepr<S>) -> Self {
        repr.nodes.into()
    }
}

impl<S: Stage> From<StageGraph<S>> for GraphRepr<S> {
    fn from(graph: StageGraph<S>) -> Self {
        Self {
            nodes: graph.into_nodes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_declaration_order() {
        let graph = StageGraph::new()
            .stage("sort", ["filter"])
            .stage("filter", [])
            .stage("group", ["sort"]);

        let order: Vec<_> = graph.iter().map(|(stage, _)| *stage).collect();
        assert_eq!(order, vec!["sort", "filter", "group"]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn builder_accepts_duplicates() {
        let graph = StageGraph::new().stage("filter", []).stage("filter", []);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn deserializes_declaration_format() {
        let json = r#"{
            "nodes": {
                "filter": {},
                "sort": { "dependsOn": ["filter"] },
                "group": { "dependsOn": ["sort"] }
            }
        }"#;
        let graph: StageGraph<String> = serde_json::from_str(json).unwrap();

        let entries: Vec<_> = graph
            .iter()
            .map(|(stage, node)| (stage.as_str(), node.depends_on.len()))
            .collect();
        assert_eq!(entries, vec![("filter", 0), ("sort", 1), ("group", 1)]);
    }

    #[test]
    fn deserializes_integer_keys_without_dependency_lists() {
        let json = r#"{ "nodes": { "0": {}, "1": { "dependsOn": [0] } } }"#;
        let graph: StageGraph<u32> = serde_json::from_str(json).unwrap();

        let entries: Vec<_> = graph
            .iter()
            .map(|(stage, node)| (*stage, node.depends_on.clone()))
            .collect();
        assert_eq!(entries, vec![(0, vec![]), (1, vec![0])]);
    }

    #[test]
    fn serializes_without_empty_dependency_lists() {
        let graph = StageGraph::new()
            .stage("filter".to_string(), [])
            .stage("sort".to_string(), ["filter".to_string()]);

        let json = serde_json::to_string(&graph).unwrap();
        assert_eq!(
            json,
            r#"{"nodes":{"filter":{},"sort":{"dependsOn":["filter"]}}}"#
        );
    }
}
