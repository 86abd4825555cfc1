use std::collections::BTreeMap;

use ndarray::{Array, ArrayD, Dimension};
use serde::{Deserialize, Serialize};

/// A recursively nested mapping whose leaves are fixed-shape `f64` arrays.
///
/// Keys are kept sorted so traversal order is deterministic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResultTree {
    Leaf(ArrayD<f64>),
    Node(BTreeMap<String, ResultTree>),
}

impl Default for ResultTree {
    fn default() -> Self {
        Self::Node(BTreeMap::new())
    }
}

impl ResultTree {
    /// An empty mapping. Also the sentinel dataset of a merge with no shards.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn leaf<D: Dimension>(array: Array<f64, D>) -> Self {
        Self::Leaf(array.into_dyn())
    }

    /// Builder-style insert of a child under `key`. A leaf receiver is
    /// replaced by a fresh mapping.
    pub fn with(mut self, key: impl Into<String>, child: ResultTree) -> Self {
        if let Self::Leaf(_) = self {
            self = Self::empty();
        }
        if let Self::Node(map) = &mut self {
            map.insert(key.into(), child);
        }
        self
    }

    /// Look up a child by `/`-separated key path.
    pub fn get(&self, path: &str) -> Option<&ResultTree> {
        path.split('/')
            .filter(|k| !k.is_empty())
            .try_fold(self, |node, key| match node {
                Self::Node(map) => map.get(key),
                Self::Leaf(_) => None,
            })
    }

    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            Self::Leaf(array) => Some(array),
            Self::Node(_) => None,
        }
    }

    /// True for a mapping with no keys.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Node(map) if map.is_empty())
    }

    /// Every leaf as `(key path, shape)`, in key order.
    pub fn leaf_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut out = Vec::new();
        collect_shapes(self, String::new(), &mut out);
        out
    }
}

fn collect_shapes(tree: &ResultTree, path: String, out: &mut Vec<(String, Vec<usize>)>) {
    match tree {
        ResultTree::Leaf(array) => out.push((path, array.shape().to_vec())),
        ResultTree::Node(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}/{key}")
                };
                collect_shapes(child, child_path, out);
            }
        }
    }
}
