use std::collections::{BTreeMap, BTreeSet};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::dns::name;

/// Reverse-label tree
///
/// A prefix tree over domain labels read right to left, so `www.macys.com`
/// and `m.macys.com` share the `com -> macys` path. Every node carries its
/// own set of leaf payloads (a CNAME in the URL tree, a hostname in the
/// CNAME tree) next to its label-keyed children.
///
/// Serialized, leaves turn into `"payload": null` entries sitting beside the
/// child labels of the same node:
///
/// ```text
/// { "com": { "macys": { "www": { "www.macys.com.edgekey.net": null } } } }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabelTree {
    root: Node,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Node {
    children: BTreeMap<String, Node>,
    leaves: BTreeSet<String>,
}

/// A leaf whose payload is byte-identical to a child label of the same node.
/// Both survive in the tree; only the interior node makes it into the
/// serialized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub path: String,
    pub leaf: String,
}

impl LabelTree {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// File `leaf` under the node for `name`, creating interior nodes as
    /// needed. Returns false if the pair was already present or `name` has
    /// no labels.
    pub fn insert(&mut self, name: &str, leaf: &str) -> bool {
        let labels = name::reverse_labels(name);
        if labels.is_empty() || leaf.is_empty() {
            return false;
        }

        let mut node = &mut self.root;
        for label in labels {
            node = node.children.entry(label).or_default();
        }
        node.leaves.insert(leaf.to_string())
    }

    /// Fold every (path, leaf) pair of `other` into this tree.
    pub fn merge(&mut self, other: &LabelTree) {
        self.root.merge(&other.root);
    }

    /// Leaves filed directly under `name`, if the node exists.
    #[cfg(test)]
    pub fn leaves(&self, name: &str) -> Option<&BTreeSet<String>> {
        let mut node = &self.root;
        for label in name::reverse_labels(name) {
            node = node.children.get(&label)?;
        }
        Some(&node.leaves)
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && self.root.leaves.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }

    pub fn collisions(&self) -> Vec<Collision> {
        let mut found = Vec::new();
        let mut path = Vec::new();
        self.root.collect_collisions(&mut path, &mut found);
        found
    }

    /// JSON document with sorted keys and a 4-space indent.
    pub fn to_json(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl Node {
    fn merge(&mut self, other: &Node) {
        self.leaves.extend(other.leaves.iter().cloned());
        for (label, child) in &other.children {
            self.children.entry(label.clone()).or_default().merge(child);
        }
    }

    fn leaf_count(&self) -> usize {
        self.leaves.len() + self.children.values().map(Node::leaf_count).sum::<usize>()
    }

    fn collect_collisions(&self, path: &mut Vec<String>, found: &mut Vec<Collision>) {
        for leaf in &self.leaves {
            if self.children.contains_key(leaf) {
                let forward: Vec<&str> = path.iter().rev().map(String::as_str).collect();
                found.push(Collision {
                    path: forward.join("."),
                    leaf: leaf.clone(),
                });
            }
        }
        for (label, child) in &self.children {
            path.push(label.clone());
            child.collect_collisions(path, found);
            path.pop();
        }
    }
}

impl Serialize for LabelTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.root.serialize(serializer)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Leaves first so a child with the same key replaces them.
        let mut entries: BTreeMap<&str, Option<&Node>> = BTreeMap::new();
        for leaf in &self.leaves {
            entries.insert(leaf.as_str(), None);
        }
        for (label, child) in &self.children {
            entries.insert(label.as_str(), Some(child));
        }

        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, &value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_is_idempotent() {
        let mut once = LabelTree::new();
        assert!(once.insert("www.macys.com", "www.macys.com.edgekey.net"));

        let mut twice = LabelTree::new();
        assert!(twice.insert("www.macys.com", "www.macys.com.edgekey.net"));
        assert!(!twice.insert("WWW.Macys.com.", "www.macys.com.edgekey.net"));

        assert_eq!(once, twice);
        assert_eq!(twice.leaf_count(), 1);
    }

    #[test]
    fn test_shared_suffix_shares_nodes() {
        let mut tree = LabelTree::new();
        tree.insert("www.macys.com", "www.macys.com.edgekey.net");
        tree.insert("m.macys.com", "www.macys.moovdns.net");

        assert_eq!(tree.root.children.len(), 1);
        let com = &tree.root.children["com"];
        assert_eq!(com.children.len(), 1);
        let macys = &com.children["macys"];
        assert_eq!(macys.children.keys().collect::<Vec<_>>(), vec!["m", "www"]);
        assert!(macys.leaves.is_empty());
    }

    #[test]
    fn test_leaves_sit_beside_children() {
        let mut tree = LabelTree::new();
        tree.insert("macys.com", "macys.com.cdn.net");
        tree.insert("www.macys.com", "e108.a.akamaiedge.net");

        let leaves = tree.leaves("macys.com").unwrap();
        assert!(leaves.contains("macys.com.cdn.net"));
        assert!(tree.leaves("www.macys.com").unwrap().contains("e108.a.akamaiedge.net"));
        assert!(tree.leaves("m.macys.com").is_none());
    }

    #[test]
    fn test_empty_name_not_inserted() {
        let mut tree = LabelTree::new();
        assert!(!tree.insert("", "x.net"));
        assert!(!tree.insert(".", "x.net"));
        assert!(!tree.insert("www.macys.com", ""));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_merge_is_union_of_insertions() {
        let mut left = LabelTree::new();
        left.insert("www.macys.com", "www.macys.com.edgekey.net");
        left.insert("m.macys.com", "www.macys.moovdns.net");

        let mut right = LabelTree::new();
        right.insert("www.macys.com", "e108.a.akamaiedge.net");
        right.insert("www.macys.com", "www.macys.com.edgekey.net");
        right.insert("www.target.com", "target.gslb.net");

        let mut expected = LabelTree::new();
        expected.insert("www.macys.com", "www.macys.com.edgekey.net");
        expected.insert("m.macys.com", "www.macys.moovdns.net");
        expected.insert("www.macys.com", "e108.a.akamaiedge.net");
        expected.insert("www.target.com", "target.gslb.net");

        left.merge(&right);
        assert_eq!(left, expected);
        assert_eq!(left.leaf_count(), 4);
    }

    #[test]
    fn test_json_shape() {
        let mut tree = LabelTree::new();
        tree.insert("www.macys.com", "www.macys.com.edgekey.net");
        tree.insert("www.macys.com", "e108.a.akamaiedge.net");
        tree.insert("m.macys.com", "www.macys.moovdns.net");

        let doc: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();
        assert_eq!(
            doc,
            json!({
                "com": {
                    "macys": {
                        "www": {
                            "www.macys.com.edgekey.net": null,
                            "e108.a.akamaiedge.net": null
                        },
                        "m": {
                            "www.macys.moovdns.net": null
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_json_sorted_with_four_space_indent() {
        let mut tree = LabelTree::new();
        tree.insert("edge.example.com.net", "www.example.com");
        tree.insert("b.example.com.net", "m.example.com");

        let expected = "{\n    \"net\": {\n        \"com\": {\n            \"example\": {\n                \"b\": {\n                    \"m.example.com\": null\n                },\n                \"edge\": {\n                    \"www.example.com\": null\n                }\n            }\n        }\n    }\n}";
        assert_eq!(tree.to_json().unwrap(), expected);
    }

    #[test]
    fn test_empty_tree_serializes_to_empty_object() {
        assert_eq!(LabelTree::new().to_json().unwrap(), "{}");
    }

    #[test]
    fn test_collision_keeps_interior_node_in_document() {
        let mut tree = LabelTree::new();
        tree.insert("a.com", "b");
        tree.insert("b.a.com", "z.net");

        assert_eq!(
            tree.collisions(),
            vec![Collision {
                path: "a.com".into(),
                leaf: "b".into(),
            }]
        );
        // The tree still knows both.
        assert!(tree.leaves("a.com").unwrap().contains("b"));

        let doc: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();
        assert_eq!(doc, json!({ "com": { "a": { "b": { "z.net": null } } } }));
    }
}
