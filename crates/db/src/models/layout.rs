use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use super::profile::ApplyDelta;

/// Node of a portal layout tree. Node ids are unique within a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LayoutNode")]
pub struct Layout {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renderer: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(flatten)]
    pub kind: LayoutKind,
    #[serde(skip)]
    pub delta_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayoutKind {
    Composite {
        #[serde(default)]
        items: Vec<Arc<Layout>>,
    },
    Coplet {
        coplet_instance_id: String,
    },
}

#[derive(Deserialize)]
struct LayoutNode {
    id: String,
    #[serde(default)]
    renderer: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
    #[serde(flatten)]
    kind: LayoutKind,
}

impl TryFrom<LayoutNode> for Layout {
    type Error = String;

    fn try_from(node: LayoutNode) -> Result<Self, Self::Error> {
        let layout = Layout {
            id: node.id,
            renderer: node.renderer,
            parameters: node.parameters,
            kind: node.kind,
            delta_applied: false,
        };
        match layout.first_duplicate_id() {
            Some(id) => Err(format!("duplicate layout id `{id}`")),
            None => Ok(layout),
        }
    }
}

impl Layout {
    pub fn composite(id: impl Into<String>, items: impl IntoIterator<Item = Layout>) -> Self {
        Self {
            id: id.into(),
            renderer: None,
            parameters: BTreeMap::new(),
            kind: LayoutKind::Composite {
                items: items.into_iter().map(Arc::new).collect(),
            },
            delta_applied: false,
        }
    }

    pub fn coplet(id: impl Into<String>, coplet_instance_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            renderer: None,
            parameters: BTreeMap::new(),
            kind: LayoutKind::Coplet {
                coplet_instance_id: coplet_instance_id.into(),
            },
            delta_applied: false,
        }
    }

    pub fn with_renderer(mut self, renderer: impl Into<String>) -> Self {
        self.renderer = Some(renderer.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn items(&self) -> &[Arc<Layout>] {
        match &self.kind {
            LayoutKind::Composite { items } => items,
            LayoutKind::Coplet { .. } => &[],
        }
    }

    pub fn coplet_instance_id(&self) -> Option<&str> {
        match &self.kind {
            LayoutKind::Coplet { coplet_instance_id } => Some(coplet_instance_id),
            LayoutKind::Composite { .. } => None,
        }
    }

    /// Depth-first search below (and including) this node.
    pub fn find(self: &Arc<Self>, id: &str) -> Option<Arc<Layout>> {
        if self.id == id {
            return Some(Arc::clone(self));
        }
        self.items().iter().find_map(|item| item.find(id))
    }

    /// Every node of the tree keyed by id, the root included.
    pub fn index(self: &Arc<Self>) -> HashMap<String, Arc<Layout>> {
        let mut index = HashMap::new();
        Self::index_into(self, &mut index);
        index
    }

    fn index_into(node: &Arc<Layout>, index: &mut HashMap<String, Arc<Layout>>) {
        index.insert(node.id.clone(), Arc::clone(node));
        for item in node.items() {
            Self::index_into(item, index);
        }
    }

    /// Equal as stored, ignoring merge bookkeeping.
    pub fn same_content(&self, other: &Layout) -> bool {
        self.id == other.id
            && self.renderer == other.renderer
            && self.parameters == other.parameters
            && match (&self.kind, &other.kind) {
                (LayoutKind::Composite { items: ours }, LayoutKind::Composite { items: theirs }) => {
                    ours.len() == theirs.len()
                        && ours
                            .iter()
                            .zip(theirs)
                            .all(|(a, b)| Arc::ptr_eq(a, b) || a.same_content(b))
                }
                (
                    LayoutKind::Coplet { coplet_instance_id: ours },
                    LayoutKind::Coplet { coplet_instance_id: theirs },
                ) => ours == theirs,
                _ => false,
            }
    }

    fn first_duplicate_id(&self) -> Option<String> {
        let mut seen = HashSet::new();
        self.find_duplicate(&mut seen)
    }

    fn find_duplicate<'a>(&'a self, seen: &mut HashSet<&'a str>) -> Option<String> {
        if !seen.insert(self.id.as_str()) {
            return Some(self.id.clone());
        }
        self.items().iter().find_map(|item| item.find_duplicate(seen))
    }

    fn collect_ids(&self, ids: &mut HashSet<String>) {
        ids.insert(self.id.clone());
        for item in self.items() {
            item.collect_ids(ids);
        }
    }

    fn collect_nodes<'a>(&'a self, nodes: &mut HashMap<&'a str, &'a Layout>) {
        nodes.insert(&self.id, self);
        for item in self.items() {
            item.collect_nodes(nodes);
        }
    }

    fn collect_shared<'a>(node: &'a Arc<Layout>, nodes: &mut HashMap<&'a str, &'a Arc<Layout>>) {
        nodes.insert(&node.id, node);
        for item in node.items() {
            Self::collect_shared(item, nodes);
        }
    }

    /// Whether `change` would alter anything: a renderer, parameters, or items
    /// the tree does not know yet. Nodes that merely spell out the path to a
    /// deeper change are not changes themselves.
    fn is_effective_change(change: &Layout, known: &HashSet<String>) -> bool {
        change.renderer.is_some()
            || !change.parameters.is_empty()
            || change.items().iter().any(|item| !known.contains(&item.id))
    }

    fn is_affected_by(&self, changes: &HashMap<&str, &Layout>, known: &HashSet<String>) -> bool {
        changes
            .get(self.id.as_str())
            .is_some_and(|change| Self::is_effective_change(change, known))
            || self
                .items()
                .iter()
                .any(|item| item.is_affected_by(changes, known))
    }

    fn apply_changes(&mut self, changes: &HashMap<&str, &Layout>, known: &HashSet<String>) -> bool {
        let mut touched = false;

        if let LayoutKind::Composite { items } = &mut self.kind {
            for item in items.iter_mut() {
                if item.is_affected_by(changes, known) {
                    touched |= Arc::make_mut(item).apply_changes(changes, known);
                }
            }
        }

        if let Some(change) = changes
            .get(self.id.as_str())
            .filter(|change| Self::is_effective_change(change, known))
        {
            self.merge_fields(change, known);
            touched = true;
        }

        if touched {
            self.delta_applied = true;
        }
        touched
    }

    fn merge_fields(&mut self, change: &Layout, known: &HashSet<String>) {
        if let Some(renderer) = &change.renderer {
            self.renderer = Some(renderer.clone());
        }
        for (name, value) in &change.parameters {
            self.parameters.insert(name.clone(), value.clone());
        }
        if let LayoutKind::Composite { items } = &mut self.kind {
            for added in change.items().iter().filter(|item| !known.contains(&item.id)) {
                let mut added = Layout::clone(added);
                added.delta_applied = true;
                items.push(Arc::new(added));
            }
        }
    }

    fn relink(&mut self, originals: &HashMap<&str, &Arc<Layout>>) {
        let LayoutKind::Composite { items } = &mut self.kind else {
            return;
        };
        for item in items.iter_mut() {
            if item.delta_applied {
                Arc::make_mut(item).relink(originals);
            } else if let Some(original) = originals.get(item.id.as_str()) {
                *item = Arc::clone(original);
            }
        }
    }
}

impl ApplyDelta for Layout {
    /// Delta nodes are matched to base nodes by id anywhere in the tree.
    fn apply_delta(&mut self, delta: &Self) -> bool {
        let mut changes = HashMap::new();
        delta.collect_nodes(&mut changes);
        let mut known = HashSet::new();
        self.collect_ids(&mut known);

        self.apply_changes(&changes, &known)
    }

    fn adjust_references(&mut self, baseline: &Self) {
        let mut originals = HashMap::new();
        for item in baseline.items() {
            Self::collect_shared(item, &mut originals);
        }
        self.relink(&originals);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn page() -> Layout {
        Layout::composite(
            "root",
            [
                Layout::composite(
                    "left",
                    [Layout::coplet("news-frame", "news-1").with_parameter("size", "normal")],
                ),
                Layout::composite("right", [Layout::coplet("weather-frame", "weather-1")]),
            ],
        )
        .with_renderer("columns")
    }

    #[test]
    fn delta_changes_nested_node_and_copies_its_path() {
        let base = page();
        let mut merged = base.clone();
        let delta = Layout::composite(
            "root",
            [Layout::composite(
                "left",
                [Layout::coplet("news-frame", "news-1").with_parameter("size", "max")],
            )],
        );

        assert!(merged.apply_delta(&delta));

        let news = Arc::new(merged.clone()).find("news-frame").unwrap();
        assert_eq!(news.parameters["size"], "max");
        assert!(news.delta_applied);
        assert!(merged.delta_applied);

        // The untouched column is still the baseline's node.
        assert!(Arc::ptr_eq(&base.items()[1], &merged.items()[1]));
        assert!(!Arc::ptr_eq(&base.items()[0], &merged.items()[0]));
        assert_eq!(
            Arc::new(base).find("news-frame").unwrap().parameters["size"],
            "normal"
        );
    }

    #[test]
    fn structural_delta_nodes_are_not_changes() {
        let mut merged = page();
        let delta = Layout::composite("root", [Layout::composite("left", [])]);

        assert!(!merged.apply_delta(&delta));
        assert!(!merged.delta_applied);
    }

    #[test]
    fn delta_can_add_items() {
        let mut merged = page();
        let delta = Layout::composite(
            "root",
            [Layout::composite("right", [Layout::coplet("stocks-frame", "stocks-1")])],
        );

        assert!(merged.apply_delta(&delta));

        let right = &merged.items()[1];
        assert_eq!(right.items().len(), 2);
        assert_eq!(right.items()[1].coplet_instance_id(), Some("stocks-1"));
        assert!(right.items()[1].delta_applied);
    }

    #[test]
    fn adjust_references_relinks_copied_subtrees() {
        let base = page();
        // Deep copy: no node shares an Arc with the baseline.
        let mut merged: Layout =
            serde_yaml_ng::from_str(&serde_yaml_ng::to_string(&base).unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&base.items()[1], &merged.items()[1]));

        merged.apply_delta(&Layout::composite(
            "root",
            [Layout::composite("left", []).with_parameter("width", "30%")],
        ));
        merged.adjust_references(&base);

        assert!(Arc::ptr_eq(&base.items()[1], &merged.items()[1]));
        assert!(!Arc::ptr_eq(&base.items()[0], &merged.items()[0]));
        // Below a changed node, untouched children are relinked too.
        assert!(Arc::ptr_eq(&base.items()[0].items()[0], &merged.items()[0].items()[0]));
    }

    #[test]
    fn yaml_shape() {
        let yaml = r#"
id: root
type: composite
renderer: columns
items:
  - id: news-frame
    type: coplet
    coplet_instance_id: news-1
    parameters:
      size: max
"#;
        let layout: Layout = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(layout.renderer.as_deref(), Some("columns"));
        assert_eq!(layout.items()[0].coplet_instance_id(), Some("news-1"));
        assert_eq!(layout.items()[0].parameters["size"], "max");
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let yaml = r#"
id: root
type: composite
items:
  - id: left
    type: composite
    items:
      - id: frame
        type: coplet
        coplet_instance_id: news-1
  - id: frame
    type: coplet
    coplet_instance_id: weather-1
"#;
        let err = serde_yaml_ng::from_str::<Layout>(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate layout id `frame`"), "{err}");
    }

    #[test]
    fn same_content_ignores_merge_state() {
        let base = page();
        let mut merged = base.clone();
        merged.apply_delta(&Layout::composite("root", [Layout::composite("left", [])]));
        merged.delta_applied = true;

        assert!(base.same_content(&merged));
        assert!(!base.same_content(&page().with_renderer("rows")));
    }

    #[test]
    fn index_covers_every_node() {
        let root = Arc::new(page());
        let index = root.index();

        assert_eq!(index.len(), 5);
        assert!(Arc::ptr_eq(&index["root"], &root));
        assert!(Arc::ptr_eq(&index["weather-frame"], &root.items()[1].items()[0]));
    }
}
