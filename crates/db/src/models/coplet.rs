//! Coplet definitions and the id-keyed managers that hold them.
//!
//! Each manager is stored as a YAML sequence of entries and kept in memory as
//! a map from id to `Arc`, so that a merged profile can share untouched
//! entries with the global baseline.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use super::profile::ApplyDelta;

pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Entry of a manager: addressable by id and mergeable with a delta entry.
pub trait DeltaEntry: Clone {
    fn id(&self) -> &str;

    /// Fold the fields `delta` sets into `self`.
    fn merge(&mut self, delta: &Self);

    fn delta_applied(&self) -> bool;

    fn set_delta_applied(&mut self);

    /// Whether this delta entry deletes the accumulated entry with its id.
    fn is_removal(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopletBaseData {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coplet_adapter_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    #[serde(skip)]
    pub delta_applied: bool,
}

impl CopletBaseData {
    pub fn new(id: impl Into<String>, coplet_adapter_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            coplet_adapter_name: Some(coplet_adapter_name.into()),
            attributes: Attributes::new(),
            delta_applied: false,
        }
    }
}

impl DeltaEntry for CopletBaseData {
    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, delta: &Self) {
        if let Some(adapter) = &delta.coplet_adapter_name {
            self.coplet_adapter_name = Some(adapter.clone());
        }
        merge_attributes(&mut self.attributes, &delta.attributes);
    }

    fn delta_applied(&self) -> bool {
        self.delta_applied
    }

    fn set_delta_applied(&mut self) {
        self.delta_applied = true;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopletData {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coplet_base_data_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    #[serde(skip)]
    pub delta_applied: bool,
}

impl CopletData {
    pub fn new(id: impl Into<String>, coplet_base_data_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            coplet_base_data_id: Some(coplet_base_data_id.into()),
            attributes: Attributes::new(),
            delta_applied: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

impl DeltaEntry for CopletData {
    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, delta: &Self) {
        if let Some(title) = &delta.title {
            self.title = Some(title.clone());
        }
        if let Some(base) = &delta.coplet_base_data_id {
            self.coplet_base_data_id = Some(base.clone());
        }
        merge_attributes(&mut self.attributes, &delta.attributes);
    }

    fn delta_applied(&self) -> bool {
        self.delta_applied
    }

    fn set_delta_applied(&mut self) {
        self.delta_applied = true;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopletInstanceData {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coplet_data_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    /// Marks a delta entry that removes the instance from lower tiers.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
    #[serde(skip)]
    pub delta_applied: bool,
}

impl CopletInstanceData {
    pub fn new(id: impl Into<String>, coplet_data_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            coplet_data_id: Some(coplet_data_id.into()),
            attributes: Attributes::new(),
            removed: false,
            delta_applied: false,
        }
    }

    /// Delta entry deleting the instance `id`.
    pub fn removal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            coplet_data_id: None,
            attributes: Attributes::new(),
            removed: true,
            delta_applied: false,
        }
    }

    /// Equal as stored, ignoring merge bookkeeping.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.coplet_data_id == other.coplet_data_id
            && self.attributes == other.attributes
            && self.removed == other.removed
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

impl DeltaEntry for CopletInstanceData {
    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, delta: &Self) {
        if let Some(data) = &delta.coplet_data_id {
            self.coplet_data_id = Some(data.clone());
        }
        merge_attributes(&mut self.attributes, &delta.attributes);
    }

    fn delta_applied(&self) -> bool {
        self.delta_applied
    }

    fn set_delta_applied(&mut self) {
        self.delta_applied = true;
    }

    fn is_removal(&self) -> bool {
        self.removed
    }
}

fn merge_attributes(target: &mut Attributes, delta: &Attributes) {
    for (name, value) in delta {
        target.insert(name.clone(), value.clone());
    }
}

pub type EntryMap<T> = BTreeMap<String, Arc<T>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopletBaseDataManager {
    #[serde(default, with = "by_id")]
    pub coplet_base_data: EntryMap<CopletBaseData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopletDataManager {
    #[serde(default, with = "by_id")]
    pub coplet_data: EntryMap<CopletData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopletInstanceDataManager {
    #[serde(default, with = "by_id")]
    pub coplet_instance_data: EntryMap<CopletInstanceData>,
}

macro_rules! entry_manager {
    ($manager:ty, $field:ident, $entry:ty) => {
        impl $manager {
            pub fn from_entries(entries: impl IntoIterator<Item = $entry>) -> Self {
                Self {
                    $field: entries
                        .into_iter()
                        .map(|entry| (entry.id.clone(), Arc::new(entry)))
                        .collect(),
                }
            }

            pub fn get(&self, id: &str) -> Option<&Arc<$entry>> {
                self.$field.get(id)
            }

            pub fn entries(&self) -> &EntryMap<$entry> {
                &self.$field
            }

            pub fn len(&self) -> usize {
                self.$field.len()
            }

            pub fn is_empty(&self) -> bool {
                self.$field.is_empty()
            }
        }

        impl ApplyDelta for $manager {
            fn apply_delta(&mut self, delta: &Self) -> bool {
                apply_entries(&mut self.$field, &delta.$field)
            }

            fn adjust_references(&mut self, baseline: &Self) {
                relink_entries(&mut self.$field, &baseline.$field)
            }
        }
    };
}

entry_manager!(CopletBaseDataManager, coplet_base_data, CopletBaseData);
entry_manager!(CopletDataManager, coplet_data, CopletData);
entry_manager!(CopletInstanceDataManager, coplet_instance_data, CopletInstanceData);

/// Merge every delta entry into `target`; unknown ids are added and removal
/// entries delete. Entries are copied on write, so the baseline sharing an
/// `Arc` is never touched.
fn apply_entries<T: DeltaEntry>(target: &mut EntryMap<T>, delta: &EntryMap<T>) -> bool {
    for (id, change) in delta {
        if change.is_removal() {
            target.remove(id);
            continue;
        }
        match target.get_mut(id) {
            Some(current) => {
                let current = Arc::make_mut(current);
                current.merge(change);
                current.set_delta_applied();
            }
            None => {
                let mut added = T::clone(change);
                added.set_delta_applied();
                target.insert(id.clone(), Arc::new(added));
            }
        }
    }
    !delta.is_empty()
}

fn relink_entries<T: DeltaEntry>(target: &mut EntryMap<T>, baseline: &EntryMap<T>) {
    for (id, entry) in target.iter_mut() {
        if entry.delta_applied() {
            continue;
        }
        if let Some(original) = baseline.get(id) {
            *entry = Arc::clone(original);
        }
    }
}

/// Serialize an id-keyed map as a plain sequence and rebuild the keys from
/// each entry's own id on the way back.
mod by_id {
    use std::{collections::BTreeMap, sync::Arc};

    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    use super::DeltaEntry;

    pub fn serialize<S, T>(map: &BTreeMap<String, Arc<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, Arc<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + DeltaEntry,
    {
        let entries = Vec::<T>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for entry in entries {
            let id = entry.id().to_string();
            if map.insert(id.clone(), Arc::new(entry)).is_some() {
                return Err(D::Error::custom(format!("duplicate id `{id}`")));
            }
        }
        Ok(map)
    }
}
