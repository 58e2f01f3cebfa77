use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::{
    coplet::{CopletBaseDataManager, CopletDataManager, CopletInstanceDataManager},
    layout::Layout,
    profile_key::ProfileType,
};

/// Merge contract shared by every profile object.
pub trait ApplyDelta {
    /// Fold a role or user override into `self`, marking every sub-object the
    /// delta touched. Returns whether anything was applied.
    fn apply_delta(&mut self, delta: &Self) -> bool;

    /// Point every sub-object that received no delta back at the baseline's
    /// shared copy.
    fn adjust_references(&mut self, baseline: &Self);
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("expected a {expected} profile, found {found}")]
pub struct ProfileTypeMismatch {
    pub expected: ProfileType,
    pub found: ProfileType,
}

/// A deserialized profile document, or a merged view of several.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    CopletBaseData(CopletBaseDataManager),
    CopletData(CopletDataManager),
    CopletInstanceData(CopletInstanceDataManager),
    Layout(Arc<Layout>),
}

impl Profile {
    pub fn profile_type(&self) -> ProfileType {
        match self {
            Profile::CopletBaseData(_) => ProfileType::CopletBaseData,
            Profile::CopletData(_) => ProfileType::CopletData,
            Profile::CopletInstanceData(_) => ProfileType::CopletInstanceData,
            Profile::Layout(_) => ProfileType::Layout,
        }
    }

    /// Decode the document body for a profile of the given type.
    pub fn from_yaml(profile_type: ProfileType, yaml: &str) -> Result<Self, serde_yaml_ng::Error> {
        Ok(match profile_type {
            ProfileType::CopletBaseData => Profile::CopletBaseData(serde_yaml_ng::from_str(yaml)?),
            ProfileType::CopletData => Profile::CopletData(serde_yaml_ng::from_str(yaml)?),
            ProfileType::CopletInstanceData => {
                Profile::CopletInstanceData(serde_yaml_ng::from_str(yaml)?)
            }
            ProfileType::Layout => Profile::Layout(Arc::new(serde_yaml_ng::from_str(yaml)?)),
        })
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml_ng::Error> {
        match self {
            Profile::CopletBaseData(manager) => serde_yaml_ng::to_string(manager),
            Profile::CopletData(manager) => serde_yaml_ng::to_string(manager),
            Profile::CopletInstanceData(manager) => serde_yaml_ng::to_string(manager),
            Profile::Layout(layout) => serde_yaml_ng::to_string(layout.as_ref()),
        }
    }

    /// Apply a delta of the same profile type.
    pub fn apply_delta(&mut self, delta: &Profile) -> Result<bool, ProfileTypeMismatch> {
        let applied = match (self, delta) {
            (Profile::CopletBaseData(base), Profile::CopletBaseData(delta)) => {
                base.apply_delta(delta)
            }
            (Profile::CopletData(base), Profile::CopletData(delta)) => base.apply_delta(delta),
            (Profile::CopletInstanceData(base), Profile::CopletInstanceData(delta)) => {
                base.apply_delta(delta)
            }
            (Profile::Layout(base), Profile::Layout(delta)) => {
                // Only copy the root when the delta actually changes something.
                let mut candidate = Layout::clone(base);
                let applied = candidate.apply_delta(delta);
                if applied {
                    *base = Arc::new(candidate);
                }
                applied
            }
            (base, delta) => {
                return Err(ProfileTypeMismatch {
                    expected: base.profile_type(),
                    found: delta.profile_type(),
                });
            }
        };
        Ok(applied)
    }

    pub fn adjust_references(&mut self, baseline: &Profile) {
        match (self, baseline) {
            (Profile::CopletBaseData(merged), Profile::CopletBaseData(base)) => {
                merged.adjust_references(base)
            }
            (Profile::CopletData(merged), Profile::CopletData(base)) => {
                merged.adjust_references(base)
            }
            (Profile::CopletInstanceData(merged), Profile::CopletInstanceData(base)) => {
                merged.adjust_references(base)
            }
            (Profile::Layout(merged), Profile::Layout(base)) => {
                if merged.delta_applied {
                    Arc::make_mut(merged).adjust_references(base);
                } else {
                    *merged = Arc::clone(base);
                }
            }
            _ => {}
        }
    }

    pub fn as_coplet_base_data(&self) -> Result<&CopletBaseDataManager, ProfileTypeMismatch> {
        match self {
            Profile::CopletBaseData(manager) => Ok(manager),
            other => Err(other.mismatch(ProfileType::CopletBaseData)),
        }
    }

    pub fn as_coplet_data(&self) -> Result<&CopletDataManager, ProfileTypeMismatch> {
        match self {
            Profile::CopletData(manager) => Ok(manager),
            other => Err(other.mismatch(ProfileType::CopletData)),
        }
    }

    pub fn as_coplet_instance_data(
        &self,
    ) -> Result<&CopletInstanceDataManager, ProfileTypeMismatch> {
        match self {
            Profile::CopletInstanceData(manager) => Ok(manager),
            other => Err(other.mismatch(ProfileType::CopletInstanceData)),
        }
    }

    pub fn as_layout(&self) -> Result<&Arc<Layout>, ProfileTypeMismatch> {
        match self {
            Profile::Layout(layout) => Ok(layout),
            other => Err(other.mismatch(ProfileType::Layout)),
        }
    }

    fn mismatch(&self, expected: ProfileType) -> ProfileTypeMismatch {
        ProfileTypeMismatch {
            expected,
            found: self.profile_type(),
        }
    }
}

impl Serialize for Profile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Profile::CopletBaseData(manager) => manager.serialize(serializer),
            Profile::CopletData(manager) => manager.serialize(serializer),
            Profile::CopletInstanceData(manager) => manager.serialize(serializer),
            Profile::Layout(layout) => layout.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_deltas_are_rejected() {
        let mut profile = Profile::CopletData(CopletDataManager::default());
        let delta = Profile::Layout(Arc::new(Layout::composite("root", [])));

        assert_eq!(
            profile.apply_delta(&delta),
            Err(ProfileTypeMismatch {
                expected: ProfileType::CopletData,
                found: ProfileType::Layout,
            })
        );
    }

    #[test]
    fn layout_root_is_shared_when_delta_changes_nothing() {
        let base = Arc::new(Layout::composite("root", [Layout::coplet("a", "a-1")]));
        let mut merged = Profile::Layout(Arc::clone(&base));

        let applied = merged
            .apply_delta(&Profile::Layout(Arc::new(Layout::composite("root", []))))
            .unwrap();

        assert!(!applied);
        assert!(Arc::ptr_eq(merged.as_layout().unwrap(), &base));
    }

    #[test]
    fn yaml_dispatch_by_type() {
        let profile = Profile::from_yaml(
            ProfileType::CopletData,
            "coplet_data:\n  - id: news\n    title: News\n",
        )
        .unwrap();

        let manager = profile.as_coplet_data().unwrap();
        assert_eq!(
            manager.get("news").map(|data| data.title.clone()),
            Some(Some("News".to_string()))
        );
        assert!(profile.as_layout().is_err());

        let again = Profile::from_yaml(ProfileType::CopletData, &profile.to_yaml().unwrap()).unwrap();
        assert_eq!(again, profile);
    }
}
