use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage tier a profile document lives in. Deltas are applied in
/// declaration order: global first, then role, then user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Global,
    Role,
    User,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Global, Tier::Role, Tier::User];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::Role => "role",
            Tier::User => "user",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of document a profile key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    CopletBaseData,
    CopletData,
    CopletInstanceData,
    Layout,
}

impl ProfileType {
    pub const ALL: [ProfileType; 4] = [
        ProfileType::CopletBaseData,
        ProfileType::CopletData,
        ProfileType::CopletInstanceData,
        ProfileType::Layout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileType::CopletBaseData => "copletbasedata",
            ProfileType::CopletData => "copletdata",
            ProfileType::CopletInstanceData => "copletinstancedata",
            ProfileType::Layout => "layout",
        }
    }

    /// Coplet base data only exists globally; everything else accepts role
    /// and user deltas.
    pub fn is_tiered(self) -> bool {
        !matches!(self, ProfileType::CopletBaseData)
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProfileType {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProfileType::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| InvalidKeyError::UnknownProfileType(s.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidKeyError {
    #[error("{tier} profile key requires a {tier} id")]
    MissingTierId { tier: Tier },
    #[error("invalid {field} `{value}` in profile key")]
    InvalidComponent { field: &'static str, value: String },
    #[error("unknown profile type `{0}`")]
    UnknownProfileType(String),
}

/// Identity of one profile document, or of one merged profile view.
///
/// The same key type serves two purposes: with [`ProfileKey::storage_key`]
/// applied it names a stored document; left as built it names the merged view
/// for a particular role and user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    portal: String,
    layout_key: String,
    profile_type: ProfileType,
    tier: Tier,
    role: Option<String>,
    user: Option<String>,
}

impl ProfileKey {
    /// Global-tier key with no role or user attached.
    pub fn new(
        portal: impl Into<String>,
        layout_key: impl Into<String>,
        profile_type: ProfileType,
    ) -> Self {
        Self {
            portal: portal.into(),
            layout_key: layout_key.into(),
            profile_type,
            tier: Tier::Global,
            role: None,
            user: None,
        }
    }

    pub fn with_role(mut self, role: Option<impl Into<String>>) -> Self {
        self.role = role.map(Into::into);
        self
    }

    pub fn with_user(mut self, user: Option<impl Into<String>>) -> Self {
        self.user = user.map(Into::into);
        self
    }

    pub fn with_profile_type(&self, profile_type: ProfileType) -> Self {
        Self {
            profile_type,
            ..self.clone()
        }
    }

    pub fn for_tier(&self, tier: Tier) -> Self {
        Self {
            tier,
            ..self.clone()
        }
    }

    pub fn portal(&self) -> &str {
        &self.portal
    }

    pub fn layout_key(&self) -> &str {
        &self.layout_key
    }

    pub fn profile_type(&self) -> ProfileType {
        self.profile_type
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The id this key carries for its own tier, if any.
    pub fn tier_id(&self) -> Option<&str> {
        match self.tier {
            Tier::Global => None,
            Tier::Role => self.role(),
            Tier::User => self.user(),
        }
    }

    /// Tiers a load for this key has to visit, in delta order.
    pub fn addressed_tiers(&self) -> Vec<Tier> {
        if !self.profile_type.is_tiered() {
            return vec![Tier::Global];
        }
        Tier::ALL
            .into_iter()
            .filter(|tier| match tier {
                Tier::Global => true,
                Tier::Role => self.role.is_some(),
                Tier::User => self.user.is_some(),
            })
            .collect()
    }

    /// Strip the ids the document at this tier does not depend on.
    pub fn storage_key(&self) -> Self {
        let (role, user) = match self.tier {
            Tier::Global => (None, None),
            Tier::Role => (self.role.clone(), None),
            Tier::User => (None, self.user.clone()),
        };
        Self {
            role,
            user,
            ..self.clone()
        }
    }

    /// Relative, `/`-separated location of the stored document, without an
    /// extension.
    pub fn storage_uri(&self) -> Result<String, InvalidKeyError> {
        let portal = checked_component("portal", &self.portal)?;
        let layout_key = checked_component("layout key", &self.layout_key)?;
        let base = format!("{portal}/{layout_key}/{}", self.profile_type);

        match self.tier {
            Tier::Global => Ok(format!("{base}/global")),
            tier => {
                let id = self
                    .tier_id()
                    .ok_or(InvalidKeyError::MissingTierId { tier })?;
                let id = checked_component(tier.as_str(), id)?;
                Ok(format!("{base}/{tier}/{id}"))
            }
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.portal, self.layout_key, self.profile_type, self.tier
        )?;
        if let Some(role) = &self.role {
            write!(f, " role={role}")?;
        }
        if let Some(user) = &self.user {
            write!(f, " user={user}")?;
        }
        Ok(())
    }
}

fn checked_component<'a>(field: &'static str, value: &'a str) -> Result<&'a str, InvalidKeyError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(InvalidKeyError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}
