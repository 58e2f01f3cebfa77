//! Profile Manager Service
//!
//! Assembles portal profiles from global, role and user documents, caches
//! them with validity revalidation and serves the per-session view of coplets
//! and layouts.

mod adapters;
mod cache;
mod error;
mod loader;
mod manager;
mod session;

pub use adapters::{CopletAdapter, CopletAdapterRegistry};
pub use cache::{CacheDecision, CachedProfile, ProfileCache};
pub use error::ProfileError;
pub use loader::TieredProfileLoader;
pub use manager::{PortalUser, ProfileManager, USER_ATTRIBUTE, UserProfile};
pub use session::{InMemorySession, SessionStore, SessionValue, get_typed_attribute};
