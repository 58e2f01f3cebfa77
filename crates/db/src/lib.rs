pub mod models;
pub mod storage;

pub use models::{
    profile::{ApplyDelta, Profile, ProfileTypeMismatch},
    profile_key::{InvalidKeyError, ProfileKey, ProfileType, Tier},
    validity::{Validity, ValidityState},
};
pub use storage::{
    ProfileStorage, StorageError, file::FileProfileStorage, memory::InMemoryProfileStorage,
};
