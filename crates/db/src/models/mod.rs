pub mod coplet;
pub mod layout;
pub mod profile;
pub mod profile_key;
pub mod validity;
