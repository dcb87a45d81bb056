// src/services/mod.rs
//
// Shared services: provider clients, account storage, identity resolution
// and session tokens

pub mod identity;
pub mod providers;
pub mod tokens;
pub mod users;
