//! Integration tests driving tables through the `Database` registry.
//!
//! 1. Keystore CRUD, partition roll and time methods
//! 2. AuthTable users, alt login and password reset
//! 3. Restore and timed file close
//! 4. Leaderboards

pub mod auth_tests;
pub mod helpers;
pub mod keystore_tests;
pub mod leaderboard_tests;
pub mod restore_tests;
