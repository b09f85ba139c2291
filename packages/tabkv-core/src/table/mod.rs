//! Keystores and AuthTables: schema-validated records over partitioned
//! line storage.

mod auth;
mod descriptor;
mod entry;
mod keystore;
mod record;
#[allow(clippy::module_inception)]
mod table;
mod unique;
pub(crate) mod validation;

pub use auth::{AuthTable, PasswordResetNotifier};
pub use descriptor::{AuthDescriptor, TableDescriptor, TableKind, DESCRIPTOR_FILE};
pub use entry::Locator;
pub use keystore::Keystore;
