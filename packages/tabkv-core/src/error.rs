//! Database error types.
//!
//! Every variant maps to a flat integer code through [`DbError::code`].
//! Codes are grouped by the layer that detects them:
//!
//! | Range | Layer |
//! |-------|-------|
//! | 1xxx  | generic table |
//! | 2xxx  | schema and value filter |
//! | 3xxx  | keystore |
//! | 4xxx  | auth table |
//! | 5xxx  | leaderboard |
//! | 6xxx  | storage |

use std::path::PathBuf;

use thiserror::Error;

/// Database operation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    /// Invariant violation that should not occur
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// Empty key supplied
    #[error("Key required")]
    KeyRequired,

    /// Key already present in the table
    #[error("Key '{0}' already in use")]
    KeyInUse(String),

    /// No entry under the given key (or wrong password)
    #[error("No entry found")]
    NoEntryFound,

    /// Table reached `max_entries`
    #[error("Table '{table}' is full ({max_entries} entries)")]
    TableFull { table: String, max_entries: u64 },

    /// Table not registered
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    /// Table name already registered or directory already present
    #[error("Table '{0}' already exists")]
    TableExists(String),

    /// Empty table name
    #[error("Table name required")]
    TableNameRequired,

    /// Table exists but is of a different kind
    #[error("Table '{table}' is not a {expected}")]
    TableKindMismatch { table: String, expected: &'static str },

    /// Schema definition or update addresses an unknown or malformed item
    #[error("Schema invalid: {0}")]
    SchemaInvalid(String),

    /// Supplied value does not match the item's type
    #[error("Invalid type for item '{item}': expected {expected}")]
    InvalidItemType { item: String, expected: &'static str },

    /// Required item absent or empty
    #[error("Missing required item '{0}'")]
    MissingRequiredItem(String),

    /// String longer than `max_chars`
    #[error("String item '{item}' exceeds {max_chars} characters")]
    StringTooLarge { item: String, max_chars: u32 },

    /// Required array is empty
    #[error("Array item '{0}' requires at least one element")]
    ArrayEmpty(String),

    /// Required map is empty
    #[error("Map item '{0}' requires at least one entry")]
    MapEmpty(String),

    /// Array or map exceeds `max_items`
    #[error("Item '{item}' exceeds {max_items} elements")]
    ItemsFull { item: String, max_items: u32 },

    /// Unique value already held by another record or element
    #[error("Unique value for '{0}' already in use")]
    UniqueValueDuplicate(String),

    /// Email item failed format validation
    #[error("Invalid email format")]
    InvalidEmail,

    /// Method not applicable to the item type
    #[error("Invalid method '{method}' for item '{item}'")]
    InvalidMethod { item: String, method: String },

    /// Wrong number or kind of method parameters
    #[error("Invalid method parameters for item '{0}'")]
    InvalidMethodParameters(String),

    /// Array index or slice outside the array bounds
    #[error("Index out of bounds for item '{0}'")]
    IndexOutOfBounds(String),

    /// Time string not in the item's layout
    #[error("Invalid time format for item '{item}' (layout {layout})")]
    InvalidTimeFormat { item: String, layout: &'static str },

    /// Persisted record does not match the schema
    #[error("Restored record does not match schema: {0}")]
    RestoreItemSchema(String),

    /// Key contains a reserved character
    #[error("Key '{0}' contains an invalid character")]
    KeyInvalid(String),

    /// User name contains whitespace
    #[error("User name '{0}' contains whitespace")]
    NameInvalid(String),

    /// Password shorter than `min_password`
    #[error("Password must be at least {0} characters")]
    PasswordLength(u32),

    /// Password hashing failed
    #[error("Password encryption failed: {0}")]
    PasswordEncryption(String),

    /// Reset requested without an email item configured
    #[error("No email item configured")]
    NoEmailItem,

    /// Alt-login item is not a top-level unique string
    #[error("Invalid alt login item '{0}'")]
    InvalidAltLoginItem(String),

    /// Password reset notifier refused or failed
    #[error("Password reset delivery failed: {0}")]
    PasswordResetDelivery(String),

    /// Leaderboard push or page request is unusable
    #[error("Invalid leaderboard argument: {0}")]
    InvalidLeaderboardArgument(String),

    /// Opening a partition or descriptor file failed
    #[error("Failed to open {path}: {reason}")]
    FileOpen { path: PathBuf, reason: String },

    /// Reading a partition or descriptor file failed
    #[error("Failed to read {path}: {reason}")]
    FileRead { path: PathBuf, reason: String },

    /// Appending a line failed
    #[error("Failed to append to {path}: {reason}")]
    FileAppend { path: PathBuf, reason: String },

    /// Rewriting a line or descriptor failed
    #[error("Failed to update {path}: {reason}")]
    FileUpdate { path: PathBuf, reason: String },

    /// Creating a table directory failed
    #[error("Failed to create directory {path}: {reason}")]
    DirCreate { path: PathBuf, reason: String },

    /// Removing a table directory failed
    #[error("Failed to remove directory {path}: {reason}")]
    DirRemove { path: PathBuf, reason: String },

    /// Serialisation of a record or descriptor failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Deserialisation of a record or descriptor failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Line index outside the file
    #[error("Line {line} out of range in {path}")]
    LineOutOfRange { path: PathBuf, line: u32 },

    /// Payload would break the line model
    #[error("Payload contains a newline byte")]
    InvalidPayload,
}

impl DbError {
    /// Returns the flat integer code surfaced to callers.
    pub fn code(&self) -> u16 {
        match self {
            DbError::Unexpected(_) => 1001,
            DbError::KeyRequired => 1002,
            DbError::KeyInUse(_) => 1003,
            DbError::NoEntryFound => 1004,
            DbError::TableFull { .. } => 1005,
            DbError::TableNotFound(_) => 1006,
            DbError::TableExists(_) => 1007,
            DbError::TableNameRequired => 1008,
            DbError::TableKindMismatch { .. } => 1009,

            DbError::SchemaInvalid(_) => 2001,
            DbError::InvalidItemType { .. } => 2002,
            DbError::MissingRequiredItem(_) => 2003,
            DbError::StringTooLarge { .. } => 2004,
            DbError::ArrayEmpty(_) => 2005,
            DbError::MapEmpty(_) => 2006,
            DbError::ItemsFull { .. } => 2007,
            DbError::UniqueValueDuplicate(_) => 2008,
            DbError::InvalidEmail => 2009,
            DbError::InvalidMethod { .. } => 2010,
            DbError::InvalidMethodParameters(_) => 2011,
            DbError::IndexOutOfBounds(_) => 2012,
            DbError::InvalidTimeFormat { .. } => 2013,
            DbError::RestoreItemSchema(_) => 2014,

            DbError::KeyInvalid(_) => 3001,

            DbError::NameInvalid(_) => 4001,
            DbError::PasswordLength(_) => 4002,
            DbError::PasswordEncryption(_) => 4003,
            DbError::NoEmailItem => 4004,
            DbError::InvalidAltLoginItem(_) => 4005,
            DbError::PasswordResetDelivery(_) => 4006,

            DbError::InvalidLeaderboardArgument(_) => 5001,

            DbError::FileOpen { .. } => 6001,
            DbError::FileRead { .. } => 6002,
            DbError::FileAppend { .. } => 6003,
            DbError::FileUpdate { .. } => 6004,
            DbError::DirCreate { .. } => 6005,
            DbError::DirRemove { .. } => 6006,
            DbError::Encode(_) => 6007,
            DbError::Decode(_) => 6008,
            DbError::LineOutOfRange { .. } => 6009,
            DbError::InvalidPayload => 6010,
        }
    }
}
