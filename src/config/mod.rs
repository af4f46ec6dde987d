//! Layered configuration.
//!
//! Settings are read from up to four tiers, later tiers winning field by field:
//! 1. **Defaults** - compiled in
//! 2. **Project** - `$CWD/notebook/config.yaml`
//! 3. **User** - `~/.notebook/config.yaml`
//! 4. **Environment** - the variables below
//!
//! Command-line flags are applied on top by the binary.
//!
//! ## Environment Variables
//! - `NOTEBOOK_CONFIG_PATH` - Explicit config file (bypasses the file tiers)
//! - `NOTEBOOK_DB_PATH` - Database path
//! - `NOTEBOOK_BACKUP_DIR` - Backup directory
//! - `NOTEBOOK_USER_ID` - Owner recorded in exported bundles
//! - `NOTEBOOK_PROJECT_DIR` - Project config dir (default: `./notebook`)
//! - `NOTEBOOK_USER_DIR` - User config dir (default: `~/.notebook`)

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::{deep_merge, deep_merge_all};
pub use types::*;
