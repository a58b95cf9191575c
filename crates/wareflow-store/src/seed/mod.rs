//! Source seeding
//!
//! A YAML seed document carries one list per source table. Importing upserts
//! every row, so a later seed with edited rows models an upstream update.

pub mod format;
pub mod importer;
pub mod parser;

pub use format::SeedDocument;
pub use importer::{import_seed, import_seed_document, SeedSummary};
pub use parser::{parse_seed_file, parse_seed_str};
