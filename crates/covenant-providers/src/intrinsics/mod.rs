//! Pure runtime intrinsics: `text.*`, `std.text.*`, `list.*`, `map.*`,
//! `path.*`.
//!
//! Intrinsics touch nothing outside their arguments, so they are bound for
//! every module regardless of its manifest.

mod list;
mod map;
mod path;
mod regex;
mod text;

use crate::function::HostFunctionTable;

pub use self::regex::RegexCache;

/// Register every intrinsic.
pub fn register_all(table: &mut HostFunctionTable) {
    text::register(table);
    regex::register(table);
    list::register(table);
    map::register(table);
    path::register(table);
}
