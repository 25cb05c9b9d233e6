//! SQLite helpers.

/// Row-chunk size for batch inserts and `IN (...)` lists.
///
/// The bundled SQLite allows 32766 bound variables per statement; 500 rows
/// keeps even the widest table comfortably under that.
pub const SQLITE_MAX_PARAMS_CHUNK: usize = 500;
