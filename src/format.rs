//! Human-readable byte sizes.

use humansize::{ToF64, Unsigned, WINDOWS};

/// Format a byte count with 1024-based steps and short suffixes
/// (`B`, `kB`, `MB`, ...), e.g. `1.50 kB` for 1536 bytes.
pub fn format_size<T: ToF64 + Unsigned>(input: T) -> String {
    humansize::format_size(input, WINDOWS)
}

/// Format a signed byte count; negative values (drifted aggregates) show as zero.
pub fn format_size_i64(bytes: i64) -> String {
    format_size(bytes.max(0) as u64)
}
