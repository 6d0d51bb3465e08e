//! User namespace detection.
//!
//! Inside a user namespace the identity mapping is partial, and
//! operations like `pivot_root` on the host's mounts are refused.

use std::path::Path;

/// Uid map of the initial user namespace: the full 32-bit range mapped onto itself.
const HOST_UID_MAP: [u64; 3] = [0, 0, 4_294_967_295];

/// Returns `true` if the calling process runs inside a non-initial user namespace.
///
/// An unreadable uid map is treated as the initial namespace.
#[must_use]
pub fn running_in_user_ns() -> bool {
    uid_map_of(Path::new("/proc/self/uid_map")).is_some_and(|text| !is_host_uid_map(&text))
}

fn uid_map_of(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Returns `true` if `text` is the identity map of the initial namespace.
fn is_host_uid_map(text: &str) -> bool {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(first) = lines.next() else {
        return false;
    };
    if lines.next().is_some() {
        return false;
    }
    let fields: Vec<u64> = first
        .split_whitespace()
        .filter_map(|f| f.parse().ok())
        .collect();
    fields == HOST_UID_MAP
}
