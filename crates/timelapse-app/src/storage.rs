//! Free-space probe for the volume holding a session directory.

use std::path::Path;

use sysinfo::Disks;

/// Available bytes on the disk whose mount point is the longest prefix of
/// `path`. `None` when no mounted disk matches (e.g. in minimal containers).
pub fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

/// Whether capture should stop for lack of space. Unknown space never stops it.
pub fn is_low(available: Option<u64>, min_free_bytes: u64) -> bool {
    min_free_bytes > 0 && available.is_some_and(|a| a < min_free_bytes)
}
