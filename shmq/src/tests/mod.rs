use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::{Backend, ShmemConfig};


/// Per-test unique queue config rooted in a tempdir, so parallel tests
/// and repeated runs never collide on a segment name.
pub(crate) fn unique_config(
    dir: &tempfile::TempDir,
    backend: Backend,
    segment_size: usize,
) -> ShmemConfig {
    static QUEUE_ID: AtomicUsize = AtomicUsize::new(0);
    ShmemConfig::builder()
        .data_dir(dir.path().to_str().unwrap())
        .queue_name(format!(
            "test-{}-{}",
            std::process::id(),
            QUEUE_ID.fetch_add(1, Ordering::SeqCst)
        ))
        .segment_size(segment_size)
        .backend(backend)
        .build()
        .unwrap()
}
