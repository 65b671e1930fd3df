mod queue_tests;

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use tempfile::TempDir;

use crate::core::SegmentConfig;

pub(crate) fn init_logging() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A segment config pointing at a link no other test can collide with.
/// The TempDir must stay alive for as long as the segment is used.
pub(crate) fn unique_segment(capacity: usize) -> (SegmentConfig, TempDir) {
    static SEGMENT_COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = SegmentConfig::builder()
        .data_dir(dir.path().to_str().expect("utf-8 tempdir path"))
        .file_name(format!(
            "shmkv-test-{}-{}",
            process::id(),
            SEGMENT_COUNTER.fetch_add(1, Ordering::SeqCst)
        ))
        .capacity(capacity)
        .build()
        .expect("segment config");
    (cfg, dir)
}
