use std::path::Path;
use std::sync::Arc;

use crate::config::CompressionCodec;
use crate::memory::BlockCache;
use crate::sstable::{IoCounters, SSTable, TableBuilder, TableCache, TableContext, file_name};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn context(max_open_files: i32) -> TableContext {
    TableContext {
        cache: Arc::new(BlockCache::new(1 << 20, 0.1)),
        table_cache: Arc::new(TableCache::new(max_open_files)),
        io: Arc::new(IoCounters::default()),
    }
}

/// Build file `number` in `dir` from already sorted entries.
pub(crate) fn build_table(
    dir: &Path,
    number: u64,
    codec: CompressionCodec,
    entries: &[(Vec<u8>, Option<Vec<u8>>)],
    ctx: &TableContext,
) -> Arc<SSTable> {
    let path = dir.join(file_name(number));
    let mut builder = TableBuilder::create(&path, "default", codec, entries.len(), None).unwrap();
    for (k, v) in entries {
        builder.add(k, v.as_deref()).unwrap();
    }
    builder.finish(&ctx.io).unwrap();
    SSTable::open(&path, ctx.clone()).unwrap()
}

/// `count` live entries `key-00000 -> value-00000`, ...
pub(crate) fn numbered(count: usize) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
    (0..count)
        .map(|i| {
            (
                format!("key-{i:05}").into_bytes(),
                Some(format!("value-{i:05}").into_bytes()),
            )
        })
        .collect()
}
