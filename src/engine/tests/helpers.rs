use crate::engine::{Engine, EngineOptions};
use crate::memory;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options with a private 1 MiB cache and the given memtable size.
pub fn options(write_buffer_size: usize) -> EngineOptions {
    init_tracing();
    EngineOptions {
        write_buffer_size,
        ..EngineOptions::new(memory::private(1 << 20))
    }
}

/// Large buffer: nothing is flushed unless asked.
pub fn memtable_only(dir: &Path) -> Engine {
    Engine::open(dir, options(1 << 20)).unwrap()
}

/// 256-byte buffer: a handful of entries per memtable, frequent flushes.
pub fn small_buffer(dir: &Path) -> Engine {
    Engine::open(dir, options(256)).unwrap()
}

pub fn key(i: u32) -> Vec<u8> {
    format!("k_{i:04}").into_bytes()
}

pub fn value(i: u32) -> Vec<u8> {
    format!("v_{i:04}").into_bytes()
}

/// Collects a live scan, panicking on error.
pub fn collect(iter: crate::engine::LiveEntries) -> Vec<(Vec<u8>, Vec<u8>)> {
    iter.collect::<Result<Vec<_>, _>>().unwrap()
}
