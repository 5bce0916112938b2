pub mod helpers;
mod tests_compaction;
mod tests_flush;
mod tests_merge_iter;
mod tests_scan;
