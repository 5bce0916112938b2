pub mod helpers;

mod tests_manifest;
mod tests_purge;
