pub mod helpers;

mod tests_commit;
mod tests_maintenance;
