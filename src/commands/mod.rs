pub mod run_task;
pub mod show_result;
