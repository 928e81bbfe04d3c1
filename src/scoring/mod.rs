pub mod grader;
pub mod types;
