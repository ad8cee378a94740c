pub mod grading;
pub mod submission;
