pub mod approval;
pub mod workflow;
