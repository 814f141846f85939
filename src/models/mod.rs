pub mod approver;
pub mod idea;
pub mod workflow;
