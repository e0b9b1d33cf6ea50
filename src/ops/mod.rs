pub mod bin;
pub mod cascade;
pub mod check;
pub mod reorder;
pub mod task_ops;
pub mod tree;
pub mod views;
