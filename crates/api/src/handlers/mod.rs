pub mod admin;
pub mod logs;
pub mod tasks;
