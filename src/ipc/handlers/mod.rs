pub mod attendance;
pub mod auth;
pub mod backup_exchange;
pub mod classes;
pub mod core;
mod helpers;
pub mod reports;
pub mod students;
pub mod subjects;
pub mod teachers;
