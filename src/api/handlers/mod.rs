pub mod attendance;
pub mod auth;
pub mod core;
pub mod messages;
pub mod settings;
pub mod students;
pub mod tables;
pub mod users;
