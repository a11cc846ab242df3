pub mod attendance;
pub mod health;
pub mod users;

pub use health::{health_handler, root_handler};
