pub mod access;
pub mod crypto;
pub mod handlers;
pub mod ids;
pub mod models;
pub mod redis;
pub mod service;
pub mod sqlite;
pub mod sweeper;
pub mod time;

pub use handlers::build_rocket;
pub use service::{PasteError, PasteService};
pub use sweeper::{Sweeper, SweeperHandle};
