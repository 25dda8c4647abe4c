pub mod config;
pub mod cwa;
pub mod discord;
pub mod lock;
pub mod logging;
pub mod models;
pub mod poller;
pub mod store;
pub mod util;
