pub mod analyze;
pub mod config;
pub mod route;
pub mod simulate;
pub mod utils;
