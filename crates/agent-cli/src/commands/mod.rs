pub mod config;
pub mod serve;

pub use config::run as config;
pub use serve::run as serve;
