pub mod config;
pub mod error;
pub mod work;

pub use config::Config;
pub use error::*;
pub use work::*;
