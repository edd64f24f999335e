pub mod config;
pub mod sample;
pub mod traits;
pub mod util;

pub use config::*;
pub use sample::*;
