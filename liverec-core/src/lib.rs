pub mod config;
pub mod credentials;
pub mod danmaku;
pub mod error;
pub mod logging;
pub mod lookup;
pub mod recorder;

pub use config::Config;
pub use error::{Error, Result};
