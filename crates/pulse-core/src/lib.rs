pub mod config;
pub mod error;
pub mod names;
pub mod provider;
pub mod scheduler;
pub mod types;
pub mod window;

pub use config::AppConfig;
pub use error::{PulseError, Result};
pub use names::{NameBook, NameResolver};
pub use provider::ChatApi;
pub use types::{Channel, Message, Reaction, UserInfo};
pub use window::LookbackWindow;
