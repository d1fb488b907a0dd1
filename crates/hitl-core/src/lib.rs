pub mod config;
pub mod events;
pub mod types;
pub mod urgency;
pub mod validation;

pub use config::*;
pub use events::*;
pub use types::*;
pub use urgency::*;
pub use validation::*;
