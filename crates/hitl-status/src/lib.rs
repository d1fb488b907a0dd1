pub mod coordinator;
pub mod error;
pub mod polling;
pub mod service;
pub mod state;
pub mod views;

#[cfg(test)]
mod testing;

pub use coordinator::*;
pub use error::*;
pub use polling::*;
pub use service::*;
pub use state::*;
pub use views::*;
