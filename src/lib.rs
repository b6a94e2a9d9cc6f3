pub use config::*;
pub use device::*;
pub use error::*;
pub use event::*;
pub use interface::*;
pub use state::*;

pub mod auth;
pub mod counter;
pub mod lcp;
pub mod option;
pub mod packet;
pub mod protocol;
pub mod timer;

mod config;
mod device;
mod error;
mod event;
mod interface;
mod state;
