pub mod cancel;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod events;

pub use cancel::*;
pub use config::*;
pub use dataset::*;
pub use errors::*;
pub use events::*;
