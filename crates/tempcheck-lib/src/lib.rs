pub mod conditioning;
pub mod config;
pub mod error;
pub mod forecast;
pub mod io;
pub mod pipeline;
pub mod plot;
pub mod render;
pub mod signal;
pub mod synthetic;

pub use config::*;
pub use error::*;
pub use pipeline::*;
pub use signal::*;
