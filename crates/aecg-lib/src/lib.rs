pub mod error;
pub mod index;
pub mod io;
pub mod plot;
pub mod signal;

pub use error::{Error, Result};
pub use signal::*;
