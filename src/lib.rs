pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod generic;
pub mod impls;
mod util;

pub use error::{AttestError, Result};
