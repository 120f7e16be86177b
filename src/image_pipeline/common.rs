//! Shared error taxonomy for readers, writers and the transcoding loop.

pub mod error;

pub use error::{ConversionError, Result};
