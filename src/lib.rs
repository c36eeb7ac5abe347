pub mod error;
pub mod logging;
pub mod overlay;
pub mod settings;

pub use error::{DrawError, OverlayError};
