//! Persistence contracts the scan loop writes through.

mod traits;

pub use traits::*;
