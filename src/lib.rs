//! Simulator infrastructure: set-associative cache models and the
//! pipeout transaction database

/// Cache modeling library
pub mod cache;
/// Pipeout transaction database reader
pub mod pipeout;
/// Hierarchical preload descriptors
pub mod preload;

pub use self::cache::{Cache, CacheError, Replacement, SimpleCache, SizeUnit};
pub use self::pipeout::Reader;
pub use self::preload::{Packet, PreloadEmitter, Preloader};
