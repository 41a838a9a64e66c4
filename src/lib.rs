// Trellis - an inversion-of-control web runtime
//
// Discoverable types are described once, autowired through their
// constructors, and exposed as HTTP routes and CLI commands. Services that
// declare an entity and a storage adapter get CRUD operations synthesized
// at runtime.

// Re-export core functionality
pub use trellis_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use trellis_config;

#[cfg(feature = "testing")]
pub use trellis_testing;

// Prelude for common imports
pub mod prelude {
    pub use trellis_core::prelude::*;
    pub use trellis_core::{EntityMarker, HttpMethod, PolicyAction, Resolver, ServiceHandle};
}
