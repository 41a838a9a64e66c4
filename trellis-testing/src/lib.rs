//! Testing utilities for Trellis applications.
//!
//! - [`MemoryStorage`] - in-process storage adapter that records every call
//! - [`TestClient`] - drives an [`Application`](trellis_core::Application) without a socket
//! - [`assertions`] - response and storage assertions
//!
//! ```no_run
//! use trellis_core::prelude::*;
//! use trellis_testing::*;
//!
//! let storage = MemoryStorage::new();
//! let catalog = TypeCatalog::new();
//! catalog.register(storage.describe("app::Storage::Memory"));
//! // register entities, services and controllers...
//!
//! let app = Application::builder().catalog(catalog).build().unwrap();
//! let client = TestClient::new(app);
//! let response = client.get("/widgets/one/1");
//! assert_status(&response, 200);
//! ```

pub mod assertions;
pub mod memory;
pub mod test_client;

pub use assertions::*;
pub use memory::{MemoryStorage, StorageCall};
pub use test_client::{TestClient, TestResponse, send_raw, spawn_server};
