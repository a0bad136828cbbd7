//! Test doubles for the backend seam.

mod mock_backend;

pub use mock_backend::{make_transfer, MockBackend};
