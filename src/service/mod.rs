//! Remote collaborators: the attendance backend's database routes, the face
//! recognition service, and an in-process backend that stands in for both.

pub mod database;
pub mod face_api;
pub(crate) mod http;
pub mod memory;
pub mod protocol;

pub use database::{RemoteDatabase, RestDatabase};
pub use face_api::{FaceApiClient, RecognitionService};
pub use memory::MemoryBackend;
