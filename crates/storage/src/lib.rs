pub mod backend;
pub mod codec;
pub mod error;
pub mod store;

pub use backend::{LocalBackend, S3Backend, StorageBackend};
pub use codec::EncodedObject;
pub use error::StorageError;
pub use store::{DurableStore, PutReceipt, RawStore, StoredObject};
