//! Gallery storage: in-memory set, interchange format and persistence

pub mod gallery;
pub mod format;
pub mod store;

pub use gallery::{Gallery, GalleryEntry, Thumbnail};
pub use store::{GalleryStore, JsonFileStore, MemoryStore};
