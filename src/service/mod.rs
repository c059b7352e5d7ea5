//! Service layer module

pub mod enrollment;
pub mod gallery_service;

pub use enrollment::Enroller;
pub use gallery_service::{BatchOutcome, EnrollmentImage, GalleryService};
