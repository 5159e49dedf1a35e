//! Object storage providers.
//!
//! The [`backend::StorageBackend`] trait abstracts over where bytes
//! physically live.  Implementations include local disk, memory, and
//! adapters for AWS S3 and GCP Cloud Storage.  The [`registry`] maps
//! provider ids to adapters.

pub mod aws;
pub mod backend;
pub mod gcp;
pub mod keys;
pub mod local;
pub mod memory;
pub mod registry;
pub mod staging;
pub mod timeout;

#[cfg(test)]
pub mod testing;
