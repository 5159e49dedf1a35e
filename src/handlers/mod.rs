//! HTTP handlers.  Each takes the shared state plus already-extracted
//! request parts and returns a ready response or a [`crate::errors::GatewayError`].

pub mod files;
