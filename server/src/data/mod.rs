//! Data layer: message cache backends and the attachment file cache

pub mod cache;
pub mod files;
