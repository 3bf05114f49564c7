//! Utility helpers for lossless-dl

pub mod formatting;

pub use formatting::{basename_any, extension_of, normalize_key, parent_dir_any, safe_filename};
