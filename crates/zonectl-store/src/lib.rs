// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The built-in entity store for zonectl.
//!
//! [`LocalDataSource`] keeps the trust zone document in memory and persists
//! it through a [`zonectl_config::Loader`] after every successful mutation.

pub mod local;

pub use local::LocalDataSource;

use std::path::Path;

use zonectl_config::FileLoader;
use zonectl_core::ZonectlError;

/// Open the store backed by the document at `path`.
pub fn open_file(path: impl AsRef<Path>) -> Result<LocalDataSource, ZonectlError> {
    LocalDataSource::new(FileLoader::new(path.as_ref()))
}
