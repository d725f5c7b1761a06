// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backend contracts.
//!
//! Both traits use `#[async_trait]` so that local implementations and plugin
//! clients can sit behind the same `Arc<dyn ...>`.

pub mod datasource;
pub mod provision;

pub use datasource::DataSource;
pub use provision::{Provision, StatusStream};
