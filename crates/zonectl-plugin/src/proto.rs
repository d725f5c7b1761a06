// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generated protobuf messages and gRPC stubs for the plugin protocol.
//!
//! Conversions to and from the entity model live in [`crate::convert`].

#![allow(missing_docs)]
#![allow(clippy::doc_overindented_list_items)]

tonic::include_proto!("zonectl.plugin.v1");
