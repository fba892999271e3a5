// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy documents and the loader that applies them to the permission graph.

pub mod document;
pub mod loader;

pub use document::{PolicyDocument, PolicyFormat, Statement};
pub use loader::{plan, Plan, PolicyResult};
