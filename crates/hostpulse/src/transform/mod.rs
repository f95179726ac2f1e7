// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Site enrichment: named filters applied per target category, backed by a
//! periodically reloaded site directory.

pub mod chain;
pub mod directory;
pub mod filters;

pub use chain::TransformChain;
pub use directory::SiteDirectory;
pub use filters::{CategoryFilter, FilterContext};
