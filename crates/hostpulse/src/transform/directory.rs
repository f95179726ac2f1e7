// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::DirectoryError;
use crate::provider::DirectoryProvider;
use std::collections::HashMap;

/// Site id to site name, as last loaded from the directory provider.
///
/// A directory is only ever replaced as a whole, never edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteDirectory {
    names: HashMap<i64, String>,
}

impl SiteDirectory {
    pub fn load(provider: &dyn DirectoryProvider) -> Result<Self, DirectoryError> {
        let names = provider
            .enumerate_sites()?
            .into_iter()
            .map(|site| (site.id, site.name))
            .collect();
        Ok(Self { names })
    }

    #[must_use]
    pub fn name(&self, id: i64) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
