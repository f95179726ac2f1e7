// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::SiteEntry;
use hostpulse::errors::DirectoryError;
use hostpulse::provider::{DirectoryProvider, ProcessRecord, SiteRecord};
use hostpulse_procfs::ProcfsProvider;

/// Sites come from the configuration file; active processes and their owning
/// unit come from procfs.
pub struct ConfiguredDirectory {
    sites: Vec<SiteRecord>,
    procfs: ProcfsProvider,
}

impl ConfiguredDirectory {
    #[must_use]
    pub fn new(sites: &[SiteEntry], procfs: ProcfsProvider) -> Self {
        Self {
            sites: sites
                .iter()
                .map(|site| SiteRecord {
                    id: site.id,
                    name: site.name.clone(),
                })
                .collect(),
            procfs,
        }
    }
}

impl DirectoryProvider for ConfiguredDirectory {
    fn enumerate_sites(&self) -> Result<Vec<SiteRecord>, DirectoryError> {
        Ok(self.sites.clone())
    }

    fn enumerate_active_processes(&self) -> Result<Vec<ProcessRecord>, DirectoryError> {
        self.procfs.list_processes()
    }
}
