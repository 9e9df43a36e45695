/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Runtime settings, and the subset of them the master replicates to slaves.
//!
//! Settings are plain strings keyed by name. A setting tagged as *replicated* is authored by the master:
//! the master writes every replicated setting to the record store each replication interval, and slaves
//! load them and apply them to their local [zone grid](crate::zone_grid) and
//! [account store](crate::account_store) configuration. Settings that are not replicated (for example
//! the world dimensions, which can never change at runtime) only describe the local process.

use std::{collections::BTreeMap, str::FromStr, time::Duration};

use crate::{account_store::types::AccountStoreConfiguration, zone_grid::types::ZoneGridConfiguration};

pub const WORLD_WIDTH: &str = "world_width";
pub const WORLD_HEIGHT: &str = "world_height";
pub const MINIMUM_ZONE_WIDTH: &str = "minimum_zone_width";
pub const MINIMUM_ZONE_HEIGHT: &str = "minimum_zone_height";
pub const OVERPOPULATION_THRESHOLD: &str = "overpopulation_threshold";
pub const UNDERPOPULATION_THRESHOLD: &str = "underpopulation_threshold";
pub const ZONE_SUPERPEER_COUNT: &str = "zone_superpeer_count";
/// In milliseconds.
pub const STORE_REQUEST_TIMEOUT: &str = "store_request_timeout";

#[derive(Clone, Debug, PartialEq, Eq)]
struct Setting {
    value: String,
    replicated: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, Setting>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The settings that describe `zone_grid` and `account_store`. The runtime tunables are tagged as
    /// replicated.
    pub fn from_configuration(zone_grid: &ZoneGridConfiguration, account_store: &AccountStoreConfiguration) -> Self {
        let mut settings = Settings::new();
        settings.set(WORLD_WIDTH, zone_grid.world_width, false);
        settings.set(WORLD_HEIGHT, zone_grid.world_height, false);
        settings.set(MINIMUM_ZONE_WIDTH, zone_grid.minimum_zone_width, true);
        settings.set(MINIMUM_ZONE_HEIGHT, zone_grid.minimum_zone_height, true);
        settings.set(OVERPOPULATION_THRESHOLD, zone_grid.overpopulation_threshold, true);
        settings.set(UNDERPOPULATION_THRESHOLD, zone_grid.underpopulation_threshold, true);
        settings.set(ZONE_SUPERPEER_COUNT, zone_grid.zone_superpeer_count, true);
        settings.set(
            STORE_REQUEST_TIMEOUT,
            account_store.store_request_timeout.as_millis(),
            true,
        );
        settings
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString, replicated: bool) {
        self.values.insert(
            key.into(),
            Setting {
                value: value.to_string(),
                replicated,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|setting| setting.value.as_str())
    }

    /// Parse the value of `key`. Returns `None` if the key is missing or its value does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    pub fn is_replicated(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|setting| setting.replicated)
    }

    /// Every setting tagged as replicated.
    pub fn replicated(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter(|(_, setting)| setting.replicated)
            .map(|(key, setting)| (key.clone(), setting.value.clone()))
            .collect()
    }

    /// Overwrite local settings with `replicated` ones loaded from the record store. Returns whether any
    /// value changed.
    pub fn apply_replicated(&mut self, replicated: BTreeMap<String, String>) -> bool {
        let mut changed = false;
        for (key, value) in replicated {
            if self.get(&key) != Some(value.as_str()) {
                changed = true;
            }
            self.set(key, value, true);
        }
        changed
    }

    /// `base` with every tunable overridden by the corresponding setting. World dimensions are kept.
    /// Population thresholds that would let a merged pair call for a split are ignored as a whole.
    pub fn zone_grid_configuration(&self, base: ZoneGridConfiguration) -> ZoneGridConfiguration {
        let mut overpopulation_threshold = self.parsed_or(OVERPOPULATION_THRESHOLD, base.overpopulation_threshold);
        let mut underpopulation_threshold = self.parsed_or(UNDERPOPULATION_THRESHOLD, base.underpopulation_threshold);
        if underpopulation_threshold.saturating_mul(2) >= overpopulation_threshold {
            log::warn!(
                "Ignoring population thresholds {}/{}: a merged pair would be overpopulated",
                underpopulation_threshold,
                overpopulation_threshold
            );
            overpopulation_threshold = base.overpopulation_threshold;
            underpopulation_threshold = base.underpopulation_threshold;
        }
        ZoneGridConfiguration {
            minimum_zone_width: self.parsed_or(MINIMUM_ZONE_WIDTH, base.minimum_zone_width),
            minimum_zone_height: self.parsed_or(MINIMUM_ZONE_HEIGHT, base.minimum_zone_height),
            overpopulation_threshold,
            underpopulation_threshold,
            zone_superpeer_count: self.parsed_or(ZONE_SUPERPEER_COUNT, base.zone_superpeer_count),
            ..base
        }
    }

    /// `base` with the store timeout and quorum overridden. The quorum follows the superpeer count.
    pub fn account_store_configuration(&self, base: AccountStoreConfiguration) -> AccountStoreConfiguration {
        let timeout_millis = self.parsed_or(STORE_REQUEST_TIMEOUT, base.store_request_timeout.as_millis() as u64);
        AccountStoreConfiguration {
            quorum: self.parsed_or(ZONE_SUPERPEER_COUNT, base.quorum),
            store_request_timeout: Duration::from_millis(timeout_millis),
        }
    }

    fn parsed_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            None => default,
            Some(value) => value.parse().unwrap_or_else(|_| {
                log::warn!("Ignoring unparseable setting {} = {:?}", key, value);
                default
            }),
        }
    }
}
