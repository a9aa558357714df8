// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Concurrency policy for a multi-MAC WLAN chip: tracks every active interface, decides whether
//! a new connection or channel switch may proceed on the current hardware, and keeps the links of
//! an ML STA forced active or inactive as other interfaces come and go.

pub mod admission;
pub mod alert;
pub mod catalog;
pub mod channel;
pub mod collaborators;
pub mod config;
pub mod conn_table;
pub mod error;
pub mod freq_range;
pub mod hw_mode;
pub mod mlo_controller;
pub mod mlo_link;
pub mod same_mac;
pub mod session;

#[cfg(test)]
mod test_utils;

use {
    crate::{
        admission::Admission,
        catalog::{HwCatalog, RadioCombination},
        channel::Freq,
        collaborators::{Collaborators, WmiService},
        config::PolicyConfig,
        conn_table::{ConnectionState, OpMode, PolicyMode, VdevId},
        error::PolicyError,
        hw_mode::{DualMacConfig, HwModeDescriptor, MacPhyCaps},
    },
    log::info,
    parking_lot::{Condvar, Mutex, RwLock},
};

/// Policy manager context of one SoC.
///
/// Lock order: the connection state mutex first, then the catalog. The catalog is never held
/// while the connection state is locked afresh.
pub struct PolicyManager {
    pub(crate) config: PolicyConfig,
    pub(crate) catalog: RwLock<HwCatalog>,
    pub(crate) state: Mutex<ConnectionState>,
    /// Signalled whenever the outstanding link force command completes.
    pub(crate) set_link_done: Condvar,
    pub(crate) collab: Collaborators,
}

impl PolicyManager {
    pub fn new(config: PolicyConfig, collab: Collaborators) -> Self {
        let catalog = HwCatalog::new(
            config.dual_mac_feature,
            collab.wmi.is_enabled(WmiService::DualBandSimultaneous),
            collab.regulatory.freq_bounds(),
        );
        let state = ConnectionState::new(config.max_conc_cxns as usize, config.alert_action);
        Self {
            config,
            catalog: RwLock::new(catalog),
            state: Mutex::new(state),
            set_link_done: Condvar::new(),
            collab,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Runs `f` against one consistent snapshot of the connection state and the catalog.
    pub(crate) fn with_admission<R>(&self, f: impl FnOnce(&Admission<'_>) -> R) -> R {
        let state = self.state.lock();
        let catalog = self.catalog.read();
        f(&Admission { config: &self.config, catalog: &catalog, state: &state, collab: &self.collab })
    }

    /// Records the firmware dual-MAC scan and mode configuration words.
    pub fn init_dbs_config(&self, scan_config: u32, fw_config: u32) {
        let mut catalog = self.catalog.write();
        catalog.init_dbs_config(scan_config, fw_config);
        catalog.init_sbs_fw_config(self.config.sbs_enable, fw_config);
    }

    /// Rebuilds the hw-mode catalog from firmware capabilities, with the regulatory band bounds
    /// in force now.
    pub fn update_hw_mode_list(
        &self,
        caps: &[MacPhyCaps],
        num_hw_modes: usize,
    ) -> Result<(), PolicyError> {
        let bounds = self.collab.regulatory.freq_bounds();
        let mut catalog = self.catalog.write();
        catalog.set_bounds(bounds);
        catalog.update_hw_mode_list(caps, num_hw_modes)?;
        info!("hw mode list updated: {} modes", catalog.hw_modes().len());
        Ok(())
    }

    pub fn update_sbs_freq(&self, sbs_lower_band_end_freq: Freq) -> Result<(), PolicyError> {
        self.catalog.write().update_sbs_freq(sbs_lower_band_end_freq)
    }

    pub fn set_current_hw_mode(&self, index: u32) -> Result<(), PolicyError> {
        self.catalog.write().set_current_hw_mode(index)
    }

    pub fn get_current_hw_mode(&self) -> Result<HwModeDescriptor, PolicyError> {
        self.catalog.read().get_current_hw_mode()
    }

    pub fn is_hw_dbs_capable(&self) -> bool {
        self.catalog.read().is_hw_dbs_capable()
    }

    pub fn is_hw_sbs_capable(&self) -> bool {
        self.catalog.read().is_hw_sbs_capable()
    }

    pub fn is_hw_emlsr_capable(&self) -> bool {
        self.catalog.read().is_hw_emlsr_capable()
    }

    pub fn is_current_hwmode_dbs(&self) -> bool {
        self.catalog.read().is_current_hwmode_dbs()
    }

    pub fn is_current_hwmode_sbs(&self) -> bool {
        self.catalog.read().is_current_hwmode_sbs()
    }

    pub fn is_current_hwmode_emlsr(&self) -> bool {
        self.catalog.read().is_current_hwmode_emlsr()
    }

    pub fn get_dbs_config(&self) -> DualMacConfig {
        *self.catalog.read().get_dbs_config()
    }

    pub fn is_dbs_enable(&self) -> bool {
        self.catalog.read().is_dbs_enable()
    }

    pub fn is_dbs_scan_allowed(&self) -> bool {
        self.catalog.read().is_dbs_scan_allowed()
    }

    pub fn is_interband_mcc_supported(&self) -> bool {
        self.collab.is_interband_mcc_supported()
    }

    pub fn get_radio_combinations(&self, max: usize) -> Result<Vec<RadioCombination>, PolicyError> {
        self.catalog.read().get_radio_combinations(max)
    }

    pub fn are_2_freq_on_same_mac(&self, freq_1: Freq, freq_2: Freq) -> bool {
        self.catalog.read().are_2_freq_on_same_mac(freq_1, freq_2)
    }

    pub fn are_3_freq_on_same_mac(&self, freq_1: Freq, freq_2: Freq, freq_3: Freq) -> bool {
        self.catalog.read().are_3_freq_on_same_mac(freq_1, freq_2, freq_3)
    }

    pub fn are_sbs_chan(&self, freq_1: Freq, freq_2: Freq) -> bool {
        self.catalog.read().are_sbs_chan(freq_1, freq_2)
    }

    pub fn get_connection_count(&self) -> usize {
        self.state.lock().connection_count()
    }

    /// Rows in `mode`, with their vdevs in table order.
    pub fn mode_specific_connection_count(&self, mode: PolicyMode) -> (usize, Vec<VdevId>) {
        let state = self.state.lock();
        let vdevs: Vec<VdevId> = state.mode_specific_connections(mode).map(|c| c.vdev_id).collect();
        (vdevs.len(), vdevs)
    }

    /// True when the table and the session counters disagree.
    pub fn validate_conn_info(&self) -> bool {
        self.state.lock().validate_conn_info()
    }

    pub fn current_concurrency_is_mcc(&self) -> bool {
        let state = self.state.lock();
        let mcc = state.current_concurrency_is_mcc(&self.catalog.read());
        mcc
    }

    pub fn current_concurrency_is_scc(&self) -> bool {
        let state = self.state.lock();
        let scc = state.current_concurrency_is_scc(&self.catalog.read());
        scc
    }

    pub fn get_disabled_ml_links_count(&self) -> usize {
        self.state.lock().get_disabled_ml_links_count()
    }

    pub fn set_concurrency_mode(&self, mode: OpMode) {
        self.state.lock().set_concurrency_mode(mode)
    }

    pub fn clear_concurrency_mode(&self, mode: OpMode) {
        self.state.lock().clear_concurrency_mode(mode)
    }
}
