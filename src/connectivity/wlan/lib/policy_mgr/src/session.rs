// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Session lifecycle: what happens when a vdev comes up or goes down.
//!
//! The connection mutex is only held while the table and counters change. Every collaborator
//! notification that follows runs on a snapshot taken under the lock.

use {
    crate::{
        channel::{is_24ghz, is_5ghz, Freq, HwModeBandwidth},
        config::DfsMasterConfig,
        conn_table::{ChainMask, ConnectionEntry, OpMode, PolicyMode, VdevId},
        error::PolicyError,
        PolicyManager,
    },
    log::{debug, error, info},
};

/// Event an indoor channel list update is computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndoorConcUpdateType {
    Connect,
    DisconnectWithoutConcurrency,
    DisconnectWithConcurrency,
    SwitchWithoutConcurrency,
    SwitchWithConcurrency,
}

/// Whether a session change is followed by the ML STA link decisions. Link moves triggered by a
/// link force response skip them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkFollowUp {
    Handle,
    Skip,
}

/// Per-mode row counts taken right after a table change.
#[derive(Clone, Copy, Debug, Default)]
struct ModeCounts {
    total: usize,
    sta: usize,
    sap: usize,
    p2p_cli: usize,
    p2p_go: usize,
    ndi: usize,
}

impl ModeCounts {
    fn legacy_concurrency(&self) -> bool {
        self.sap + self.p2p_cli + self.p2p_go + self.ndi > 0
    }
}

fn chain_mask_and_nss(freq: Freq, nss: Option<(u8, u8)>) -> (ChainMask, u8) {
    match nss {
        Some((nss_2g, nss_5g)) => {
            let band_nss = if is_24ghz(freq) { nss_2g } else { nss_5g };
            let chain_mask = if (is_24ghz(freq) && nss_2g > 1) || (is_5ghz(freq) && nss_5g > 1) {
                ChainMask::TwoTwo
            } else {
                ChainMask::OneOne
            };
            (chain_mask, band_nss)
        }
        None => (ChainMask::OneOne, 0),
    }
}

impl PolicyManager {
    fn mode_counts(&self) -> ModeCounts {
        let state = self.state.lock();
        ModeCounts {
            total: state.connection_count(),
            sta: state.mode_specific_connection_count(PolicyMode::Sta),
            sap: state.mode_specific_connection_count(PolicyMode::Sap),
            p2p_cli: state.mode_specific_connection_count(PolicyMode::P2pClient),
            p2p_go: state.mode_specific_connection_count(PolicyMode::P2pGo),
            ndi: state.mode_specific_connection_count(PolicyMode::Ndi),
        }
    }

    /// Records `vdev_id` coming up in `opmode` and notifies everyone who tracks concurrency.
    pub fn incr_active_session(&self, opmode: OpMode, vdev_id: VdevId) -> Result<(), PolicyError> {
        self.incr_active_session_with(opmode, vdev_id, LinkFollowUp::Handle)
    }

    pub(crate) fn incr_active_session_with(
        &self,
        opmode: OpMode,
        vdev_id: VdevId,
        follow_up: LinkFollowUp,
    ) -> Result<(), PolicyError> {
        let mode = opmode.policy_mode().ok_or(PolicyError::Inval("mode without sessions"))?;

        let conn_info = if mode == PolicyMode::NanDisc {
            self.collab.conn_info.nan_connection_info(vdev_id)
        } else {
            self.collab.conn_info.connection_info(vdev_id)
        };
        let conn_info = conn_info.map_err(|e| {
            error!("can't find vdev_id {} connection info: {:?}", vdev_id, e);
            PolicyError::Collaborator(e)
        })?;
        let nss = match self.collab.sme.nss_for_vdev(conn_info.mode) {
            Ok(nss) => Some(nss),
            Err(e) => {
                error!("Error in getting nss: {:?}", e);
                None
            }
        };
        let (chain_mask, original_nss) = chain_mask_and_nss(conn_info.freq, nss);
        let entry = ConnectionEntry {
            vdev_id,
            mode: conn_info.mode,
            mac_id: conn_info.mac_id,
            freq: conn_info.freq,
            bw: conn_info.bw,
            chain_mask,
            original_nss,
            ch_flagext: conn_info.ch_flagext,
        };

        let (session_count, sta_vdevs) = {
            let mut state = self.state.lock();
            let session_count = state.incr_active_session_count(mode);
            if let Err(e) = state.incr_connection_count(entry) {
                state.decr_active_session_count(mode);
                return Err(e);
            }
            let sta_vdevs: Vec<VdevId> = if mode != PolicyMode::Sta {
                state.mode_specific_connections(PolicyMode::Sta).map(|c| c.vdev_id).collect()
            } else {
                vec![]
            };
            (session_count, sta_vdevs)
        };
        debug!("No.# of active sessions for mode {:?} = {}", mode, session_count);

        let datapath = &self.collab.datapath;
        if mode == PolicyMode::Ndi {
            datapath.indicate_active_ndp_cnt(vdev_id, session_count);
        }
        if mode != PolicyMode::NanDisc {
            datapath.flow_pool_map(vdev_id);
        }
        if !entry.mode.is_sta_like() {
            datapath.connection_info_update();
        }

        for sta in sta_vdevs {
            self.collab.sme.rso_stop(sta);
            self.collab.sme.set_pcl_for_existing_combo(PolicyMode::Sta, sta);
            self.collab.sme.rso_start(sta);
        }

        datapath.tdls_increment_session();

        let counts = self.mode_counts();
        if counts.sta > 1 || counts.legacy_concurrency() {
            datapath.disable_rx_ol_in_concurrency(true);
        }
        if counts.sap == 1 {
            datapath.set_rx_mode_rps(true);
        }

        if mode.is_beaconing() || mode.is_sta_like() {
            self.update_dfs_master_dynamic_enabled(vdev_id);
        }
        if self.update_indoor_concurrency(vdev_id, 0, IndoorConcUpdateType::Connect) {
            self.collab.regulatory.recompute_current_chan_list();
        }

        if follow_up == LinkFollowUp::Handle {
            self.handle_ml_sta_links_on_vdev_up_csa(opmode, vdev_id);
        }
        Ok(())
    }

    /// Records `vdev_id` going down. A vdev without a row may still be a force-inactive ML link,
    /// which is then dropped from the disabled link table instead.
    pub fn decr_active_session(&self, opmode: OpMode, vdev_id: VdevId) -> Result<(), PolicyError> {
        self.decr_active_session_with(opmode, vdev_id, LinkFollowUp::Handle)
    }

    pub(crate) fn decr_active_session_with(
        &self,
        opmode: OpMode,
        vdev_id: VdevId,
        follow_up: LinkFollowUp,
    ) -> Result<(), PolicyError> {
        let mode = opmode.policy_mode().ok_or(PolicyError::Inval("mode without sessions"))?;

        let (session_count, cur_freq, is_mcc, last_disconn_sta_freq) = {
            let mut state = self.state.lock();
            if let Err(e) = state.check_conn_with_mode_and_vdev_id(mode, vdev_id) {
                debug!("No connection with mode:{:?} vdev_id:{}", mode, vdev_id);
                if state.delete_from_disabled_links(vdev_id).is_ok() {
                    info!("vdev {} dropped from disabled links", vdev_id);
                }
                return Err(e);
            }
            state.update_sta_scc_info_for_later_check(mode, vdev_id);
            let session_count = state.decr_active_session_count(mode);
            let cur_freq = state.chan_by_vdev_id(vdev_id).unwrap_or(0);
            state.decr_connection_count(vdev_id)?;
            let is_mcc = state.current_concurrency_is_mcc(&self.catalog.read());
            (session_count, cur_freq, is_mcc, state.last_disconn_sta_freq())
        };
        debug!("No.# of active sessions for mode {:?} = {}", mode, session_count);

        let datapath = &self.collab.datapath;
        datapath.connection_info_update();
        if mode != PolicyMode::NanDisc {
            datapath.flow_pool_unmap(vdev_id);
        }
        if mode == PolicyMode::Ndi {
            datapath.indicate_active_ndp_cnt(vdev_id, session_count);
        }
        datapath.tdls_decrement_session();

        let counts = self.mode_counts();
        if counts.total == 0 || (counts.sta == 1 && !counts.legacy_concurrency()) {
            datapath.disable_rx_ol_in_concurrency(false);
        }
        if counts.sap == 0 {
            datapath.set_rx_mode_rps(false);
        }
        if mode == PolicyMode::Sta || mode == PolicyMode::Sap {
            datapath.ipa_set_mcc_mode(is_mcc);
        }

        if mode.is_beaconing() || mode.is_sta_like() {
            self.update_dfs_master_dynamic_enabled(vdev_id);
        }
        if last_disconn_sta_freq == 0
            && self.update_indoor_concurrency(
                vdev_id,
                cur_freq,
                IndoorConcUpdateType::DisconnectWithoutConcurrency,
            )
        {
            self.collab.regulatory.recompute_current_chan_list();
        }
        if self.config.keep_6ghz_on_sta_disconnect && mode.is_sta_like() {
            self.collab.regulatory.recompute_current_chan_list();
        }

        if follow_up == LinkFollowUp::Skip {
            return Ok(());
        }
        self.handle_ml_sta_links_on_vdev_down(opmode, vdev_id);
        Ok(())
    }

    /// Whether DFS master capability stays enabled while `vdev_id` changes state, given the
    /// other STA connections. The result is stored and pushed to regulatory.
    pub fn update_dfs_master_dynamic_enabled(&self, vdev_id: VdevId) -> bool {
        let enable = match self.config.dfs_master {
            DfsMasterConfig::Unspecified | DfsMasterConfig::Enabled => true,
            DfsMasterConfig::Disabled => false,
            DfsMasterConfig::Flex => {
                let (sta_on_5g, sta_on_2g) = self.state.lock().sta_bands_except(vdev_id);
                let dbs = self.catalog.read().is_hw_dbs_capable();
                (dbs && !sta_on_5g) || (!sta_on_5g && !sta_on_2g)
            }
        };
        self.state.lock().dynamic_dfs_master_disabled = !enable;
        debug!("dfs master dynamic enabled {} after vdev {}", enable, vdev_id);
        self.collab.regulatory.set_dfs_master_enabled(enable);
        enable
    }

    pub fn get_dfs_master_dynamic_enabled(&self) -> bool {
        !self.state.lock().dynamic_dfs_master_disabled
    }

    /// Adds or removes the indoor channel a STA connection made usable for SAP. Returns true
    /// when the current channel list has to be recomputed.
    pub fn update_indoor_concurrency(
        &self,
        vdev_id: VdevId,
        discon_freq: Freq,
        update_type: IndoorConcUpdateType,
    ) -> bool {
        if self.config.indoor_channel_support || !self.config.sta_sap_scc_on_indoor_chan {
            return false;
        }
        let opmode = match self.collab.vdevs.opmode(vdev_id) {
            Some(opmode) => opmode,
            None => {
                error!("vdev {} not found for indoor update", vdev_id);
                return false;
            }
        };
        let mode_matches = match update_type {
            IndoorConcUpdateType::DisconnectWithConcurrency => {
                opmode == OpMode::Sap || opmode == OpMode::P2pGo
            }
            _ => opmode == OpMode::Sta || opmode == OpMode::P2pClient,
        };
        if !mode_matches {
            return false;
        }

        let (freq, bw, count_with_freq) = {
            let state = self.state.lock();
            let (freq, bw) = match update_type {
                IndoorConcUpdateType::Connect
                | IndoorConcUpdateType::SwitchWithoutConcurrency
                | IndoorConcUpdateType::SwitchWithConcurrency => (
                    state.chan_by_vdev_id(vdev_id).unwrap_or(0),
                    state.bw_by_vdev_id(vdev_id).unwrap_or(HwModeBandwidth::Mhz20),
                ),
                IndoorConcUpdateType::DisconnectWithoutConcurrency
                | IndoorConcUpdateType::DisconnectWithConcurrency => {
                    (discon_freq, HwModeBandwidth::Mhz20)
                }
            };
            (freq, bw, state.connection_count_with_freq(freq))
        };

        let regulatory = &self.collab.regulatory;
        let indoor = is_5ghz(freq) && regulatory.is_indoor(freq);
        if update_type != IndoorConcUpdateType::SwitchWithoutConcurrency && !indoor {
            return false;
        }

        match update_type {
            IndoorConcUpdateType::Connect => {
                regulatory.modify_indoor_concurrency(Some(vdev_id), freq, Some(bw), true);
            }
            IndoorConcUpdateType::DisconnectWithoutConcurrency => {
                regulatory.modify_indoor_concurrency(Some(vdev_id), 0, None, false);
            }
            IndoorConcUpdateType::SwitchWithoutConcurrency => {
                let was_indoor = is_5ghz(discon_freq) && regulatory.is_indoor(discon_freq);
                if !indoor && !was_indoor {
                    return false;
                }
                regulatory.modify_indoor_concurrency(Some(vdev_id), 0, None, false);
                if indoor {
                    regulatory.modify_indoor_concurrency(Some(vdev_id), freq, Some(bw), true);
                }
            }
            IndoorConcUpdateType::DisconnectWithConcurrency => {
                if count_with_freq > 1 {
                    return false;
                }
                regulatory.modify_indoor_concurrency(None, freq, None, false);
            }
            IndoorConcUpdateType::SwitchWithConcurrency => {
                regulatory.modify_indoor_concurrency(Some(vdev_id), freq, Some(bw), true);
                return false;
            }
        }
        debug!("indoor concurrency {:?} for vdev {} freq {}", update_type, vdev_id, freq);
        true
    }

    /// Moves the row of `vdev_id` to a new channel after a switch.
    pub fn update_connection_info(&self, vdev_id: VdevId) -> Result<(), PolicyError> {
        let conn_info = self.collab.conn_info.connection_info(vdev_id)?;
        let updated = self.state.lock().update_conn_freq(vdev_id, conn_info.freq, conn_info.bw);
        if !updated {
            return Err(PolicyError::NotFound(vdev_id));
        }
        self.collab.datapath.connection_info_update();
        Ok(())
    }
}
