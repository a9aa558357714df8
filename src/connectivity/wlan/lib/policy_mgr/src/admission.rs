// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Concurrency admission: whether a new connection, or an existing one moving channel, may start
//! given the connections already up and what the hardware and firmware support.
//!
//! [`Admission`] borrows an already locked [`ConnectionState`], so the gates never take the
//! connection mutex themselves. [`PolicyManager::allow_concurrency_csa`] relies on this to run the
//! whole check inside its delete/restore transaction.

use {
    crate::{
        catalog::HwCatalog,
        channel::{
            is_24ghz, is_5ghz, is_6ghz, same_band, ChannelState, ConcExtFlags, Freq,
            HwModeBandwidth,
        },
        collaborators::{Collaborators, VdevManager, WmiService},
        config::PolicyConfig,
        conn_table::{ConnectionState, OpMode, PolicyMode, VdevId},
        mlo_link::get_ml_sta_info,
        PolicyManager,
    },
    log::{debug, error},
};

/// Why a SAP/GO is switching channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsaReason {
    Unknown,
    UnsafeChannel,
    LteCoex,
    Dcs,
    ConcurrentStaChangedChannel,
    StaConnectDfsToNonDfs,
    UserInitiated,
}

/// Extra admission facts for `vdev_id`. Only STA vdevs that are part of an ML association carry
/// any, unless `force_mlo` treats the vdev as ML regardless.
pub fn conc_ext_flags(vdevs: &dyn VdevManager, vdev_id: VdevId, force_mlo: bool) -> ConcExtFlags {
    let mut flags = ConcExtFlags(0);
    if vdevs.opmode(vdev_id) != Some(OpMode::Sta) {
        return flags;
    }
    if !force_mlo && !vdevs.is_mlo(vdev_id) {
        return flags;
    }
    flags.set_mlo(true);
    if vdevs.is_mlo_link(vdev_id) {
        if let Some(assoc) = vdevs.assoc_vdev(vdev_id) {
            if vdevs.is_active(assoc) {
                flags.set_mlo_link_assoc_connected(true);
            }
        }
    }
    flags
}

/// Admission gates evaluated against one locked snapshot of the connection state.
pub struct Admission<'a> {
    pub config: &'a PolicyConfig,
    pub catalog: &'a HwCatalog,
    pub state: &'a ConnectionState,
    pub collab: &'a Collaborators,
}

impl<'a> Admission<'a> {
    /// Whether a connection in `mode` may come up on `freq` (0 when not known yet) at `bw`.
    pub fn is_concurrency_allowed(
        &self,
        mode: PolicyMode,
        freq: Freq,
        bw: HwModeBandwidth,
        ext_flags: ConcExtFlags,
    ) -> bool {
        let num_connections = self.state.connection_count();

        if num_connections > 0 && self.config.sub_20_mhz_enabled {
            debug!("dont allow concurrency if Sub 20 MHz is enabled");
            return false;
        }

        if self.state.max_concurrent_connections_reached() {
            debug!("Reached max concurrent connections: {}", self.config.max_conc_cxns);
            self.state.validate_conn_info();
            return false;
        }

        if freq != 0 {
            let is_dfs_ch =
                is_5ghz(freq) && self.collab.regulatory.channel_state(freq, bw) == ChannelState::Dfs;

            if !self.allow_new_home_channel(mode, freq, num_connections, ext_flags) {
                return false;
            }
            if !self.is_5g_channel_allowed(freq, PolicyMode::P2pGo)
                || !self.is_5g_channel_allowed(freq, PolicyMode::Sap)
            {
                return false;
            }
            if !self.is_6g_channel_allowed(mode, freq) {
                return false;
            }

            let scc_with_sta_on_dfs = self.config.is_force_scc()
                && self.config.sta_sap_scc_on_dfs_chan
                && self.state.is_sta_sap_scc(freq);
            let go_scc_waived = !self.config.go_scc_enforced() && mode == PolicyMode::P2pGo;
            if mode.is_beaconing()
                && (!scc_with_sta_on_dfs || go_scc_waived)
                && is_dfs_ch
                && self.disallow_mcc(freq)
            {
                debug!("No MCC, SAP/GO about to come up on DFS channel");
                return false;
            }

            if !self.catalog.is_hw_dbs_capable()
                && num_connections > 0
                && is_24ghz(freq)
                && self.state.is_sap_p2pgo_on_dfs()
            {
                debug!("MCC not allowed: SAP/P2PGO on DFS");
                return false;
            }
        }

        if mode == PolicyMode::Sta && !self.allow_sta_concurrency(freq, ext_flags) {
            return false;
        }

        if !self.allow_sap_go_concurrency(mode, freq, None) {
            debug!("This concurrency combination is not allowed");
            return false;
        }

        if freq != 0
            && mode == PolicyMode::P2pGo
            && num_connections > 0
            && !self.collab.is_p2p_p2p_conc_supported()
            && self
                .state
                .mode_specific_connections(PolicyMode::P2pGo)
                .any(|c| same_band(freq, c.freq))
        {
            debug!("Don't allow P2P GO on same band");
            return false;
        }

        if !self.allow_wapi_concurrency() {
            debug!("Don't allow new conn when wapi security conn existing");
            return false;
        }

        if !self.is_third_conn_sta_p2p_p2p_valid(mode) {
            error!("Don't allow third connection as GO or GC or STA with old fw");
            return false;
        }

        if mode.is_beaconing() && !self.is_ll_sap_concurrency_valid(freq, mode) {
            error!("LL SAP concurrency is not valid");
            return false;
        }

        true
    }

    /// Rejects a home channel the hardware cannot add on top of `num_connections` existing ones.
    /// Up to one existing connection only needs inter-band MCC on single-MAC hardware; a third
    /// distinct channel must not share a MAC with both others; a fourth connection must fit some
    /// supported hw mode.
    pub fn allow_new_home_channel(
        &self,
        mode: PolicyMode,
        freq: Freq,
        num_connections: usize,
        ext_flags: ConcExtFlags,
    ) -> bool {
        let conns = self.state.connections();
        let dual_mac = self.catalog.is_hw_dbs_capable() || self.catalog.is_hw_sbs_capable();

        if !dual_mac
            && !self.collab.is_interband_mcc_supported()
            && conns.iter().any(|c| !same_band(c.freq, freq))
        {
            debug!("No inter-band MCC on single MAC, reject freq {}", freq);
            return false;
        }

        match num_connections {
            2 => {
                let (freq_0, freq_1) = (conns[0].freq, conns[1].freq);
                if freq == freq_0 || freq == freq_1 || freq_0 == freq_1 {
                    return true;
                }
                if !dual_mac {
                    debug!("3 home channels {} {} {} on single MAC", freq_0, freq_1, freq);
                    return false;
                }
                if self.catalog.three_freq_always_on_same_mac(freq_0, freq_1, freq) {
                    debug!("3 home channels {} {} {} on same MAC", freq_0, freq_1, freq);
                    return false;
                }
                true
            }
            3 => {
                let existing: Vec<(Freq, PolicyMode)> =
                    conns.iter().map(|c| (c.freq, c.mode)).collect();
                let ml_links = self.ml_sta_active_freq(freq, mode, ext_flags);
                self.catalog.allow_4th_new_freq(&existing, freq, mode, ml_links)
            }
            _ => true,
        }
    }

    /// The two ML STA home channels that must stay on different MACs, counting the new link on
    /// `freq` when it is the second link of an ML STA coming up.
    pub fn ml_sta_active_freq(
        &self,
        freq: Freq,
        mode: PolicyMode,
        ext_flags: ConcExtFlags,
    ) -> Option<(Freq, Freq)> {
        let info = get_ml_sta_info(self.state, self.collab.vdevs.as_ref());
        if info.out_of_range() {
            return None;
        }
        let num_active = info.num_active();
        if num_active > 1 {
            Some((info.ml[0].1, info.ml[1].1))
        } else if num_active > 0 && ext_flags.mlo() && mode == PolicyMode::Sta {
            Some((info.ml[0].1, freq))
        } else {
            None
        }
    }

    /// A `mode` connection on a DFS channel does not tolerate another 5 GHz channel on its MAC.
    pub fn is_5g_channel_allowed(&self, freq: Freq, mode: PolicyMode) -> bool {
        for conn in self.state.mode_specific_connections(mode) {
            if conn.ch_flagext.any_dfs()
                && is_5ghz(freq)
                && freq != conn.freq
                && !self.catalog.are_sbs_chan(freq, conn.freq)
            {
                debug!("don't allow MCC if SAP/GO on DFS channel {}", conn.freq);
                return false;
            }
        }
        true
    }

    pub fn is_6g_channel_allowed(&self, mode: PolicyMode, freq: Freq) -> bool {
        if !is_6ghz(freq) {
            return true;
        }
        if !matches!(
            mode,
            PolicyMode::Sta | PolicyMode::Sap | PolicyMode::P2pClient | PolicyMode::P2pGo
        ) {
            debug!("Not supported 6GHz concurrency for mode {:?}", mode);
            return false;
        }
        for conn in self.state.connections().iter().filter(|c| c.mode.is_beaconing()) {
            if conn.ch_flagext.any_dfs()
                && is_5ghz(conn.freq)
                && freq != conn.freq
                && !self.catalog.are_sbs_chan(freq, conn.freq)
            {
                debug!("NAN+SAP/GO DFS MCC on 6GHz not allowed, freq {}", freq);
                return false;
            }
        }
        true
    }

    /// Some existing connection would share a MAC with `freq` on a different channel.
    pub fn disallow_mcc(&self, freq: Freq) -> bool {
        self.state
            .connections()
            .iter()
            .any(|c| c.freq != freq && self.catalog.are_2_freq_on_same_mac(c.freq, freq))
    }

    pub fn allow_sta_concurrency(&self, freq: Freq, ext_flags: ConcExtFlags) -> bool {
        let vdevs = self.collab.vdevs.as_ref();
        let mut sta_count = 0;
        let mut mlo_sta_present = false;
        for conn in self.state.mode_specific_connections(PolicyMode::Sta) {
            // Partner links of one ML STA count once.
            if vdevs.is_mlo_link(conn.vdev_id) {
                continue;
            }
            sta_count += 1;
            if vdevs.is_mlo(conn.vdev_id) {
                mlo_sta_present = true;
            }
        }

        if sta_count > 0 && !self.collab.allow_multiple_sta_connections() {
            debug!("Multiple STA connections is not allowed");
            return false;
        }
        if mlo_sta_present && ext_flags.mlo_link_assoc_connected() {
            debug!("new freq {} is link of connected MLO STA", freq);
            return true;
        }
        if ext_flags.mlo() && mlo_sta_present {
            debug!("Disallow ML STA when ML STA is present");
            return false;
        }
        if sta_count >= 2 {
            debug!("Disallow 3rd STA");
            return false;
        }
        true
    }

    /// Band rules between two beaconing vdevs. `vdev_id` excludes the vdev that is moving.
    pub fn allow_sap_go_concurrency(
        &self,
        mode: PolicyMode,
        freq: Freq,
        vdev_id: Option<VdevId>,
    ) -> bool {
        if !mode.is_beaconing() {
            return true;
        }
        let dbs = self.catalog.is_hw_dbs_capable();
        for conn in self.state.connections() {
            if Some(conn.vdev_id) == vdev_id || !conn.mode.is_beaconing() {
                continue;
            }
            if self.collab.is_p2p_p2p_conc_supported()
                && mode == PolicyMode::P2pGo
                && conn.mode == PolicyMode::P2pGo
            {
                debug!("GO+GO scc is allowed freq = {}", freq);
                return true;
            }
            if self.collab.dual_beacon_on_single_mac_mcc_capable() {
                return true;
            }
            if self.collab.dual_beacon_on_single_mac_scc_capable() && freq == conn.freq {
                debug!("SCC enabled, 2 AP on same channel, allow 2nd AP");
                return true;
            }
            if !dbs {
                debug!("DBS unsupported, mcc and scc unsupported too, don't allow 2nd AP");
                return false;
            }
            if self.catalog.are_2_freq_on_same_mac(freq, conn.freq) {
                debug!("DBS supported, 2 SAP on same band, reject 2nd AP");
                return false;
            }
        }
        true
    }

    /// At most one ML SAP, and only when no legacy SAP runs next to it.
    pub fn is_mlo_sap_concurrency_allowed(&self, is_new_vdev_mlo: bool) -> bool {
        let vdevs = self.collab.vdevs.as_ref();
        let mut mlo_sap = 0;
        let mut non_mlo_sap = 0;
        for conn in self.state.connections() {
            if vdevs.is_mlo_ap(conn.vdev_id) {
                mlo_sap += 1;
            } else {
                non_mlo_sap += 1;
            }
        }
        if is_new_vdev_mlo {
            mlo_sap += 1;
        } else {
            non_mlo_sap += 1;
        }
        let allowed = mlo_sap <= 1 || non_mlo_sap == 0;
        if !allowed {
            debug!("mlo sap {} non mlo sap {} not allowed", mlo_sap, non_mlo_sap);
        }
        allowed
    }

    pub fn allow_wapi_concurrency(&self) -> bool {
        !(!self.collab.wmi.is_enabled(WmiService::WapiConcurrency)
            && self.collab.vdevs.is_wapi_sta_active()
            && self.state.connection_count() > 0)
    }

    /// STA + P2P + P2P is only allowed when firmware supports P2P+P2P concurrency.
    pub fn is_third_conn_sta_p2p_p2p_valid(&self, new_mode: PolicyMode) -> bool {
        let num_sta = self.state.mode_specific_connection_count(PolicyMode::Sta);
        let num_go = self.state.mode_specific_connection_count(PolicyMode::P2pGo);
        let num_cli = self.state.mode_specific_connection_count(PolicyMode::P2pClient);
        if num_sta + num_go + num_cli != 2 {
            return true;
        }
        if num_sta == 1 && new_mode == PolicyMode::Sta {
            return true;
        }

        let conns = self.state.connections();
        let pair = match (conns.get(0), conns.get(1)) {
            (Some(a), Some(b)) => (a.mode, b.mode),
            _ => return true,
        };
        let sta_or_p2p =
            |m: PolicyMode| matches!(m, PolicyMode::Sta | PolicyMode::P2pGo | PolicyMode::P2pClient);
        let p2p_combo = sta_or_p2p(pair.0)
            && sta_or_p2p(pair.1)
            && !(pair.0 == PolicyMode::Sta && pair.1 == PolicyMode::Sta);
        if p2p_combo
            && num_sta <= 1
            && matches!(new_mode, PolicyMode::Sta | PolicyMode::P2pClient | PolicyMode::P2pGo)
            && !self.collab.is_p2p_p2p_conc_supported()
        {
            return false;
        }
        true
    }

    /// Frequency of the first SAP running a low latency AP profile.
    pub fn get_ll_sap_freq(&self) -> Option<Freq> {
        let vdevs = self.collab.vdevs.as_ref();
        let ll_sap = self
            .state
            .mode_specific_connections(PolicyMode::Sap)
            .find(|c| vdevs.ap_policy(c.vdev_id).is_low_latency())?;
        debug!("LL SAP present with vdev_id {} and freq {}", ll_sap.vdev_id, ll_sap.freq);
        Some(ll_sap.freq)
    }

    /// A low latency SAP keeps its MAC to itself.
    pub fn is_ll_sap_concurrency_valid(&self, freq: Freq, mode: PolicyMode) -> bool {
        let ll_sap_freq = match self.get_ll_sap_freq() {
            Some(ll_sap_freq) => ll_sap_freq,
            None => return true,
        };
        if freq != 0 && self.catalog.two_freq_always_on_same_mac(ll_sap_freq, freq) {
            debug!(
                "Invalid LL-SAP concurrency for SBS/DBS hw, ll-sap freq {}, conc_freq {}, conc_mode {:?}",
                ll_sap_freq, freq, mode
            );
            return false;
        }
        true
    }

    /// Extra conditions for a fourth connection next to a SAP or GO: force SCC, DBS, SCC on DFS
    /// and LTE-coex channels, and a frequency from the preferred channel list.
    pub fn is_concurrency_allowed_4_port(
        &self,
        mode: PolicyMode,
        freq: Freq,
        pcl: &[Freq],
    ) -> bool {
        // A new STA may only know its SSID so far.
        if freq == 0 && mode == PolicyMode::Sta {
            return true;
        }
        let sap_count = self.state.mode_specific_connection_count(PolicyMode::Sap);
        let go_count = self.state.mode_specific_connection_count(PolicyMode::P2pGo);
        if sap_count == 0 && go_count == 0 {
            return true;
        }
        if !self.config.is_force_scc() {
            error!("couldn't start 4th port for bad force scc cfg");
            return false;
        }
        if !self.catalog.is_dbs_enable()
            || !self.config.sta_sap_scc_on_dfs_chan
            || !self.config.sta_sap_scc_on_lte_coex_chan
        {
            error!("Couldn't start 4th port for bad cfg of dual mac, dfs scc, lte coex scc");
            return false;
        }
        if pcl.contains(&freq) {
            return true;
        }
        error!("4th port failed on ch freq {} with mode {:?}", freq, mode);
        false
    }
}

impl PolicyManager {
    /// Admission for a new connection, including the preferred channel list check that applies
    /// to a fourth connection.
    pub fn allow_concurrency(
        &self,
        mode: PolicyMode,
        freq: Freq,
        bw: HwModeBandwidth,
        ext_flags: ConcExtFlags,
    ) -> bool {
        let pcl = match self.collab.sme.get_pcl(mode) {
            Ok(pcl) => pcl,
            Err(e) => {
                error!("disallow connection: {:?}", e);
                return false;
            }
        };
        self.with_admission(|admission| {
            Self::admit_with_pcl(admission, mode, freq, bw, ext_flags, &pcl)
        })
    }

    /// Admission for `vdev_id` switching to `freq`. The vdev's own row, or for forced unsafe
    /// channel and DCS switches every row of its mode on its channel, is taken out of the table
    /// while the check runs and put back afterwards.
    pub fn allow_concurrency_csa(
        &self,
        mode: PolicyMode,
        freq: Freq,
        bw: HwModeBandwidth,
        vdev_id: VdevId,
        forced: bool,
        reason: CsaReason,
    ) -> bool {
        let ext_flags = conc_ext_flags(self.collab.vdevs.as_ref(), vdev_id, false);
        let mut state = self.state.lock();
        let old_freq = match state.chan_by_vdev_id(vdev_id) {
            Some(old_freq) => old_freq,
            None => {
                error!("Failed to get channel for vdev:{}", vdev_id);
                return false;
            }
        };
        debug!("vdev {} old freq {} new freq {} forced {} reason {:?}", vdev_id, old_freq, freq, forced, reason);

        let stored = if forced && (reason == CsaReason::UnsafeChannel || reason == CsaReason::Dcs)
        {
            state.store_and_del_conn_info_by_chan_and_mode(old_freq, mode)
        } else {
            state.store_and_del_conn_info_by_vdev_id(vdev_id)
        };

        // The preferred channel list is taken with the vdev's rows out of the table.
        let allowed = match self.collab.sme.get_pcl(mode) {
            Ok(pcl) => {
                let catalog = self.catalog.read();
                let admission = Admission {
                    config: &self.config,
                    catalog: &catalog,
                    state: &state,
                    collab: &self.collab,
                };
                Self::admit_with_pcl(&admission, mode, freq, bw, ext_flags, &pcl)
            }
            Err(e) => {
                error!("disallow csa: {:?}", e);
                false
            }
        };
        if !allowed {
            error!("Concurrency not allowed for this channel freq {}", freq);
        }

        if !stored.is_empty() {
            state.restore_deleted_conn_info(stored);
        }
        allowed
    }

    fn admit_with_pcl(
        admission: &Admission<'_>,
        mode: PolicyMode,
        freq: Freq,
        bw: HwModeBandwidth,
        ext_flags: ConcExtFlags,
        pcl: &[Freq],
    ) -> bool {
        let mut allowed = admission.is_concurrency_allowed(mode, freq, bw, ext_flags);
        if allowed && admission.state.connection_count() == 3 {
            allowed = admission.is_concurrency_allowed_4_port(mode, freq, pcl);
        }
        allowed
    }

    pub fn is_concurrency_allowed(
        &self,
        mode: PolicyMode,
        freq: Freq,
        bw: HwModeBandwidth,
        ext_flags: ConcExtFlags,
    ) -> bool {
        self.with_admission(|admission| admission.is_concurrency_allowed(mode, freq, bw, ext_flags))
    }

    pub fn is_mlo_sap_concurrency_allowed(&self, is_new_vdev_mlo: bool) -> bool {
        self.with_admission(|admission| admission.is_mlo_sap_concurrency_allowed(is_new_vdev_mlo))
    }

    pub fn allow_sap_go_concurrency(
        &self,
        mode: PolicyMode,
        freq: Freq,
        vdev_id: Option<VdevId>,
    ) -> bool {
        self.with_admission(|admission| admission.allow_sap_go_concurrency(mode, freq, vdev_id))
    }

    pub fn get_conc_ext_flags(&self, vdev_id: VdevId, force_mlo: bool) -> ConcExtFlags {
        conc_ext_flags(self.collab.vdevs.as_ref(), vdev_id, force_mlo)
    }

    pub fn is_force_scc(&self) -> bool {
        self.config.is_force_scc()
    }

    pub fn go_scc_enforced(&self) -> bool {
        self.config.go_scc_enforced()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            catalog::tests::{dbs_caps, dbs_sbs_caps},
            collaborators::ApPolicy,
            config::MccToSccSwitch,
            conn_table::tests::entry,
            test_utils::{policy_manager, policy_manager_with_config, FakeVdev},
        },
        test_case::test_case,
    };

    fn no_flags() -> ConcExtFlags {
        ConcExtFlags(0)
    }

    #[test]
    fn first_connection_is_always_allowed() {
        let (pm, _driver) = policy_manager(&dbs_caps(), 2);
        assert!(pm.is_concurrency_allowed(PolicyMode::Sta, 5180, HwModeBandwidth::Mhz80, no_flags()));
        assert!(pm.is_concurrency_allowed(PolicyMode::Sap, 0, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn sub_20_mhz_blocks_any_concurrency() {
        let config = PolicyConfig { sub_20_mhz_enabled: true, ..Default::default() };
        let (pm, _driver) = policy_manager_with_config(&dbs_caps(), 2, config);
        pm.seed(&[entry(0, PolicyMode::Sta, 5180)]);
        assert!(!pm.is_concurrency_allowed(PolicyMode::Sap, 2412, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn max_connections_reached() {
        let config = PolicyConfig { max_conc_cxns: 2, ..Default::default() };
        let (pm, _driver) = policy_manager_with_config(&dbs_caps(), 2, config);
        pm.seed(&[entry(0, PolicyMode::Sta, 5180)]);
        assert!(pm.is_concurrency_allowed(PolicyMode::Sap, 2412, HwModeBandwidth::Mhz20, no_flags()));
        pm.seed(&[entry(1, PolicyMode::Sap, 2412)]);
        assert!(!pm.is_concurrency_allowed(PolicyMode::P2pGo, 5745, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn second_sta_needs_sta_plus_sta_service() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        pm.seed(&[entry(0, PolicyMode::Sta, 5180)]);
        assert!(!pm.is_concurrency_allowed(PolicyMode::Sta, 2412, HwModeBandwidth::Mhz20, no_flags()));
        driver.enable_service(WmiService::StaPlusSta);
        assert!(pm.is_concurrency_allowed(PolicyMode::Sta, 2412, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn third_sta_is_rejected() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.enable_service(WmiService::StaPlusSta);
        pm.seed(&[entry(0, PolicyMode::Sta, 5180), entry(1, PolicyMode::Sta, 2412)]);
        assert!(!pm.is_concurrency_allowed(PolicyMode::Sta, 2437, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn second_ml_sta_is_rejected_unless_partner_link() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.enable_service(WmiService::StaPlusSta);
        driver.add_vdev(0, FakeVdev::ml_sta(5180));
        pm.seed(&[entry(0, PolicyMode::Sta, 5180)]);

        let mut mlo = ConcExtFlags(0);
        mlo.set_mlo(true);
        assert!(!pm.is_concurrency_allowed(PolicyMode::Sta, 2412, HwModeBandwidth::Mhz20, mlo));

        mlo.set_mlo_link_assoc_connected(true);
        assert!(pm.is_concurrency_allowed(PolicyMode::Sta, 2412, HwModeBandwidth::Mhz20, mlo));
    }

    #[test]
    fn ext_flags_for_partner_link_of_active_assoc() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.add_vdev(0, FakeVdev::ml_sta(5180));
        driver.add_vdev(1, FakeVdev { mlo_link: true, assoc_vdev: Some(0), ..FakeVdev::ml_sta(2412) });
        driver.add_vdev(2, FakeVdev::sap(2437));

        let flags = pm.get_conc_ext_flags(1, false);
        assert!(flags.mlo());
        assert!(flags.mlo_link_assoc_connected());
        assert!(!pm.get_conc_ext_flags(0, false).mlo_link_assoc_connected());
        assert_eq!(pm.get_conc_ext_flags(2, true), ConcExtFlags(0));
    }

    #[test]
    fn two_saps_on_same_mac_need_dual_beacon_support() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        pm.seed(&[entry(0, PolicyMode::Sap, 5180)]);
        assert!(!pm.allow_sap_go_concurrency(PolicyMode::Sap, 5745, None));
        assert!(pm.allow_sap_go_concurrency(PolicyMode::Sap, 2412, None));
        // The moving SAP does not count against itself.
        assert!(pm.allow_sap_go_concurrency(PolicyMode::Sap, 5745, Some(0)));

        driver.enable_service(WmiService::DualBeaconOnSingleMacScc);
        assert!(pm.allow_sap_go_concurrency(PolicyMode::Sap, 5180, None));
        driver.enable_service(WmiService::DualBeaconOnSingleMacMcc);
        assert!(pm.allow_sap_go_concurrency(PolicyMode::Sap, 5745, None));
    }

    #[test]
    fn second_go_on_same_band_needs_p2p_p2p() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.enable_service(WmiService::DualBeaconOnSingleMacMcc);
        pm.seed(&[entry(0, PolicyMode::P2pGo, 5180)]);
        assert!(!pm.is_concurrency_allowed(PolicyMode::P2pGo, 5745, HwModeBandwidth::Mhz20, no_flags()));
        assert!(pm.is_concurrency_allowed(PolicyMode::P2pGo, 2412, HwModeBandwidth::Mhz20, no_flags()));
        driver.enable_service(WmiService::P2pP2pConcurrency);
        assert!(pm.is_concurrency_allowed(PolicyMode::P2pGo, 5745, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn dfs_sap_rejects_mcc_on_its_mac() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.set_dfs(5260);
        pm.seed(&[entry(0, PolicyMode::P2pClient, 5180)]);
        assert!(!pm.is_concurrency_allowed(PolicyMode::Sap, 5260, HwModeBandwidth::Mhz20, no_flags()));
        // SCC with the existing connection is fine.
        driver.set_dfs(5180);
        assert!(pm.is_concurrency_allowed(PolicyMode::Sap, 5180, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn five_ghz_blocked_next_to_dfs_sap() {
        let (pm, _driver) = policy_manager(&dbs_caps(), 2);
        let mut sap = entry(0, PolicyMode::Sap, 5260);
        sap.ch_flagext.set_dfs(true);
        pm.seed(&[sap]);
        assert!(!pm.is_concurrency_allowed(PolicyMode::P2pClient, 5180, HwModeBandwidth::Mhz20, no_flags()));
        assert!(pm.is_concurrency_allowed(PolicyMode::P2pClient, 2412, HwModeBandwidth::Mhz20, no_flags()));
        assert!(pm.is_concurrency_allowed(PolicyMode::P2pClient, 5260, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn six_ghz_modes() {
        let (pm, _driver) = policy_manager(&dbs_caps(), 2);
        pm.with_admission(|a| {
            assert!(a.is_6g_channel_allowed(PolicyMode::Sta, 6135));
            assert!(!a.is_6g_channel_allowed(PolicyMode::Ndi, 6135));
            assert!(a.is_6g_channel_allowed(PolicyMode::Ndi, 5180));
        });
    }

    #[test]
    fn six_ghz_next_to_dfs_sap_depends_on_sbs() {
        let (pm, _driver) = policy_manager(&dbs_caps(), 2);
        let mut sap = entry(0, PolicyMode::Sap, 5260);
        sap.ch_flagext.set_dfs(true);
        pm.seed(&[sap]);
        pm.with_admission(|a| assert!(!a.is_6g_channel_allowed(PolicyMode::Sta, 6135)));
    }

    #[test]
    fn wapi_sta_blocks_concurrency_without_service() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.set_wapi_sta_active(true);
        pm.seed(&[entry(0, PolicyMode::Sta, 5180)]);
        assert!(!pm.is_concurrency_allowed(PolicyMode::Sap, 2412, HwModeBandwidth::Mhz20, no_flags()));
        driver.enable_service(WmiService::WapiConcurrency);
        assert!(pm.is_concurrency_allowed(PolicyMode::Sap, 2412, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test_case(PolicyMode::Sta, PolicyMode::P2pGo, PolicyMode::P2pClient, false; "sta go then cli")]
    #[test_case(PolicyMode::P2pClient, PolicyMode::P2pClient, PolicyMode::P2pGo, false; "two cli then go")]
    #[test_case(PolicyMode::Sta, PolicyMode::P2pGo, PolicyMode::Sap, true; "sap is not p2p")]
    #[test_case(PolicyMode::Sta, PolicyMode::P2pClient, PolicyMode::Sta, true; "second sta")]
    fn third_connection_p2p(first: PolicyMode, second: PolicyMode, new: PolicyMode, allowed: bool) {
        let (pm, _driver) = policy_manager(&dbs_caps(), 2);
        pm.seed(&[entry(0, first, 5180), entry(1, second, 2412)]);
        pm.with_admission(|a| assert_eq!(a.is_third_conn_sta_p2p_p2p_valid(new), allowed));
    }

    #[test]
    fn third_connection_p2p_with_fw_support() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.enable_service(WmiService::P2pP2pConcurrency);
        pm.seed(&[entry(0, PolicyMode::Sta, 5180), entry(1, PolicyMode::P2pGo, 2412)]);
        pm.with_admission(|a| assert!(a.is_third_conn_sta_p2p_p2p_valid(PolicyMode::P2pClient)));
    }

    #[test]
    fn low_latency_sap_keeps_its_mac() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.add_vdev(0, FakeVdev { ap_policy: ApPolicy::GamingAudio, ..FakeVdev::sap(5180) });
        pm.seed(&[entry(0, PolicyMode::Sap, 5180)]);
        pm.with_admission(|a| {
            assert_eq!(a.get_ll_sap_freq(), Some(5180));
            assert!(!a.is_ll_sap_concurrency_valid(5745, PolicyMode::P2pGo));
            assert!(a.is_ll_sap_concurrency_valid(2412, PolicyMode::P2pGo));
        });
    }

    #[test]
    fn mlo_sap_concurrency() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.add_vdev(0, FakeVdev { mlo_ap: true, ..FakeVdev::sap(5180) });
        pm.seed(&[entry(0, PolicyMode::Sap, 5180)]);
        assert!(pm.is_mlo_sap_concurrency_allowed(true));
        assert!(pm.is_mlo_sap_concurrency_allowed(false));

        driver.add_vdev(1, FakeVdev { mlo_ap: true, ..FakeVdev::sap(2412) });
        pm.seed(&[entry(1, PolicyMode::Sap, 2412)]);
        assert!(pm.is_mlo_sap_concurrency_allowed(true));
        assert!(!pm.is_mlo_sap_concurrency_allowed(false));
    }

    #[test]
    fn third_home_channel_on_same_mac_is_rejected() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.enable_service(WmiService::DualBeaconOnSingleMacMcc);
        pm.seed(&[entry(0, PolicyMode::Sta, 5180), entry(1, PolicyMode::Sap, 5745)]);
        pm.with_admission(|a| {
            assert!(!a.allow_new_home_channel(PolicyMode::P2pGo, 5500, 2, no_flags()));
            assert!(a.allow_new_home_channel(PolicyMode::P2pGo, 2412, 2, no_flags()));
            assert!(a.allow_new_home_channel(PolicyMode::P2pGo, 5745, 2, no_flags()));
        });
    }

    #[test_case(MccToSccSwitch::Disable, true, false; "dfs scc without force scc")]
    #[test_case(MccToSccSwitch::WithPreferredBand, true, true; "dfs scc with force scc")]
    #[test_case(MccToSccSwitch::WithPreferredBand, false, false; "dfs scc disabled")]
    fn sap_on_dfs_shares_sta_channel_only_with_force_scc(
        switch: MccToSccSwitch,
        sta_sap_scc_on_dfs_chan: bool,
        allowed: bool,
    ) {
        let config =
            PolicyConfig { mcc_to_scc_switch: switch, sta_sap_scc_on_dfs_chan, ..Default::default() };
        let (pm, driver) = policy_manager_with_config(&dbs_caps(), 2, config);
        driver.set_dfs(5260);
        pm.seed(&[entry(0, PolicyMode::Sta, 5260), entry(1, PolicyMode::P2pClient, 5180)]);
        assert_eq!(
            pm.is_concurrency_allowed(PolicyMode::Sap, 5260, HwModeBandwidth::Mhz20, no_flags()),
            allowed
        );
    }

    #[test]
    fn fourth_port_requires_force_scc() {
        let config = PolicyConfig {
            mcc_to_scc_switch: MccToSccSwitch::Disable,
            sta_sap_scc_on_dfs_chan: true,
            ..Default::default()
        };
        let (pm, _driver) = policy_manager_with_config(&dbs_caps(), 2, config);
        pm.seed(&[
            entry(0, PolicyMode::Sta, 5180),
            entry(1, PolicyMode::Sap, 5180),
            entry(2, PolicyMode::P2pClient, 2412),
        ]);
        pm.with_admission(|a| {
            assert!(!a.is_concurrency_allowed_4_port(PolicyMode::P2pGo, 2412, &[2412, 5180]));
            assert!(!a.is_concurrency_allowed_4_port(PolicyMode::Sap, 5180, &[5180]));
            assert!(a.is_concurrency_allowed_4_port(PolicyMode::Sta, 0, &[]));
        });
    }

    #[test]
    fn fourth_port_must_use_pcl_channel() {
        let config = PolicyConfig { sta_sap_scc_on_dfs_chan: true, ..Default::default() };
        let (pm, _driver) = policy_manager_with_config(&dbs_sbs_caps(), 3, config);
        pm.seed(&[
            entry(0, PolicyMode::Sta, 5180),
            entry(1, PolicyMode::Sap, 5180),
            entry(2, PolicyMode::P2pClient, 2412),
        ]);
        pm.with_admission(|a| {
            assert!(a.is_concurrency_allowed_4_port(PolicyMode::P2pGo, 2412, &[2412, 5180]));
            assert!(!a.is_concurrency_allowed_4_port(PolicyMode::P2pGo, 2437, &[2412, 5180]));
        });
    }

    #[test]
    fn allow_concurrency_fails_without_pcl() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        driver.fail_pcl(true);
        assert!(!pm.allow_concurrency(PolicyMode::Sap, 5180, HwModeBandwidth::Mhz20, no_flags()));
        driver.fail_pcl(false);
        assert!(pm.allow_concurrency(PolicyMode::Sap, 5180, HwModeBandwidth::Mhz20, no_flags()));
    }

    #[test]
    fn csa_checks_without_moving_vdev_and_restores_table() {
        let (pm, _driver) = policy_manager(&dbs_caps(), 2);
        pm.seed(&[entry(0, PolicyMode::Sap, 5180), entry(1, PolicyMode::P2pClient, 2412)]);
        let before = pm.state.lock().connections().to_vec();

        // Moving within the 5 GHz MAC only conflicts with itself.
        assert!(pm.allow_concurrency_csa(
            PolicyMode::Sap,
            5745,
            HwModeBandwidth::Mhz20,
            0,
            false,
            CsaReason::UserInitiated
        ));
        assert_eq!(pm.state.lock().connections(), &before[..]);

        assert!(!pm.allow_concurrency_csa(
            PolicyMode::Sap,
            5745,
            HwModeBandwidth::Mhz20,
            7,
            false,
            CsaReason::Unknown
        ));
        assert_eq!(pm.state.lock().connections(), &before[..]);
    }

    #[test]
    fn csa_pcl_is_fetched_inside_the_table_transaction() {
        let (pm, driver) = policy_manager(&dbs_caps(), 2);
        pm.seed(&[entry(0, PolicyMode::Sap, 5180), entry(1, PolicyMode::P2pClient, 2412)]);
        let before = pm.state.lock().connections().to_vec();

        // Unknown vdev bails out before any channel list is requested.
        assert!(!pm.allow_concurrency_csa(
            PolicyMode::Sap,
            5745,
            HwModeBandwidth::Mhz20,
            7,
            false,
            CsaReason::Unknown
        ));
        assert_eq!(driver.pcl_requests(), 0);

        driver.fail_pcl(true);
        assert!(!pm.allow_concurrency_csa(
            PolicyMode::Sap,
            5745,
            HwModeBandwidth::Mhz20,
            0,
            false,
            CsaReason::UserInitiated
        ));
        assert_eq!(driver.pcl_requests(), 1);
        assert_eq!(pm.state.lock().connections(), &before[..]);

        driver.fail_pcl(false);
        assert!(pm.allow_concurrency_csa(
            PolicyMode::Sap,
            5745,
            HwModeBandwidth::Mhz20,
            0,
            false,
            CsaReason::UserInitiated
        ));
        assert_eq!(driver.pcl_requests(), 2);
        assert_eq!(pm.state.lock().connections(), &before[..]);
    }

    #[test]
    fn forced_unsafe_channel_csa_removes_every_sap_on_channel() {
        let (pm, _driver) = policy_manager(&dbs_caps(), 2);
        pm.seed(&[entry(0, PolicyMode::Sap, 5180), entry(1, PolicyMode::Sap, 5180)]);
        let before = pm.state.lock().connections().to_vec();

        assert!(!pm.allow_concurrency_csa(
            PolicyMode::Sap,
            5745,
            HwModeBandwidth::Mhz20,
            0,
            false,
            CsaReason::UnsafeChannel
        ));
        assert!(pm.allow_concurrency_csa(
            PolicyMode::Sap,
            5745,
            HwModeBandwidth::Mhz20,
            0,
            true,
            CsaReason::UnsafeChannel
        ));
        assert_eq!(pm.state.lock().connections(), &before[..]);
    }
}
