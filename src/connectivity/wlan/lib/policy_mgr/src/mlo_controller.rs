// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decides which links of an ML STA stay active as other interfaces come and go, and tracks the
//! link force command outstanding in firmware.
//!
//! Decisions are taken on snapshots of the connection table; the connection mutex is never held
//! while a force command is sent.

use {
    crate::{
        admission::{conc_ext_flags, Admission},
        catalog::HwCatalog,
        channel::{is_24ghz, Freq, HwModeBandwidth},
        collaborators::{MacAddr, VdevManager},
        config::MAX_NUMBER_OF_CONC_CONNECTIONS,
        conn_table::{OpMode, PolicyMode, VdevId},
        error::PolicyError,
        mlo_link::{
            get_ml_sta_info, ForceMode, ForceReason, MlStaInfo, SetLinkRequest, SetLinkResponse,
            SetLinkState,
        },
        session::LinkFollowUp,
        PolicyManager,
    },
    log::{debug, error, info, warn},
    std::time::{Duration, Instant},
};

/// Links of `ml` that a new STA on `freq` pushes out, or none when some link already shares
/// its channel.
pub fn get_concurrent_num_links(
    catalog: &HwCatalog,
    same_band_sta_allowed: bool,
    ml: &[(VdevId, Freq)],
    freq: Freq,
) -> Vec<VdevId> {
    if ml.iter().any(|(_, f)| *f == freq) {
        debug!("STA on freq {} is SCC with an ML link", freq);
        return vec![];
    }
    get_affected_links_for_sta_sta(catalog, same_band_sta_allowed, ml, freq)
}

/// A 2.4 GHz STA displaces the 2.4 GHz link. A 5/6 GHz STA displaces the link SBS can't keep
/// apart from it, or the non 2.4 GHz link under DBS. When no single link can be named, all of
/// them are returned.
pub fn get_affected_links_for_sta_sta(
    catalog: &HwCatalog,
    same_band_sta_allowed: bool,
    ml: &[(VdevId, Freq)],
    freq: Freq,
) -> Vec<VdevId> {
    let all = || ml.iter().map(|(v, _)| *v).collect::<Vec<_>>();
    if is_24ghz(freq) {
        return match ml.iter().find(|(_, f)| is_24ghz(*f)) {
            Some((v, _)) => vec![*v],
            None => all(),
        };
    }

    let ml_on_2g = ml.iter().any(|(_, f)| is_24ghz(*f));
    if !ml_on_2g || same_band_sta_allowed {
        if ml.iter().any(|(_, f)| catalog.are_sbs_chan(freq, *f)) {
            return match ml.iter().find(|(_, f)| !catalog.are_sbs_chan(freq, *f)) {
                Some((v, _)) => vec![*v],
                None => all(),
            };
        }
    }

    match ml.iter().find(|(_, f)| !is_24ghz(*f)) {
        Some((v, _)) => vec![*v],
        None => all(),
    }
}

/// A SAP restricted to 2.4 GHz by its ACS list always lands on a MAC the ML links don't use when
/// none of them is on 2.4 GHz.
fn is_2ghz_only_sap_affecting_links(
    vdevs: &dyn VdevManager,
    vdev_id: VdevId,
    freq: Freq,
    ml: &[(VdevId, Freq)],
) -> bool {
    is_24ghz(freq)
        && vdevs.opmode(vdev_id) == Some(OpMode::Sap)
        && vdevs.is_sap_acs_24ghz_only(vdev_id)
        && !ml.iter().any(|(_, f)| is_24ghz(*f))
}

/// Counts (ML link, SAP/GO/CLI) pairs that end up time-sharing one MAC.
pub fn get_affected_links_for_go_sap_cli(
    catalog: &HwCatalog,
    vdevs: &dyn VdevManager,
    ml: &[(VdevId, Freq)],
    p2p_sap: &[(VdevId, Freq)],
) -> usize {
    if p2p_sap.is_empty() || ml.len() < 2 {
        return 0;
    }
    let mut num_affected = 0;
    for (_, ml_freq) in ml {
        for (vdev_id, freq) in p2p_sap {
            if ml_freq == freq {
                continue;
            }
            if is_2ghz_only_sap_affecting_links(vdevs, *vdev_id, *freq, ml) {
                num_affected += 1;
                continue;
            }
            if !vdevs.is_high_tput_or_low_latency(*vdev_id) {
                continue;
            }
            if catalog.are_2_freq_on_same_mac(*ml_freq, *freq) {
                debug!("ML link on {} shares a MAC with vdev {} on {}", ml_freq, vdev_id, freq);
                num_affected += 1;
            }
        }
    }
    num_affected
}

/// Two links on different channels that no hardware mode can separate.
pub fn is_ml_sta_links_in_mcc(catalog: &HwCatalog, ml: &[(VdevId, Freq)]) -> bool {
    ml.iter().enumerate().any(|(i, (_, f1))| {
        ml[i + 1..].iter().any(|(_, f2)| f1 != f2 && catalog.two_freq_always_on_same_mac(*f1, *f2))
    })
}

impl PolicyManager {
    /// Sends a link force command and marks it outstanding. The marker is cleared again when
    /// the serializer refuses the command.
    pub fn mlo_sta_set_link(
        &self,
        reason: ForceReason,
        mode: ForceMode,
        vdevs: &[VdevId],
    ) -> Result<(), PolicyError> {
        self.mlo_sta_set_link_ext(reason, mode, vdevs, &[])
    }

    pub fn mlo_sta_set_link_ext(
        &self,
        reason: ForceReason,
        mode: ForceMode,
        vdevs: &[VdevId],
        inactive: &[VdevId],
    ) -> Result<(), PolicyError> {
        if vdevs.is_empty() {
            error!("Invalid number of vdev for set link");
            return Err(PolicyError::Inval("no link to force"));
        }
        let req = SetLinkRequest::new(reason, mode, vdevs, inactive);
        info!("set link {:?} {:?} vdevs {:?} inactive {:?}", reason, mode, vdevs, inactive);

        self.state.lock().set_link = SetLinkState::InFlight;
        if let Err(e) = self.collab.mlo.set_link_req(&req) {
            error!("set link req failed: {:?}", e);
            self.complete_set_link();
            return Err(PolicyError::Collaborator(e));
        }
        Ok(())
    }

    fn complete_set_link(&self) {
        self.state.lock().set_link = SetLinkState::Idle;
        self.set_link_done.notify_all();
    }

    pub fn set_link_state(&self) -> SetLinkState {
        self.state.lock().set_link
    }

    fn force_links(&self, reason: ForceReason, mode: ForceMode, vdevs: &[VdevId]) {
        if let Err(e) = self.mlo_sta_set_link(reason, mode, vdevs) {
            debug!("link force {:?} {:?} not sent: {}", mode, reason, e);
        }
    }

    /// Applies a firmware link force result to the tables: links firmware enabled move back to
    /// the connection table, links it disabled move to the disabled link table.
    pub fn handle_set_link_response(&self, req: &SetLinkRequest, resp: &SetLinkResponse) {
        if resp.status != 0 {
            error!("set link status {}, mode {:?}", resp.status, req.mode);
            self.complete_set_link();
            return;
        }

        let (enable, disable) = match req.mode {
            ForceMode::Active => (Some(resp.active), None),
            ForceMode::Inactive => (None, Some(resp.inactive)),
            ForceMode::ActiveNum => {
                if resp.active.num_words == 0 {
                    (None, None)
                } else {
                    (Some(resp.active), Some(resp.active.symmetric_difference(&req.vdev_bitmap)))
                }
            }
            ForceMode::InactiveNum => {
                if resp.inactive.num_words == 0 {
                    (None, None)
                } else {
                    (
                        Some(resp.inactive.symmetric_difference(&req.vdev_bitmap)),
                        Some(resp.inactive),
                    )
                }
            }
            ForceMode::NoForce => (Some(req.vdev_bitmap), None),
            ForceMode::ActiveInactive => (Some(resp.active), Some(resp.inactive)),
        };
        if let Some(enable) = enable {
            for vdev_id in enable.vdevs() {
                self.move_vdev_from_disabled_to_connection_tbl(vdev_id);
            }
        }
        if let Some(disable) = disable {
            for vdev_id in disable.vdevs() {
                self.move_vdev_from_connection_to_disabled_tbl(vdev_id);
            }
        }

        if req.reason == ForceReason::LinkRemoval {
            self.trigger_roam_on_link_removal();
        }
        self.complete_set_link();
    }

    /// Blocks until the outstanding link force command completes. Fails at once when none is
    /// outstanding, and clears the marker when the configured timeout expires.
    pub fn wait_for_set_link_update(&self) -> Result<(), PolicyError> {
        let timeout_ms = self.config.set_link_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut state = self.state.lock();
        if state.set_link != SetLinkState::InFlight {
            return Err(PolicyError::Failure("no set link in progress"));
        }
        while state.set_link == SetLinkState::InFlight {
            if self.set_link_done.wait_until(&mut state, deadline).timed_out() {
                if state.set_link == SetLinkState::InFlight {
                    warn!("set link did not complete within {} ms", timeout_ms);
                    state.set_link = SetLinkState::Idle;
                    return Err(PolicyError::Timeout(timeout_ms));
                }
                break;
            }
        }
        Ok(())
    }

    fn is_mlo_sta(&self, vdev_id: VdevId) -> bool {
        self.collab.vdevs.opmode(vdev_id) == Some(OpMode::Sta)
            && self.collab.vdevs.is_mlo(vdev_id)
    }

    pub fn move_vdev_from_disabled_to_connection_tbl(&self, vdev_id: VdevId) {
        if !self.is_mlo_sta(vdev_id) {
            return;
        }
        if self.state.lock().delete_from_disabled_links(vdev_id).is_err() {
            debug!("vdev {} is not in disabled links", vdev_id);
            return;
        }
        if let Err(e) = self.incr_active_session_with(OpMode::Sta, vdev_id, LinkFollowUp::Skip) {
            error!("vdev {} failed to come back active: {}", vdev_id, e);
        }
    }

    pub fn move_vdev_from_connection_to_disabled_tbl(&self, vdev_id: VdevId) {
        if !self.is_mlo_sta(vdev_id) {
            return;
        }
        let freq = self.collab.vdevs.operating_freq(vdev_id);
        let connected =
            self.state.lock().check_conn_with_mode_and_vdev_id(PolicyMode::Sta, vdev_id).is_ok();
        if connected {
            if let Err(e) =
                self.decr_session_set_pcl_with(OpMode::Sta, vdev_id, LinkFollowUp::Skip)
            {
                error!("vdev {} failed to go inactive: {}", vdev_id, e);
            }
        }
        if let Err(e) = self.state.lock().add_to_disabled_links(freq, PolicyMode::Sta, vdev_id) {
            error!("vdev {} not added to disabled links: {}", vdev_id, e);
        }
    }

    /// Takes `vdev_id` down and refreshes the preferred channel list of every remaining STA.
    pub fn decr_session_set_pcl(&self, opmode: OpMode, vdev_id: VdevId) -> Result<(), PolicyError> {
        self.decr_session_set_pcl_with(opmode, vdev_id, LinkFollowUp::Handle)
    }

    fn decr_session_set_pcl_with(
        &self,
        opmode: OpMode,
        vdev_id: VdevId,
        follow_up: LinkFollowUp,
    ) -> Result<(), PolicyError> {
        self.decr_active_session_with(opmode, vdev_id, follow_up)?;
        let stas: Vec<VdevId> =
            self.state.lock().mode_specific_connections(PolicyMode::Sta).map(|c| c.vdev_id).collect();
        for sta in stas {
            self.collab.sme.set_pcl_for_existing_combo(PolicyMode::Sta, sta);
        }
        Ok(())
    }

    /// An ML partner link that the current concurrency can't host.
    pub fn ml_link_vdev_need_to_be_disabled(&self, vdev_id: VdevId) -> bool {
        let vdevs = self.collab.vdevs.as_ref();
        if vdevs.opmode(vdev_id) != Some(OpMode::Sta)
            || !vdevs.is_mlo(vdev_id)
            || !vdevs.is_mlo_link(vdev_id)
        {
            return false;
        }
        let freq = vdevs.operating_freq(vdev_id);
        let ext_flags = conc_ext_flags(vdevs, vdev_id, false);
        !self.is_concurrency_allowed(PolicyMode::Sta, freq, HwModeBandwidth::Mhz20, ext_flags)
    }

    pub fn ml_sta_info(&self) -> MlStaInfo {
        get_ml_sta_info(&self.state.lock(), self.collab.vdevs.as_ref())
    }

    fn ml_sta_and_p2p_sap_info(&self) -> (MlStaInfo, Vec<(VdevId, Freq)>) {
        let state = self.state.lock();
        let info = get_ml_sta_info(&state, self.collab.vdevs.as_ref());
        let p2p_sap = state
            .connections()
            .iter()
            .filter(|c| {
                matches!(c.mode, PolicyMode::Sap | PolicyMode::P2pClient | PolicyMode::P2pGo)
            })
            .map(|c| (c.vdev_id, c.freq))
            .collect();
        (info, p2p_sap)
    }

    /// ML and legacy STA rows, without the force-inactive links.
    pub fn get_ml_and_non_ml_sta_count(&self) -> (Vec<(VdevId, Freq)>, Vec<(VdevId, Freq)>) {
        let state = self.state.lock();
        let split = state
            .mode_specific_connections(PolicyMode::Sta)
            .map(|c| (c.vdev_id, c.freq))
            .partition(|(vdev_id, _)| self.collab.vdevs.is_mlo(*vdev_id));
        split
    }

    /// Link decisions need every link connected, and a link removal under way exactly when
    /// `reason` is the removal itself.
    pub fn handle_ml_sta_link_state_allowed(&self, reason: ForceReason) -> Result<(), PolicyError> {
        let info = self.ml_sta_info();
        if info.ml.is_empty() || info.num_ml() > MAX_NUMBER_OF_CONC_CONNECTIONS {
            debug!("ml sta num is {}", info.num_ml());
            return Err(PolicyError::Inval("no ML STA"));
        }
        let vdevs = self.collab.vdevs.as_ref();
        if info.ml.iter().any(|(v, _)| !vdevs.is_connected(*v)) {
            debug!("ML STA links not all connected");
            return Err(PolicyError::Failure("ML STA not connected"));
        }
        let removal_in_progress = info.ml.iter().any(|(v, _)| vdevs.is_link_removed(*v));
        match reason {
            ForceReason::LinkRemoval if !removal_in_progress => {
                Err(PolicyError::Failure("no link removed"))
            }
            ForceReason::LinkRemoval => Ok(()),
            _ if removal_in_progress => {
                debug!("link removal in progress, skip {:?}", reason);
                Err(PolicyError::Failure("link removal in progress"))
            }
            _ => Ok(()),
        }
    }

    /// Roams the ML STA when every active link has been removed by the AP.
    pub fn trigger_roam_on_link_removal(&self) {
        let info = self.ml_sta_info();
        if info.out_of_range() {
            debug!("ml links {} disabled {}", info.num_ml(), info.num_disabled);
            return;
        }
        let vdevs = self.collab.vdevs.as_ref();
        let num_active = info.num_active();
        if info.ml[..num_active].iter().any(|(v, _)| !vdevs.is_link_removed(*v))
            || info.num_ml() < 2
        {
            return;
        }
        let removed = info.ml.iter().find(|(v, _)| vdevs.is_link_removed(*v));
        let assoc = info.ml.iter().find(|(v, _)| !vdevs.is_mlo_link(*v));
        let (removed, assoc) = match (removed, assoc) {
            (Some((removed, _)), Some((assoc, _))) => (*removed, *assoc),
            _ => {
                debug!("no removed link or assoc link");
                return;
            }
        };
        if info.ml.iter().any(|(v, _)| !vdevs.is_connected(*v)) {
            debug!("ML STA not connected, no roam");
            return;
        }
        info!("roam on assoc vdev {} after link {} removed", assoc, removed);
        if let Err(e) = self.collab.sme.roam_invoke(assoc) {
            error!("roam invoke on vdev {} failed: {:?}", assoc, e);
        }
    }

    pub fn is_mlo_sta_present(&self) -> bool {
        let state = self.state.lock();
        let present = state
            .mode_specific_connections(PolicyMode::Sta)
            .any(|c| self.collab.vdevs.is_mlo(c.vdev_id));
        present
    }

    fn mlo_freqs_of_mode(&self, mode: PolicyMode) -> Option<Vec<(VdevId, Freq)>> {
        let vdevs: Vec<VdevId> = {
            let state = self.state.lock();
            let vdevs = state.mode_specific_connections(mode).map(|c| c.vdev_id).collect();
            vdevs
        };
        if vdevs.len() < 2 {
            return None;
        }
        Some(
            vdevs
                .into_iter()
                .filter(|v| self.collab.vdevs.is_mlo(*v))
                .map(|v| (v, self.collab.vdevs.operating_freq(v)))
                .collect(),
        )
    }

    /// Whether the ML links of `mode` sit on SBS channels, with those links.
    pub fn is_mlo_in_mode_sbs(&self, mode: PolicyMode) -> (bool, Vec<VdevId>) {
        let links = match self.mlo_freqs_of_mode(mode) {
            Some(links) => links,
            None => return (false, vec![]),
        };
        let vdevs = links.iter().map(|(v, _)| *v).collect();
        if links.len() < 2 || links.iter().any(|(_, f)| is_24ghz(*f)) {
            return (false, vdevs);
        }
        let sbs = self.catalog.read().are_sbs_chan(links[0].1, links[1].1);
        (sbs, vdevs)
    }

    /// Whether the ML links of `mode` span 2.4 GHz and 5/6 GHz, with those links.
    pub fn is_mlo_in_mode_dbs(&self, mode: PolicyMode) -> (bool, Vec<VdevId>) {
        let links = match self.mlo_freqs_of_mode(mode) {
            Some(links) => links,
            None => return (false, vec![]),
        };
        let vdevs = links.iter().map(|(v, _)| *v).collect();
        let dbs = links.iter().any(|(_, f)| is_24ghz(*f)) && links.iter().any(|(_, f)| !is_24ghz(*f));
        (dbs, vdevs)
    }

    /// Whether the ML STA runs eMLSR, with its links.
    pub fn is_mlo_in_mode_emlsr(&self) -> (bool, Vec<VdevId>) {
        let stas: Vec<VdevId> = {
            let state = self.state.lock();
            let stas = state.mode_specific_connections(PolicyMode::Sta).map(|c| c.vdev_id).collect();
            stas
        };
        let vdevs = self.collab.vdevs.as_ref();
        let emlsr = stas.iter().any(|v| vdevs.is_emlsr_capable(*v));
        let mlo = stas.into_iter().filter(|v| vdevs.is_mlo(*v)).collect();
        (emlsr, mlo)
    }

    /// Keeps a single eMLSR link while another interface is up and releases the force once the
    /// eMLSR STA is alone again.
    pub fn handle_emlsr_sta_concurrency(&self, conc_vdev_up: bool, emlsr_sta_up: bool) {
        let (emlsr, links) = self.is_mlo_in_mode_emlsr();
        if links.len() < 2 || !emlsr {
            return;
        }
        if conc_vdev_up || (emlsr_sta_up && self.state.lock().connection_count() > 2) {
            self.force_links(ForceReason::Connect, ForceMode::InactiveNum, &links);
        } else if emlsr_sta_up {
            self.force_links(ForceReason::Disconnect, ForceMode::NoForce, &links);
        }
    }

    pub fn is_emlsr_sta_concurrency_present(&self) -> bool {
        let (emlsr, links) = self.is_mlo_in_mode_emlsr();
        emlsr && links.len() < self.state.lock().connection_count()
    }

    /// Whether some legacy STA runs on a different MAC than another STA.
    pub fn concurrent_sta_on_different_mac(&self) -> bool {
        let (ml, non_ml) = self.get_ml_and_non_ml_sta_count();
        let catalog = self.catalog.read();
        if !catalog.is_hw_dbs_capable() {
            return false;
        }
        if ml.len() + non_ml.len() < 2 || non_ml.is_empty() {
            return false;
        }
        let first = non_ml[0].1;
        if non_ml[1..].iter().any(|(_, f)| !catalog.two_freq_always_on_same_mac(*f, first)) {
            return true;
        }
        if non_ml.len() >= 2 {
            return false;
        }
        ml.iter().any(|(_, f)| !catalog.two_freq_always_on_same_mac(*f, first))
    }

    fn ml_sta_concurrency_on_connect(&self, vdev_id: VdevId, info: &MlStaInfo) {
        let vdevs = self.collab.vdevs.as_ref();
        let freq = match info.non_ml.first() {
            Some((_, non_ml_freq)) if vdevs.is_mlo(vdev_id) => *non_ml_freq,
            Some(_) => vdevs.bss_freq(vdev_id),
            None => return,
        };
        if freq == 0 {
            return;
        }
        let affected = get_concurrent_num_links(
            &self.catalog.read(),
            self.config.same_band_sta_allowed,
            &info.ml,
            freq,
        );
        if affected.is_empty() {
            return;
        }
        let mode = if affected.len() < info.num_ml() {
            if !vdevs.is_sta_inactivity_allowed_with_quiet(&info.ml_vdevs(), &affected) {
                debug!("quiet schedule keeps links {:?} active", affected);
                return;
            }
            ForceMode::Inactive
        } else {
            ForceMode::ActiveNum
        };
        self.force_links(ForceReason::Connect, mode, &affected);
    }

    /// STA + ML STA: forces off the links the legacy STA can't coexist with. Returns whether
    /// the case applied.
    pub fn handle_ml_sta_link_concurrency(&self, vdev_id: VdevId) -> bool {
        if self.collab.vdevs.opmode(vdev_id) != Some(OpMode::Sta) {
            return false;
        }
        let (info, p2p_sap) = self.ml_sta_and_p2p_sap_info();
        if !p2p_sap.is_empty() {
            debug!("SAP, GO or CLI present, not a STA + ML STA case");
            return false;
        }
        if info.num_active() == 0 || info.non_ml.is_empty() {
            return false;
        }
        if info.num_ml() < 2
            || info.num_ml() > MAX_NUMBER_OF_CONC_CONNECTIONS
            || info.num_active() < 2
        {
            debug!("ml links {} disabled {}", info.num_ml(), info.num_disabled);
            return false;
        }
        self.ml_sta_concurrency_on_connect(vdev_id, &info);
        true
    }

    /// ML links on different channels of one MAC keep a single link active.
    pub fn handle_mcc_ml_sta(&self, vdev_id: VdevId) -> bool {
        if self.collab.vdevs.opmode(vdev_id) != Some(OpMode::Sta) {
            return false;
        }
        let info = self.ml_sta_info();
        if info.num_ml() < 2
            || info.num_ml() > MAX_NUMBER_OF_CONC_CONNECTIONS
            || info.num_disabled > 0
        {
            return false;
        }
        if !is_ml_sta_links_in_mcc(&self.catalog.read(), &info.ml) {
            return false;
        }
        if self.is_mlo_in_mode_emlsr().0 {
            debug!("eMLSR links may share a MAC");
            return false;
        }
        info!("ML STA links {:?} in MCC, keep one active", info.ml);
        self.force_links(ForceReason::Connect, ForceMode::ActiveNum, &info.ml_vdevs());
        true
    }

    /// Whether the force-inactive link may come back given the current concurrency.
    pub fn sta_ml_link_enable_allowed(&self, info: &MlStaInfo) -> bool {
        if info.num_disabled == 0 || info.num_ml() < 2 {
            return false;
        }
        if is_ml_sta_links_in_mcc(&self.catalog.read(), &info.ml) {
            return false;
        }
        let (vdev_id, freq) = match info.ml.last() {
            Some(link) => *link,
            None => return false,
        };
        if freq == 0 {
            return false;
        }
        let ext_flags = conc_ext_flags(self.collab.vdevs.as_ref(), vdev_id, false);
        self.is_concurrency_allowed(PolicyMode::Sta, freq, HwModeBandwidth::Mhz20, ext_flags)
    }

    fn handle_sap_cli_go_ml_sta_up_csa(&self, vdev_id: VdevId) {
        if self.handle_ml_sta_link_state_allowed(ForceReason::Connect).is_err() {
            return;
        }
        if self.is_mlo_in_mode_emlsr().0 {
            debug!("eMLSR STA handles its own links");
            return;
        }
        if self.handle_mcc_ml_sta(vdev_id) || self.handle_ml_sta_link_concurrency(vdev_id) {
            return;
        }

        let (info, p2p_sap) = self.ml_sta_and_p2p_sap_info();
        if info.num_ml() < 2
            || info.num_ml() > MAX_NUMBER_OF_CONC_CONNECTIONS
            || p2p_sap.len() > MAX_NUMBER_OF_CONC_CONNECTIONS
        {
            debug!("ml links {} p2p/sap {}", info.num_ml(), p2p_sap.len());
            return;
        }
        let num_affected = get_affected_links_for_go_sap_cli(
            &self.catalog.read(),
            self.collab.vdevs.as_ref(),
            &info.ml,
            &p2p_sap,
        );
        if num_affected == 0 {
            if self.sta_ml_link_enable_allowed(&info) {
                self.force_links(ForceReason::Disconnect, ForceMode::NoForce, &info.ml_vdevs());
            }
            return;
        }
        if info.num_disabled > 0 {
            debug!("a link is already inactive");
            return;
        }
        self.force_links(ForceReason::Connect, ForceMode::ActiveNum, &info.ml_vdevs());
    }

    /// Re-evaluates the ML STA links after `vdev_id` came up or switched channel.
    pub fn handle_ml_sta_links_on_vdev_up_csa(&self, opmode: OpMode, vdev_id: VdevId) {
        if self.collab.vdevs.opmode(vdev_id).is_none() {
            error!("vdev {} unknown", vdev_id);
            return;
        }
        if matches!(opmode, OpMode::Sta | OpMode::Sap | OpMode::P2pClient | OpMode::P2pGo) {
            self.handle_sap_cli_go_ml_sta_up_csa(vdev_id);
        }
    }

    /// A SAP/GO changed traffic profile: settle any outstanding force first, decide again, and
    /// wait for that decision to land.
    pub fn handle_ml_sta_links_on_traffic_type_change(&self, vdev_id: VdevId) {
        if let Err(e) = self.wait_for_set_link_update() {
            debug!("no set link to wait for: {}", e);
        }
        self.handle_sap_cli_go_ml_sta_up_csa(vdev_id);
        if let Err(e) = self.wait_for_set_link_update() {
            debug!("no set link to wait for: {}", e);
        }
    }

    fn ml_sta_enable_on_sta_down(&self, vdev_id: VdevId) -> bool {
        if self.collab.vdevs.opmode(vdev_id) != Some(OpMode::Sta) {
            return false;
        }
        let info = self.ml_sta_info();
        if info.num_ml() < 2 || info.num_ml() > MAX_NUMBER_OF_CONC_CONNECTIONS {
            return false;
        }
        if !info.non_ml.is_empty() {
            debug!("legacy STA still connected");
            return true;
        }
        if info.num_disabled > 0 && self.sta_ml_link_enable_allowed(&info) {
            self.force_links(ForceReason::Disconnect, ForceMode::NoForce, &info.ml_vdevs());
        }
        true
    }

    fn re_enable_ml_sta_on_p2p_sap_sta_down(&self, vdev_id: VdevId) {
        if self.handle_ml_sta_link_state_allowed(ForceReason::Disconnect).is_err() {
            return;
        }
        if self.ml_sta_enable_on_sta_down(vdev_id) {
            return;
        }
        let (info, p2p_sap) = self.ml_sta_and_p2p_sap_info();
        if info.num_ml() < 2
            || info.num_ml() > MAX_NUMBER_OF_CONC_CONNECTIONS
            || p2p_sap.len() > MAX_NUMBER_OF_CONC_CONNECTIONS
        {
            return;
        }
        if !self.sta_ml_link_enable_allowed(&info) {
            return;
        }
        let num_affected = if p2p_sap.is_empty() {
            0
        } else {
            get_affected_links_for_go_sap_cli(
                &self.catalog.read(),
                self.collab.vdevs.as_ref(),
                &info.ml,
                &p2p_sap,
            )
        };
        if num_affected > 0 {
            debug!("{} ML links still affected", num_affected);
            return;
        }
        self.force_links(ForceReason::Disconnect, ForceMode::NoForce, &info.ml_vdevs());
    }

    /// Re-evaluates the ML STA links after `vdev_id` went down.
    pub fn handle_ml_sta_links_on_vdev_down(&self, opmode: OpMode, vdev_id: VdevId) {
        if matches!(opmode, OpMode::Sta | OpMode::Sap | OpMode::P2pClient | OpMode::P2pGo) {
            self.re_enable_ml_sta_on_p2p_sap_sta_down(vdev_id);
        }
    }

    /// Picks the first inactive, non-removed link the current concurrency can host once
    /// `vdev_id` is gone. Also reports the last non-removed link seen.
    fn pick_link_vdev_from_inactive_list(
        &self,
        vdev_id: VdevId,
        inactive: &[(VdevId, Freq)],
    ) -> (Option<VdevId>, Option<VdevId>) {
        let vdevs = self.collab.vdevs.as_ref();
        let mut state = self.state.lock();
        let stored = state.store_and_del_conn_info_by_vdev_id(vdev_id);
        let mut picked = None;
        let mut non_removed = None;
        {
            let catalog = self.catalog.read();
            let admission = Admission {
                config: &self.config,
                catalog: &catalog,
                state: &state,
                collab: &self.collab,
            };
            for (link, freq) in inactive {
                if vdevs.is_link_removed(*link) {
                    debug!("link {} is removed too", link);
                    continue;
                }
                non_removed = Some(*link);
                let ext_flags = conc_ext_flags(vdevs, *link, false);
                if admission.is_concurrency_allowed(
                    PolicyMode::Sta,
                    *freq,
                    HwModeBandwidth::Mhz20,
                    ext_flags,
                ) {
                    picked = Some(*link);
                    break;
                }
            }
        }
        state.restore_deleted_conn_info(stored);
        (picked, non_removed)
    }

    /// The AP is removing link `vdev_id`: swap in an inactive link if one fits, roam if nothing
    /// is left, else just force the link inactive.
    pub fn handle_link_removal_on_vdev(&self, vdev_id: VdevId) {
        let vdevs = self.collab.vdevs.as_ref();
        if vdevs.is_link_removed(vdev_id) {
            debug!("link removal on vdev {} already handled", vdev_id);
            return;
        }
        vdevs.set_link_removed(vdev_id, true);
        if self.handle_ml_sta_link_state_allowed(ForceReason::LinkRemoval).is_err() {
            vdevs.set_link_removed(vdev_id, false);
            return;
        }

        let info = self.ml_sta_info();
        if info.out_of_range() || info.num_ml() < 2 {
            debug!("ml links {} disabled {}", info.num_ml(), info.num_disabled);
            return;
        }
        let num_active = info.num_active();
        if !info.ml[..num_active].iter().any(|(v, _)| *v == vdev_id) {
            self.force_links(ForceReason::LinkRemoval, ForceMode::Inactive, &[vdev_id]);
            return;
        }

        let (picked, non_removed) = if num_active < info.num_ml() {
            self.pick_link_vdev_from_inactive_list(vdev_id, &info.ml[num_active..])
        } else {
            (None, None)
        };
        if let Some(picked) = picked {
            if let Err(e) = self.mlo_sta_set_link_ext(
                ForceReason::LinkRemoval,
                ForceMode::ActiveInactive,
                &[picked],
                &[vdev_id],
            ) {
                debug!("link swap not sent: {}", e);
            }
            return;
        }
        if num_active < 2 {
            if non_removed.is_some() {
                self.trigger_roam_on_link_removal();
            }
            return;
        }
        self.force_links(ForceReason::LinkRemoval, ForceMode::Inactive, &[vdev_id]);
    }

    /// A SAP on `sap_freq` is MCC with every active ML link and needs another channel.
    pub fn is_restart_sap_required_with_mlo_sta(&self, sap_vdev: VdevId, sap_freq: Freq) -> bool {
        let info = self.ml_sta_info();
        if info.num_ml() > MAX_NUMBER_OF_CONC_CONNECTIONS {
            return false;
        }
        let active = &info.ml[..info.num_active()];
        let restart = active.len() >= 2 && !active.iter().any(|(_, f)| *f == sap_freq);
        if restart {
            debug!("SAP vdev {} on {} not SCC with ML links", sap_vdev, sap_freq);
        }
        restart
    }

    /// Keeps the partner links of `vdev_id` whose address is listed active and forces the rest
    /// inactive.
    pub fn activate_mlo_links(&self, vdev_id: VdevId, active_link_addrs: &[MacAddr]) {
        let vdevs = self.collab.vdevs.as_ref();
        if !vdevs.is_connected(vdev_id) || !vdevs.is_mlo(vdev_id) {
            error!("vdev {} is not a connected ML STA", vdev_id);
            return;
        }
        let (active, inactive): (Vec<_>, Vec<_>) = vdevs
            .mlo_partners(vdev_id)
            .into_iter()
            .partition(|p| active_link_addrs.contains(&p.link_addr));
        let active: Vec<VdevId> = active.iter().map(|p| p.vdev_id).collect();
        let inactive: Vec<VdevId> = inactive.iter().map(|p| p.vdev_id).collect();

        if !active.is_empty() && self.is_emlsr_sta_concurrency_present() {
            debug!("eMLSR concurrency present, links stay as they are");
            return;
        }
        if !active.is_empty() {
            self.force_links(ForceReason::Disconnect, ForceMode::Active, &active);
        }
        if !inactive.is_empty() {
            self.force_links(ForceReason::Connect, ForceMode::Inactive, &inactive);
        }
    }
}
