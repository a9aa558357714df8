// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        catalog::tests::FW_DBS_SBS,
        channel::{ChannelState, Freq, HwModeBandwidth},
        collaborators::{
            ApPolicy, Collaborators, ConnectionInfo, ConnectionInfoSource, DatapathCallbacks,
            MloPartner, MloSerializer, Regulatory, Sme, VdevManager, WmiService, WmiServices,
        },
        config::PolicyConfig,
        conn_table::{ConnectionEntry, OpMode, PolicyMode, VdevId},
        freq_range::RegFreqBounds,
        hw_mode::MacPhyCaps,
        mlo_link::SetLinkRequest,
        PolicyManager,
    },
    anyhow::{format_err, Error},
    parking_lot::Mutex,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
};

/// Every outbound call a collaborator received, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    SetLink(SetLinkRequest),
    RoamInvoke(VdevId),
    RsoStop(VdevId),
    RsoStart(VdevId),
    SetPcl(PolicyMode, VdevId),
    DfsMaster(bool),
    RecomputeChanList,
    IndoorConcurrency(Option<VdevId>, Freq, Option<HwModeBandwidth>, bool),
    RxOffload(bool),
    Rps(bool),
    IpaMcc(bool),
    FlowPoolMap(VdevId),
    FlowPoolUnmap(VdevId),
    TdlsIncrement,
    TdlsDecrement,
    NdpCount(VdevId, u32),
    ConnectionInfoUpdate,
}

/// What the fake vdev layer knows about one vdev.
#[derive(Clone, Debug)]
pub struct FakeVdev {
    pub opmode: Option<OpMode>,
    pub freq: Freq,
    pub bss_freq: Freq,
    pub mlo: bool,
    pub mlo_link: bool,
    pub mlo_ap: bool,
    pub connected: bool,
    pub active: bool,
    pub assoc_vdev: Option<VdevId>,
    pub link_removed: bool,
    pub emlsr: bool,
    pub acs_24ghz_only: bool,
    pub ap_policy: ApPolicy,
    pub ht_ll: bool,
    pub partners: Vec<MloPartner>,
}

impl Default for FakeVdev {
    fn default() -> Self {
        Self {
            opmode: None,
            freq: 0,
            bss_freq: 0,
            mlo: false,
            mlo_link: false,
            mlo_ap: false,
            connected: true,
            active: true,
            assoc_vdev: None,
            link_removed: false,
            emlsr: false,
            acs_24ghz_only: false,
            ap_policy: ApPolicy::Unspecified,
            ht_ll: false,
            partners: vec![],
        }
    }
}

impl FakeVdev {
    pub fn sta(freq: Freq) -> Self {
        Self { opmode: Some(OpMode::Sta), freq, bss_freq: freq, ..Default::default() }
    }

    pub fn ml_sta(freq: Freq) -> Self {
        Self { mlo: true, ..Self::sta(freq) }
    }

    pub fn sap(freq: Freq) -> Self {
        Self { opmode: Some(OpMode::Sap), freq, bss_freq: freq, ..Default::default() }
    }
}

struct DriverState {
    events: Vec<Event>,
    services: HashSet<WmiService>,
    vdevs: HashMap<VdevId, FakeVdev>,
    conn_info: HashMap<VdevId, ConnectionInfo>,
    dfs: HashSet<Freq>,
    indoor: HashSet<Freq>,
    nss: (u8, u8),
    wapi_sta_active: bool,
    quiet_allowed: bool,
    fail_pcl: bool,
    pcl_requests: usize,
    fail_set_link: bool,
}

impl Default for DriverState {
    fn default() -> Self {
        Self {
            events: vec![],
            services: HashSet::new(),
            vdevs: HashMap::new(),
            conn_info: HashMap::new(),
            dfs: HashSet::new(),
            indoor: HashSet::new(),
            nss: (1, 1),
            wapi_sta_active: false,
            quiet_allowed: true,
            fail_pcl: false,
            pcl_requests: 0,
            fail_set_link: false,
        }
    }
}

/// One object standing in for every collaborator. Outbound calls are recorded as [`Event`]s.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<DriverState>,
}

impl FakeDriver {
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            conn_info: self.clone(),
            regulatory: self.clone(),
            wmi: self.clone(),
            sme: self.clone(),
            mlo: self.clone(),
            vdevs: self.clone(),
            datapath: self.clone(),
        }
    }

    fn record(&self, event: Event) {
        self.state.lock().events.push(event);
    }

    fn vdev<R>(&self, vdev_id: VdevId, f: impl FnOnce(&FakeVdev) -> R) -> Option<R> {
        self.state.lock().vdevs.get(&vdev_id).map(f)
    }

    /// Number of preferred channel lists handed out so far.
    pub fn pcl_requests(&self) -> usize {
        self.state.lock().pcl_requests
    }

    pub fn drain_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.state.lock().events)
    }

    pub fn enable_service(&self, service: WmiService) {
        self.state.lock().services.insert(service);
    }

    pub fn add_vdev(&self, vdev_id: VdevId, vdev: FakeVdev) {
        self.state.lock().vdevs.insert(vdev_id, vdev);
    }

    pub fn set_conn_info(&self, vdev_id: VdevId, info: ConnectionInfo) {
        self.state.lock().conn_info.insert(vdev_id, info);
    }

    pub fn set_dfs(&self, freq: Freq) {
        self.state.lock().dfs.insert(freq);
    }

    pub fn set_indoor(&self, freq: Freq) {
        self.state.lock().indoor.insert(freq);
    }

    pub fn set_nss(&self, nss_2g: u8, nss_5g: u8) {
        self.state.lock().nss = (nss_2g, nss_5g);
    }

    pub fn set_wapi_sta_active(&self, active: bool) {
        self.state.lock().wapi_sta_active = active;
    }

    pub fn set_quiet_allowed(&self, allowed: bool) {
        self.state.lock().quiet_allowed = allowed;
    }

    pub fn fail_pcl(&self, fail: bool) {
        self.state.lock().fail_pcl = fail;
    }

    pub fn fail_set_link(&self, fail: bool) {
        self.state.lock().fail_set_link = fail;
    }
}

impl ConnectionInfoSource for FakeDriver {
    fn connection_info(&self, vdev_id: VdevId) -> Result<ConnectionInfo, Error> {
        self.state
            .lock()
            .conn_info
            .get(&vdev_id)
            .copied()
            .ok_or_else(|| format_err!("no connection info for vdev {}", vdev_id))
    }

    fn nan_connection_info(&self, vdev_id: VdevId) -> Result<ConnectionInfo, Error> {
        self.connection_info(vdev_id)
    }
}

impl Regulatory for FakeDriver {
    fn freq_bounds(&self) -> RegFreqBounds {
        RegFreqBounds::default()
    }

    fn channel_state(&self, freq: Freq, _bw: HwModeBandwidth) -> ChannelState {
        if self.state.lock().dfs.contains(&freq) {
            ChannelState::Dfs
        } else {
            ChannelState::Enable
        }
    }

    fn is_indoor(&self, freq: Freq) -> bool {
        self.state.lock().indoor.contains(&freq)
    }

    fn modify_indoor_concurrency(
        &self,
        vdev_id: Option<VdevId>,
        freq: Freq,
        bw: Option<HwModeBandwidth>,
        add: bool,
    ) {
        self.record(Event::IndoorConcurrency(vdev_id, freq, bw, add));
    }

    fn recompute_current_chan_list(&self) {
        self.record(Event::RecomputeChanList);
    }

    fn set_dfs_master_enabled(&self, enabled: bool) {
        self.record(Event::DfsMaster(enabled));
    }
}

impl WmiServices for FakeDriver {
    fn is_enabled(&self, service: WmiService) -> bool {
        self.state.lock().services.contains(&service)
    }
}

impl Sme for FakeDriver {
    fn nss_for_vdev(&self, _mode: PolicyMode) -> Result<(u8, u8), Error> {
        Ok(self.state.lock().nss)
    }

    fn rso_stop(&self, vdev_id: VdevId) {
        self.record(Event::RsoStop(vdev_id));
    }

    fn rso_start(&self, vdev_id: VdevId) {
        self.record(Event::RsoStart(vdev_id));
    }

    fn set_pcl_for_existing_combo(&self, mode: PolicyMode, vdev_id: VdevId) {
        self.record(Event::SetPcl(mode, vdev_id));
    }

    fn get_pcl(&self, mode: PolicyMode) -> Result<Vec<Freq>, Error> {
        let mut state = self.state.lock();
        state.pcl_requests += 1;
        if state.fail_pcl {
            return Err(format_err!("no pcl for {:?}", mode));
        }
        Ok(vec![])
    }

    fn roam_invoke(&self, vdev_id: VdevId) -> Result<(), Error> {
        self.record(Event::RoamInvoke(vdev_id));
        Ok(())
    }
}

impl MloSerializer for FakeDriver {
    fn set_link_req(&self, req: &SetLinkRequest) -> Result<(), Error> {
        if self.state.lock().fail_set_link {
            return Err(format_err!("serializer refused set link"));
        }
        self.record(Event::SetLink(*req));
        Ok(())
    }
}

impl VdevManager for FakeDriver {
    fn opmode(&self, vdev_id: VdevId) -> Option<OpMode> {
        self.vdev(vdev_id, |v| v.opmode).flatten()
    }

    fn operating_freq(&self, vdev_id: VdevId) -> Freq {
        self.vdev(vdev_id, |v| v.freq).unwrap_or(0)
    }

    fn bss_freq(&self, vdev_id: VdevId) -> Freq {
        self.vdev(vdev_id, |v| v.bss_freq).unwrap_or(0)
    }

    fn is_mlo(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.mlo).unwrap_or(false)
    }

    fn is_mlo_link(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.mlo_link).unwrap_or(false)
    }

    fn is_mlo_ap(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.mlo_ap).unwrap_or(false)
    }

    fn is_connected(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.connected).unwrap_or(false)
    }

    fn is_active(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.active).unwrap_or(false)
    }

    fn assoc_vdev(&self, vdev_id: VdevId) -> Option<VdevId> {
        self.vdev(vdev_id, |v| v.assoc_vdev).flatten()
    }

    fn is_link_removed(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.link_removed).unwrap_or(false)
    }

    fn set_link_removed(&self, vdev_id: VdevId, removed: bool) {
        if let Some(vdev) = self.state.lock().vdevs.get_mut(&vdev_id) {
            vdev.link_removed = removed;
        }
    }

    fn is_emlsr_capable(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.emlsr).unwrap_or(false)
    }

    fn is_sap_acs_24ghz_only(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.acs_24ghz_only).unwrap_or(false)
    }

    fn ap_policy(&self, vdev_id: VdevId) -> ApPolicy {
        self.vdev(vdev_id, |v| v.ap_policy).unwrap_or(ApPolicy::Unspecified)
    }

    fn is_high_tput_or_low_latency(&self, vdev_id: VdevId) -> bool {
        self.vdev(vdev_id, |v| v.ht_ll).unwrap_or(false)
    }

    fn mlo_partners(&self, vdev_id: VdevId) -> Vec<MloPartner> {
        self.vdev(vdev_id, |v| v.partners.clone()).unwrap_or_default()
    }

    fn is_wapi_sta_active(&self) -> bool {
        self.state.lock().wapi_sta_active
    }

    fn is_sta_inactivity_allowed_with_quiet(
        &self,
        _ml_vdevs: &[VdevId],
        _affected: &[VdevId],
    ) -> bool {
        self.state.lock().quiet_allowed
    }
}

impl DatapathCallbacks for FakeDriver {
    fn disable_rx_ol_in_concurrency(&self, disable: bool) {
        self.record(Event::RxOffload(disable));
    }

    fn set_rx_mode_rps(&self, enable: bool) {
        self.record(Event::Rps(enable));
    }

    fn ipa_set_mcc_mode(&self, mcc: bool) {
        self.record(Event::IpaMcc(mcc));
    }

    fn flow_pool_map(&self, vdev_id: VdevId) {
        self.record(Event::FlowPoolMap(vdev_id));
    }

    fn flow_pool_unmap(&self, vdev_id: VdevId) {
        self.record(Event::FlowPoolUnmap(vdev_id));
    }

    fn tdls_increment_session(&self) {
        self.record(Event::TdlsIncrement);
    }

    fn tdls_decrement_session(&self) {
        self.record(Event::TdlsDecrement);
    }

    fn indicate_active_ndp_cnt(&self, vdev_id: VdevId, count: u32) {
        self.record(Event::NdpCount(vdev_id, count));
    }

    fn connection_info_update(&self) {
        self.record(Event::ConnectionInfoUpdate);
    }
}

pub fn policy_manager(caps: &[MacPhyCaps], num_modes: usize) -> (PolicyManager, Arc<FakeDriver>) {
    policy_manager_with_config(caps, num_modes, PolicyConfig::default())
}

/// A policy manager over `caps` with the single-MAC mode current and no events pending.
pub fn policy_manager_with_config(
    caps: &[MacPhyCaps],
    num_modes: usize,
    config: PolicyConfig,
) -> (PolicyManager, Arc<FakeDriver>) {
    let driver = Arc::new(FakeDriver::default());
    driver.enable_service(WmiService::DualBandSimultaneous);
    let pm = PolicyManager::new(config, driver.collaborators());
    pm.init_dbs_config(0, FW_DBS_SBS);
    pm.update_hw_mode_list(caps, num_modes).expect("build hw mode list");
    pm.set_current_hw_mode(0).expect("set single mac mode");
    driver.drain_events();
    (pm, driver)
}

impl PolicyManager {
    /// Inserts rows and their session counts without notifying anyone.
    pub fn seed(&self, entries: &[ConnectionEntry]) {
        let mut state = self.state.lock();
        for entry in entries {
            state.incr_connection_count(*entry).expect("seed connection row");
            state.incr_active_session_count(entry.mode);
        }
    }
}
