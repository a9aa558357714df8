// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interfaces to the parts of the driver the policy manager consults or notifies.
//!
//! Implementations must not call back into the [`crate::PolicyManager`] that owns them from
//! inside these methods: some are invoked while the connection mutex is held.

use {
    crate::{
        channel::{ChanFlagExt, ChannelState, Freq, HwModeBandwidth},
        conn_table::{OpMode, PolicyMode, VdevId},
        freq_range::RegFreqBounds,
        mlo_link::SetLinkRequest,
    },
    anyhow::Error,
    std::sync::Arc,
};

pub type MacAddr = [u8; 6];

/// What the vdev layer reports about a vdev that just came up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub mode: PolicyMode,
    pub freq: Freq,
    pub mac_id: u8,
    pub bw: HwModeBandwidth,
    pub ch_flagext: ChanFlagExt,
}

/// Concurrent AP profile configured on a SAP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApPolicy {
    Unspecified,
    GamingAudio,
    LosslessAudioStreaming,
    Xr,
}

impl ApPolicy {
    /// Profiles that need their MAC to themselves.
    pub fn is_low_latency(self) -> bool {
        matches!(self, ApPolicy::GamingAudio | ApPolicy::LosslessAudioStreaming | ApPolicy::Xr)
    }
}

/// A link of an ML STA as tracked by the MLO manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MloPartner {
    pub vdev_id: VdevId,
    pub link_addr: MacAddr,
}

/// Firmware service bits the policy manager consults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WmiService {
    DualBandSimultaneous,
    StaPlusSta,
    P2pP2pConcurrency,
    WapiConcurrency,
    DualBeaconOnSingleMacScc,
    DualBeaconOnSingleMacMcc,
    NoInterbandMcc,
    HwModePolicyOffload,
}

pub trait ConnectionInfoSource: Send + Sync {
    fn connection_info(&self, vdev_id: VdevId) -> Result<ConnectionInfo, Error>;
    fn nan_connection_info(&self, vdev_id: VdevId) -> Result<ConnectionInfo, Error>;
}

pub trait Regulatory: Send + Sync {
    fn freq_bounds(&self) -> RegFreqBounds;
    fn channel_state(&self, freq: Freq, bw: HwModeBandwidth) -> ChannelState;
    fn is_indoor(&self, freq: Freq) -> bool;
    /// Adds or removes an indoor channel made usable by a STA connection. `vdev_id` is `None`
    /// when the entry is removed by frequency alone; `bw` is `None` for removals.
    fn modify_indoor_concurrency(
        &self,
        vdev_id: Option<VdevId>,
        freq: Freq,
        bw: Option<HwModeBandwidth>,
        add: bool,
    );
    /// Triggered, not awaited.
    fn recompute_current_chan_list(&self);
    fn set_dfs_master_enabled(&self, enabled: bool);
}

pub trait WmiServices: Send + Sync {
    fn is_enabled(&self, service: WmiService) -> bool;
}

pub trait Sme: Send + Sync {
    /// Configured (2.4 GHz, 5 GHz) spatial streams for `mode`.
    fn nss_for_vdev(&self, mode: PolicyMode) -> Result<(u8, u8), Error>;
    fn rso_stop(&self, vdev_id: VdevId);
    fn rso_start(&self, vdev_id: VdevId);
    fn set_pcl_for_existing_combo(&self, mode: PolicyMode, vdev_id: VdevId);
    /// Preferred channel list for a new connection in `mode`. May be called with the connection
    /// state locked, so it must not call back into the policy manager.
    fn get_pcl(&self, mode: PolicyMode) -> Result<Vec<Freq>, Error>;
    fn roam_invoke(&self, vdev_id: VdevId) -> Result<(), Error>;
}

/// Queue for link force commands. The response comes back through
/// [`crate::PolicyManager::handle_set_link_response`].
pub trait MloSerializer: Send + Sync {
    fn set_link_req(&self, req: &SetLinkRequest) -> Result<(), Error>;
}

pub trait VdevManager: Send + Sync {
    fn opmode(&self, vdev_id: VdevId) -> Option<OpMode>;
    fn operating_freq(&self, vdev_id: VdevId) -> Freq;
    fn bss_freq(&self, vdev_id: VdevId) -> Freq;
    /// Part of an ML association.
    fn is_mlo(&self, vdev_id: VdevId) -> bool;
    /// A partner link of an ML association rather than its assoc link.
    fn is_mlo_link(&self, vdev_id: VdevId) -> bool;
    fn is_mlo_ap(&self, vdev_id: VdevId) -> bool;
    fn is_connected(&self, vdev_id: VdevId) -> bool;
    fn is_active(&self, vdev_id: VdevId) -> bool;
    /// The assoc link vdev of the ML association `vdev_id` belongs to.
    fn assoc_vdev(&self, vdev_id: VdevId) -> Option<VdevId>;
    fn is_link_removed(&self, vdev_id: VdevId) -> bool;
    fn set_link_removed(&self, vdev_id: VdevId, removed: bool);
    fn is_emlsr_capable(&self, vdev_id: VdevId) -> bool;
    /// The SAP's ACS channel list only covers 11b/11g.
    fn is_sap_acs_24ghz_only(&self, vdev_id: VdevId) -> bool;
    fn ap_policy(&self, vdev_id: VdevId) -> ApPolicy;
    fn is_high_tput_or_low_latency(&self, vdev_id: VdevId) -> bool;
    fn mlo_partners(&self, vdev_id: VdevId) -> Vec<MloPartner>;
    fn is_wapi_sta_active(&self) -> bool;
    /// Whether the AP's quiet schedule still lets `affected` go inactive among `ml_vdevs`.
    fn is_sta_inactivity_allowed_with_quiet(
        &self,
        ml_vdevs: &[VdevId],
        affected: &[VdevId],
    ) -> bool;
}

pub trait DatapathCallbacks: Send + Sync {
    fn disable_rx_ol_in_concurrency(&self, disable: bool);
    fn set_rx_mode_rps(&self, enable: bool);
    fn ipa_set_mcc_mode(&self, mcc: bool);
    fn flow_pool_map(&self, vdev_id: VdevId);
    fn flow_pool_unmap(&self, vdev_id: VdevId);
    fn tdls_increment_session(&self);
    fn tdls_decrement_session(&self);
    fn indicate_active_ndp_cnt(&self, vdev_id: VdevId, count: u32);
    fn connection_info_update(&self);
}

/// Every collaborator of one policy manager instance.
#[derive(Clone)]
pub struct Collaborators {
    pub conn_info: Arc<dyn ConnectionInfoSource>,
    pub regulatory: Arc<dyn Regulatory>,
    pub wmi: Arc<dyn WmiServices>,
    pub sme: Arc<dyn Sme>,
    pub mlo: Arc<dyn MloSerializer>,
    pub vdevs: Arc<dyn VdevManager>,
    pub datapath: Arc<dyn DatapathCallbacks>,
}

impl Collaborators {
    pub fn is_p2p_p2p_conc_supported(&self) -> bool {
        self.wmi.is_enabled(WmiService::P2pP2pConcurrency)
    }

    /// Two beaconing vdevs may share one channel on one MAC.
    pub fn dual_beacon_on_single_mac_scc_capable(&self) -> bool {
        self.wmi.is_enabled(WmiService::DualBeaconOnSingleMacScc)
    }

    /// Two beaconing vdevs may time-share one MAC on different channels.
    pub fn dual_beacon_on_single_mac_mcc_capable(&self) -> bool {
        self.wmi.is_enabled(WmiService::DualBeaconOnSingleMacMcc)
    }

    pub fn is_interband_mcc_supported(&self) -> bool {
        !self.wmi.is_enabled(WmiService::NoInterbandMcc)
    }

    pub fn allow_multiple_sta_connections(&self) -> bool {
        self.wmi.is_enabled(WmiService::StaPlusSta)
    }
}
