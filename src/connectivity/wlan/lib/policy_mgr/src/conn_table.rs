// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The connection table, the disabled ML link table and the session bookkeeping that the policy
//! manager keeps behind its connection mutex.
//!
//! Every method here works on an already locked [`ConnectionState`]. None of them calls out to a
//! collaborator, so they are safe to use from any code path holding the guard.

use {
    crate::{
        alert::report_alert,
        catalog::HwCatalog,
        channel::{ChanFlagExt, Freq, HwModeBandwidth, MAX_24GHZ_FREQ},
        config::{AlertAction, MAX_NUMBER_OF_CONC_CONNECTIONS, MAX_NUMBER_OF_DISABLE_LINK},
        error::PolicyError,
        mlo_link::SetLinkState,
    },
    log::{debug, error, info},
    std::collections::HashMap,
};

pub type VdevId = u8;

/// Persona of a row in the connection table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyMode {
    Sta,
    Sap,
    P2pClient,
    P2pGo,
    Ndi,
    NanDisc,
}

impl PolicyMode {
    pub const ALL: [PolicyMode; 6] = [
        PolicyMode::Sta,
        PolicyMode::Sap,
        PolicyMode::P2pClient,
        PolicyMode::P2pGo,
        PolicyMode::Ndi,
        PolicyMode::NanDisc,
    ];

    fn slot(self) -> usize {
        match self {
            PolicyMode::Sta => 0,
            PolicyMode::Sap => 1,
            PolicyMode::P2pClient => 2,
            PolicyMode::P2pGo => 3,
            PolicyMode::Ndi => 4,
            PolicyMode::NanDisc => 5,
        }
    }

    /// SAP and P2P GO, the personas that beacon.
    pub fn is_beaconing(self) -> bool {
        self == PolicyMode::Sap || self == PolicyMode::P2pGo
    }

    /// STA and P2P client, the personas that associate to someone else.
    pub fn is_sta_like(self) -> bool {
        self == PolicyMode::Sta || self == PolicyMode::P2pClient
    }
}

/// Operating mode of a vdev, numbered the way the concurrency-mode mask encodes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpMode {
    Sta = 0,
    Sap = 1,
    P2pClient = 2,
    P2pGo = 3,
    Ftm = 4,
    Ibss = 5,
    Monitor = 6,
    P2pDevice = 7,
    Ocb = 8,
    Ndi = 11,
    NanDisc = 16,
}

impl OpMode {
    /// The connection table persona for this mode, if it has one.
    pub fn policy_mode(self) -> Option<PolicyMode> {
        match self {
            OpMode::Sta => Some(PolicyMode::Sta),
            OpMode::Sap => Some(PolicyMode::Sap),
            OpMode::P2pClient => Some(PolicyMode::P2pClient),
            OpMode::P2pGo => Some(PolicyMode::P2pGo),
            OpMode::Ndi => Some(PolicyMode::Ndi),
            OpMode::NanDisc => Some(PolicyMode::NanDisc),
            _ => None,
        }
    }

    fn in_concurrency_mask(self) -> bool {
        matches!(self, OpMode::Sta | OpMode::P2pClient | OpMode::P2pGo | OpMode::Sap | OpMode::Monitor)
    }
}

impl From<PolicyMode> for OpMode {
    fn from(mode: PolicyMode) -> Self {
        match mode {
            PolicyMode::Sta => OpMode::Sta,
            PolicyMode::Sap => OpMode::Sap,
            PolicyMode::P2pClient => OpMode::P2pClient,
            PolicyMode::P2pGo => OpMode::P2pGo,
            PolicyMode::Ndi => OpMode::Ndi,
            PolicyMode::NanDisc => OpMode::NanDisc,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainMask {
    OneOne,
    TwoTwo,
}

impl Default for ChainMask {
    fn default() -> Self {
        ChainMask::OneOne
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub vdev_id: VdevId,
    pub mode: PolicyMode,
    pub mac_id: u8,
    pub freq: Freq,
    pub bw: HwModeBandwidth,
    pub chain_mask: ChainMask,
    pub original_nss: u8,
    pub ch_flagext: ChanFlagExt,
}

/// An ML STA link that exists but is force-inactive in firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisabledLink {
    pub vdev_id: VdevId,
    pub mode: PolicyMode,
    pub freq: Freq,
}

/// Rows pulled out of the table by a store-and-delete helper, with their original positions.
#[derive(Debug, Default)]
pub struct StoredConnections {
    entries: Vec<(usize, ConnectionEntry)>,
}

impl StoredConnections {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything guarded by the connection mutex.
#[derive(Debug)]
pub struct ConnectionState {
    conns: Vec<ConnectionEntry>,
    disabled: [Option<DisabledLink>; MAX_NUMBER_OF_DISABLE_LINK],
    active_sessions: [u32; 6],
    concurrency_mode: u32,
    open_sessions: HashMap<OpMode, u32>,
    max_conc_cxns: usize,
    alert_action: AlertAction,
    pub(crate) set_link: SetLinkState,
    /// Frequency of a STA that left while a SAP/GO shared its channel, cleared once the SAP moves.
    pub(crate) last_disconn_sta_freq: Freq,
    pub(crate) dynamic_dfs_master_disabled: bool,
}

impl ConnectionState {
    pub fn new(max_conc_cxns: usize, alert_action: AlertAction) -> Self {
        Self {
            conns: Vec::with_capacity(MAX_NUMBER_OF_CONC_CONNECTIONS),
            disabled: [None; MAX_NUMBER_OF_DISABLE_LINK],
            active_sessions: [0; 6],
            concurrency_mode: 0,
            open_sessions: HashMap::new(),
            max_conc_cxns: max_conc_cxns.min(MAX_NUMBER_OF_CONC_CONNECTIONS),
            alert_action,
            set_link: SetLinkState::Idle,
            last_disconn_sta_freq: 0,
            dynamic_dfs_master_disabled: false,
        }
    }

    pub fn alert_action(&self) -> AlertAction {
        self.alert_action
    }

    pub fn max_conc_cxns(&self) -> usize {
        self.max_conc_cxns
    }

    pub fn connections(&self) -> &[ConnectionEntry] {
        &self.conns
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn connection(&self, vdev_id: VdevId) -> Option<&ConnectionEntry> {
        self.conns.iter().find(|c| c.vdev_id == vdev_id)
    }

    pub fn mode_specific_connections(
        &self,
        mode: PolicyMode,
    ) -> impl Iterator<Item = &ConnectionEntry> + '_ {
        self.conns.iter().filter(move |c| c.mode == mode)
    }

    pub fn mode_specific_connection_count(&self, mode: PolicyMode) -> usize {
        self.mode_specific_connections(mode).count()
    }

    /// Frequency and vdev of every row in `mode`, in table order.
    pub fn get_mode_specific_conn_info(&self, mode: PolicyMode) -> Vec<(Freq, VdevId)> {
        self.mode_specific_connections(mode).map(|c| (c.freq, c.vdev_id)).collect()
    }

    pub fn connection_count_with_freq(&self, freq: Freq) -> usize {
        self.conns.iter().filter(|c| c.freq == freq).count()
    }

    pub fn check_conn_with_mode_and_vdev_id(
        &self,
        mode: PolicyMode,
        vdev_id: VdevId,
    ) -> Result<(), PolicyError> {
        if self.conns.iter().any(|c| c.mode == mode && c.vdev_id == vdev_id) {
            Ok(())
        } else {
            Err(PolicyError::NotFound(vdev_id))
        }
    }

    pub fn chan_by_vdev_id(&self, vdev_id: VdevId) -> Option<Freq> {
        self.connection(vdev_id).map(|c| c.freq)
    }

    pub fn bw_by_vdev_id(&self, vdev_id: VdevId) -> Option<HwModeBandwidth> {
        self.connection(vdev_id).map(|c| c.bw)
    }

    /// Appends a row. Fails once the configured connection limit is exceeded or the table is full.
    pub fn incr_connection_count(&mut self, entry: ConnectionEntry) -> Result<(), PolicyError> {
        let index = self.conns.len();
        if index > self.max_conc_cxns {
            error!("exceeded max connection limit {}", self.max_conc_cxns);
            return Err(PolicyError::Failure("max connection limit exceeded"));
        }
        if index >= MAX_NUMBER_OF_CONC_CONNECTIONS {
            error!("connection table full, can't add vdev {}", entry.vdev_id);
            return Err(PolicyError::Resources("connection table"));
        }
        debug!("Add at idx:{} vdev {} mac={} freq {}", index, entry.vdev_id, entry.mac_id, entry.freq);
        self.conns.push(entry);
        Ok(())
    }

    /// Removes the row of `vdev_id`, keeping the table compacted.
    pub fn decr_connection_count(&mut self, vdev_id: VdevId) -> Result<(), PolicyError> {
        let index = match self.conns.iter().position(|c| c.vdev_id == vdev_id) {
            Some(index) => index,
            None => {
                error!("can't find vdev_id {} in connection table", vdev_id);
                return Err(PolicyError::Failure("vdev not in connection table"));
            }
        };
        self.conns.remove(index);
        if self.conns.iter().any(|c| c.vdev_id == vdev_id) {
            report_alert(self.alert_action, "duplicate connection entry after removal");
        }
        Ok(())
    }

    /// Checks for duplicate vdevs and for session counters that disagree with the table. Returns
    /// true when the table is in an abnormal state.
    pub fn validate_conn_info(&self) -> bool {
        let mut panic = false;
        for (i, conn) in self.conns.iter().enumerate() {
            if self.conns[i + 1..].iter().any(|other| other.vdev_id == conn.vdev_id) {
                debug!("dup entry {}", conn.vdev_id);
                panic = true;
            }
        }
        if panic {
            error!("dup entry");
        }
        let sessions: u32 = self.active_sessions.iter().sum();
        if sessions as usize != self.conns.len() {
            error!("active session/conn count mismatch {} {}", sessions, self.conns.len());
            panic = true;
        }
        if panic {
            report_alert(self.alert_action, "connection table inconsistent");
        }
        panic
    }

    /// Updates the frequency and width of an existing row, e.g. after a channel switch.
    pub fn update_conn_freq(&mut self, vdev_id: VdevId, freq: Freq, bw: HwModeBandwidth) -> bool {
        match self.conns.iter_mut().find(|c| c.vdev_id == vdev_id) {
            Some(conn) => {
                conn.freq = freq;
                conn.bw = bw;
                true
            }
            None => false,
        }
    }

    fn store_and_del_where<F>(&mut self, pred: F) -> StoredConnections
    where
        F: Fn(&ConnectionEntry) -> bool,
    {
        let mut stored = StoredConnections::default();
        for (index, conn) in std::mem::take(&mut self.conns).into_iter().enumerate() {
            if pred(&conn) {
                stored.entries.push((index, conn));
            } else {
                self.conns.push(conn);
            }
        }
        stored
    }

    /// Temporarily removes the row of `vdev_id`. Pair with [`Self::restore_deleted_conn_info`].
    pub fn store_and_del_conn_info_by_vdev_id(&mut self, vdev_id: VdevId) -> StoredConnections {
        let stored = self.store_and_del_where(|c| c.vdev_id == vdev_id);
        if stored.is_empty() {
            debug!("vdev {} not found in connection table", vdev_id);
        }
        stored
    }

    /// Temporarily removes every row of `mode` on `freq`.
    pub fn store_and_del_conn_info_by_chan_and_mode(
        &mut self,
        freq: Freq,
        mode: PolicyMode,
    ) -> StoredConnections {
        self.store_and_del_where(|c| c.freq == freq && c.mode == mode)
    }

    /// Puts stored rows back at their original positions.
    pub fn restore_deleted_conn_info(&mut self, stored: StoredConnections) {
        for (index, conn) in stored.entries {
            let index = index.min(self.conns.len());
            self.conns.insert(index, conn);
        }
    }

    pub fn active_session_count(&self, mode: PolicyMode) -> u32 {
        self.active_sessions[mode.slot()]
    }

    pub fn incr_active_session_count(&mut self, mode: PolicyMode) -> u32 {
        let count = &mut self.active_sessions[mode.slot()];
        *count += 1;
        *count
    }

    pub fn decr_active_session_count(&mut self, mode: PolicyMode) -> u32 {
        let count = &mut self.active_sessions[mode.slot()];
        if *count > 0 {
            *count -= 1;
        }
        *count
    }

    /// Adding one more session would exceed the configured limit.
    pub fn max_concurrent_connections_reached(&self) -> bool {
        let sessions: u32 = self.active_sessions.iter().sum();
        let reached = sessions as usize > self.max_conc_cxns.saturating_sub(1);
        if reached {
            debug!("Reached max concurrent connections: {}", self.max_conc_cxns);
        }
        reached
    }

    pub fn set_concurrency_mode(&mut self, mode: OpMode) {
        if mode.in_concurrency_mask() {
            self.concurrency_mode |= 1 << mode as u32;
            *self.open_sessions.entry(mode).or_insert(0) += 1;
        }
        debug!(
            "concurrency_mode = {:#x} Number of open sessions for mode {:?} = {}",
            self.concurrency_mode,
            mode,
            self.open_sessions(mode)
        );
    }

    pub fn clear_concurrency_mode(&mut self, mode: OpMode) {
        if mode.in_concurrency_mask() {
            let sessions = self.open_sessions.entry(mode).or_insert(0);
            *sessions = sessions.saturating_sub(1);
            if *sessions == 0 {
                self.concurrency_mode &= !(1 << mode as u32);
            }
        }
        debug!(
            "concurrency_mode = {:#x} Number of open sessions for mode {:?} = {}",
            self.concurrency_mode,
            mode,
            self.open_sessions(mode)
        );
    }

    pub fn concurrency_mode(&self) -> u32 {
        self.concurrency_mode
    }

    pub fn open_sessions(&self, mode: OpMode) -> u32 {
        self.open_sessions.get(&mode).copied().unwrap_or(0)
    }

    /// Disabled links in slot order.
    pub fn disabled_links(&self) -> impl Iterator<Item = &DisabledLink> + '_ {
        self.disabled.iter().flatten()
    }

    pub fn get_disabled_ml_links_count(&self) -> usize {
        self.disabled_links().count()
    }

    /// Records `vdev_id` as force-inactive. An existing entry only has its frequency refreshed and
    /// yields `Exists`.
    pub fn add_to_disabled_links(
        &mut self,
        freq: Freq,
        mode: PolicyMode,
        vdev_id: VdevId,
    ) -> Result<(), PolicyError> {
        if let Some(link) = self.disabled.iter_mut().flatten().find(|l| l.vdev_id == vdev_id) {
            link.freq = freq;
            debug!(
                "Disabled link already present vdev {}, mode {:?}, update freq {}",
                vdev_id, mode, freq
            );
            return Err(PolicyError::Exists);
        }
        match self.disabled.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(DisabledLink { vdev_id, mode, freq });
                debug!("Disabled link added vdev id: {} freq: {} mode {:?}", vdev_id, freq, mode);
                Ok(())
            }
            None => {
                error!("No empty entry found to disable link for vdev {}", vdev_id);
                Err(PolicyError::Resources("disabled link table"))
            }
        }
    }

    pub fn delete_from_disabled_links(&mut self, vdev_id: VdevId) -> Result<(), PolicyError> {
        match self.disabled.iter_mut().find(|slot| matches!(slot, Some(l) if l.vdev_id == vdev_id)) {
            Some(slot) => {
                *slot = None;
                debug!("Disabled link removed for vdev {}", vdev_id);
                Ok(())
            }
            None => Err(PolicyError::Exists),
        }
    }

    pub fn is_sap_p2pgo_on_dfs(&self) -> bool {
        self.conns.iter().any(|c| c.mode.is_beaconing() && c.ch_flagext.any_dfs())
    }

    /// A STA or P2P client operates on `sap_freq`.
    pub fn is_sta_sap_scc(&self, sap_freq: Freq) -> bool {
        self.conns.iter().any(|c| c.mode.is_sta_like() && c.freq == sap_freq)
    }

    /// A SAP or GO shares `freq` with a STA or P2P client in `mode`.
    pub fn is_conc_sap_present_on_sta_freq(&self, mode: PolicyMode, freq: Freq) -> bool {
        if !mode.is_sta_like() {
            return false;
        }
        self.conns.iter().any(|c| c.freq == freq && c.mode.is_beaconing())
    }

    /// Another connection shares the channel of `vdev_id`.
    pub fn is_scc_with_this_vdev_id(&self, vdev_id: VdevId) -> bool {
        let freq = match self.chan_by_vdev_id(vdev_id) {
            Some(freq) => freq,
            None => {
                error!("Failed to get channel for vdev:{}", vdev_id);
                return false;
            }
        };
        self.conns.iter().any(|c| c.vdev_id != vdev_id && c.freq == freq)
    }

    /// First other connection on the same MAC id as `vdev_id`.
    pub fn get_conc_vdev_on_same_mac(&self, vdev_id: VdevId, mac_id: u8) -> Option<VdevId> {
        self.conns.iter().find(|c| c.vdev_id != vdev_id && c.mac_id == mac_id).map(|c| c.vdev_id)
    }

    pub fn current_concurrency_is_scc(&self, catalog: &HwCatalog) -> bool {
        let c = &self.conns;
        match c.len() {
            1 => false,
            2 => c[0].freq == c[1].freq && catalog.are_2_freq_on_same_mac(c[0].freq, c[1].freq),
            3 => {
                let any_pair = c[0].freq == c[1].freq
                    || c[0].freq == c[2].freq
                    || c[1].freq == c[2].freq;
                if (catalog.is_current_hwmode_dbs() || catalog.is_current_hwmode_sbs()) && any_pair
                {
                    true
                } else {
                    c[0].freq == c[1].freq && c[0].freq == c[2].freq
                }
            }
            n => {
                debug!("unexpected num_connections value {}", n);
                false
            }
        }
    }

    pub fn current_concurrency_is_mcc(&self, catalog: &HwCatalog) -> bool {
        let c = &self.conns;
        let mcc_pair = |a: &ConnectionEntry, b: &ConnectionEntry| {
            a.freq != b.freq && catalog.are_2_freq_on_same_mac(a.freq, b.freq)
        };
        match c.len() {
            1 => false,
            2 => mcc_pair(&c[0], &c[1]),
            3 => mcc_pair(&c[0], &c[1]) || mcc_pair(&c[0], &c[2]) || mcc_pair(&c[1], &c[2]),
            n => {
                debug!("unexpected num_connections value {}", n);
                false
            }
        }
    }

    /// Connections time-share a MAC across different 2.4 GHz channels.
    pub fn is_mcc_in_24g(&self, catalog: &HwCatalog) -> bool {
        let c = &self.conns;
        match c.len() {
            1 => false,
            2 => {
                c[0].freq != c[1].freq
                    && catalog.are_2_freq_on_same_mac(c[0].freq, c[1].freq)
                    && c[0].freq <= MAX_24GHZ_FREQ
                    && c[1].freq <= MAX_24GHZ_FREQ
            }
            3 => {
                (c[0].freq != c[1].freq || c[0].freq != c[2].freq || c[1].freq != c[2].freq)
                    && c.iter().all(|conn| conn.freq <= MAX_24GHZ_FREQ)
            }
            n => {
                error!("unexpected num_connections value {}", n);
                false
            }
        }
    }

    /// Starting on `freq` would put a connection on a MAC already used by an existing one.
    pub fn will_freq_lead_to_mcc(&self, catalog: &HwCatalog, freq: Freq) -> bool {
        self.conns.iter().any(|c| catalog.two_freq_always_on_same_mac(freq, c.freq))
    }

    /// First STA/CLI/SAP/GO, other than `vdev_id`, that would share a MAC with `freq` on a
    /// different channel.
    pub fn fetch_existing_con_info(
        &self,
        catalog: &HwCatalog,
        vdev_id: VdevId,
        freq: Freq,
    ) -> Option<ConnectionEntry> {
        let existing = self.conns.iter().find(|c| {
            matches!(c.mode, PolicyMode::P2pGo | PolicyMode::Sap | PolicyMode::P2pClient | PolicyMode::Sta)
                && catalog.are_2_freq_on_same_mac(freq, c.freq)
                && freq != c.freq
                && vdev_id != c.vdev_id
        });
        if let Some(c) = existing {
            debug!("Existing vdev_id for mode {:?} is {}", c.mode, c.vdev_id);
        }
        existing.copied()
    }

    /// Remembers a STA frequency shared with a SAP/GO before the STA leaves, so the SAP can later
    /// be moved off a channel it only used because of the STA.
    pub fn update_sta_scc_info_for_later_check(&mut self, mode: PolicyMode, vdev_id: VdevId) {
        if !mode.is_sta_like() {
            return;
        }
        let sta_freq = match self.chan_by_vdev_id(vdev_id) {
            Some(freq) if freq != 0 => freq,
            _ => return,
        };
        if self.conns.iter().any(|c| c.freq == sta_freq && c.mode.is_beaconing()) {
            info!("STA vdev {} leaves SCC with SAP/GO on {}", vdev_id, sta_freq);
            self.last_disconn_sta_freq = sta_freq;
        }
    }

    pub fn last_disconn_sta_freq(&self) -> Freq {
        self.last_disconn_sta_freq
    }

    pub fn clear_last_disconn_sta_freq(&mut self) {
        self.last_disconn_sta_freq = 0;
    }

    /// STA-like connections other than `vdev_id`, split into (on 5 GHz, elsewhere).
    pub(crate) fn sta_bands_except(&self, vdev_id: VdevId) -> (bool, bool) {
        let mut on_5g = false;
        let mut on_2g = false;
        for conn in self.conns.iter().filter(|c| c.vdev_id != vdev_id && c.mode.is_sta_like()) {
            if crate::channel::is_5ghz(conn.freq) {
                on_5g = true;
            } else {
                on_2g = true;
            }
        }
        (on_5g, on_2g)
    }
}
