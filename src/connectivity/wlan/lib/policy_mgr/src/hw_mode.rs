// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware mode descriptors and the dual-MAC configuration words exchanged with firmware.
//!
//! Firmware describes each supported hardware mode as a packed 64-bit word. The word is decoded
//! once, at ingestion, into a [`HwModeDescriptor`]; the rest of the crate only ever deals with the
//! decoded form.

use {
    crate::channel::{Freq, HwModeBandwidth},
    bitfield::bitfield,
    serde::{Deserialize, Serialize},
};

/// Number of physical MACs the policy manager reasons about.
pub const MAX_MAC: usize = 2;
/// Value of the hw-mode index before firmware has reported the first mode switch.
pub const DEFAULT_HW_MODE_INDEX: u32 = 0xFFFF;

pub const WLAN_2G_CAPABILITY: u32 = 0x1;
pub const WLAN_5G_CAPABILITY: u32 = 0x2;

bitfield! {
    /// Hardware mode word as reported in the service-ready extension event.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct HwModeWord(u64);
    impl Debug;
    pub u8, hw_mode_id, set_hw_mode_id: 2, 0;
    pub u8, mac0_band, set_mac0_band: 4, 3;
    pub sbs, set_sbs: 5;
    pub agile_dfs, set_agile_dfs: 6;
    pub dbs, set_dbs: 7;
    pub u8, mac1_bw, set_mac1_bw: 11, 8;
    pub u8, mac0_bw, set_mac0_bw: 15, 12;
    pub u8, mac1_rx_ss, set_mac1_rx_ss: 19, 16;
    pub u8, mac1_tx_ss, set_mac1_tx_ss: 23, 20;
    pub u8, mac0_rx_ss, set_mac0_rx_ss: 27, 24;
    pub u8, mac0_tx_ss, set_mac0_tx_ss: 31, 28;
    pub emlsr, set_emlsr: 32;
}

/// Per-MAC stream, bandwidth and band capability of one hardware mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MacCapability {
    pub tx_streams: u8,
    pub rx_streams: u8,
    pub bw: HwModeBandwidth,
    /// Bitmask of `WLAN_2G_CAPABILITY` / `WLAN_5G_CAPABILITY`.
    pub band_cap: u32,
    pub support_6ghz: bool,
}

impl MacCapability {
    pub fn supports_2g(&self) -> bool {
        self.band_cap & WLAN_2G_CAPABILITY != 0
    }

    pub fn supports_5g(&self) -> bool {
        self.band_cap & WLAN_5G_CAPABILITY != 0
    }
}

/// Decoded hardware mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwModeDescriptor {
    pub mac0: MacCapability,
    pub mac1: MacCapability,
    pub dbs: bool,
    pub sbs: bool,
    pub emlsr: bool,
    pub agile_dfs: bool,
    pub hw_mode_id: u32,
}

impl From<HwModeWord> for HwModeDescriptor {
    fn from(word: HwModeWord) -> Self {
        Self {
            mac0: MacCapability {
                tx_streams: word.mac0_tx_ss(),
                rx_streams: word.mac0_rx_ss(),
                bw: HwModeBandwidth::from_index(word.mac0_bw()),
                band_cap: word.mac0_band() as u32,
                support_6ghz: false,
            },
            mac1: MacCapability {
                tx_streams: word.mac1_tx_ss(),
                rx_streams: word.mac1_rx_ss(),
                bw: HwModeBandwidth::from_index(word.mac1_bw()),
                band_cap: 0,
                support_6ghz: false,
            },
            dbs: word.dbs(),
            sbs: word.sbs(),
            emlsr: word.emlsr(),
            agile_dfs: word.agile_dfs(),
            hw_mode_id: word.hw_mode_id() as u32,
        }
    }
}

impl From<&HwModeDescriptor> for HwModeWord {
    fn from(mode: &HwModeDescriptor) -> Self {
        let mut word = HwModeWord(0);
        word.set_mac0_tx_ss(mode.mac0.tx_streams);
        word.set_mac0_rx_ss(mode.mac0.rx_streams);
        word.set_mac1_tx_ss(mode.mac1.tx_streams);
        word.set_mac1_rx_ss(mode.mac1.rx_streams);
        word.set_mac0_bw(mode.mac0.bw.index());
        word.set_mac1_bw(mode.mac1.bw.index());
        word.set_mac0_band(mode.mac0.band_cap as u8);
        word.set_dbs(mode.dbs);
        word.set_sbs(mode.sbs);
        word.set_emlsr(mode.emlsr);
        word.set_agile_dfs(mode.agile_dfs);
        word.set_hw_mode_id(mode.hw_mode_id as u8);
        word
    }
}

/// How firmware groups the MAC-PHY capability records of one hardware mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwModeConfigType {
    Single,
    Dbs,
    SbsPassive,
    Sbs,
    DbsSbs,
    DbsOrSbs,
    FwInternal,
    Phyb2g,
    Emlsr,
    Dbs2g5g,
}

impl HwModeConfigType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => HwModeConfigType::Single,
            1 => HwModeConfigType::Dbs,
            2 => HwModeConfigType::SbsPassive,
            3 => HwModeConfigType::Sbs,
            4 => HwModeConfigType::DbsSbs,
            5 => HwModeConfigType::DbsOrSbs,
            6 => HwModeConfigType::FwInternal,
            7 => HwModeConfigType::Phyb2g,
            8 => HwModeConfigType::Emlsr,
            9 => HwModeConfigType::Dbs2g5g,
            _ => return None,
        })
    }

    /// Modes that consume a second MAC-PHY capability record for MAC1.
    pub fn is_dual_mac(self) -> bool {
        match self {
            HwModeConfigType::Dbs
            | HwModeConfigType::SbsPassive
            | HwModeConfigType::Sbs
            | HwModeConfigType::DbsOrSbs => true,
            _ => false,
        }
    }
}

/// Regulatory extension of a MAC-PHY capability record. Zero means "not limited".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegCapExt {
    pub low_2ghz_chan: Freq,
    pub high_2ghz_chan: Freq,
    pub low_5ghz_chan: Freq,
    pub high_5ghz_chan: Freq,
}

/// One MAC-PHY capability record of the service-ready extension event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacPhyCaps {
    pub hw_mode_id: u32,
    pub phy_id: u32,
    pub hw_mode_config_type: HwModeConfigType,
    pub supported_bands: u32,
    pub tx_chain_mask_2g: u32,
    pub rx_chain_mask_2g: u32,
    pub tx_chain_mask_5g: u32,
    pub rx_chain_mask_5g: u32,
    /// WMI channel-width values.
    pub max_bw_supported_2g: u32,
    pub max_bw_supported_5g: u32,
    pub reg_cap_ext: RegCapExt,
}

/// Dual-MAC feature selection from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DualMacFeature {
    EnableDbsCxnAndScan,
    DisableDbsCxnAndScan,
    DisableDbsCxnAndEnableDbsScan,
    DisableDbsCxnAndEnableDbsScanWithAsyncScanOff,
    EnableDbsCxnAndEnableScanWithAsyncScanOff,
    EnableDbsCxnAndDisableDbsScan,
}

impl Default for DualMacFeature {
    fn default() -> Self {
        DualMacFeature::EnableDbsCxnAndScan
    }
}

bitfield! {
    /// Firmware-mode half of the dual-MAC configuration.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct DualMacFwModeConfig(u32);
    impl Debug;
    pub async_sbs, set_async_sbs: 26;
    pub dbs_for_cxn, set_dbs_for_cxn: 29;
    pub agile_dfs, set_agile_dfs: 30;
    pub dbs, set_dbs: 31;
}

bitfield! {
    /// Scan half of the dual-MAC configuration.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct DualMacScanConfig(u32);
    impl Debug;
    pub sync_dbs_scan, set_sync_dbs_scan: 27;
    pub async_dbs_scan, set_async_dbs_scan: 28;
    pub agile_dfs_scan, set_agile_dfs_scan: 29;
    pub agile_scan, set_agile_scan: 30;
    pub dbs_scan, set_dbs_scan: 31;
}

/// Current and previous dual-MAC configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DualMacConfig {
    pub cur_scan_config: DualMacScanConfig,
    pub prev_scan_config: DualMacScanConfig,
    pub cur_fw_mode_config: DualMacFwModeConfig,
    pub prev_fw_mode_config: DualMacFwModeConfig,
}

impl DualMacConfig {
    /// Seeds the configuration from the firmware defaults. Nothing is copied when the feature
    /// disables both DBS connections and DBS scans.
    pub fn init_dbs_config(&mut self, feature: DualMacFeature, scan_config: u32, fw_config: u32) {
        self.cur_scan_config = DualMacScanConfig(0);
        self.cur_fw_mode_config = DualMacFwModeConfig(0);

        if feature != DualMacFeature::DisableDbsCxnAndScan {
            let scan = DualMacScanConfig(scan_config);
            let fw = DualMacFwModeConfig(fw_config);
            self.cur_scan_config.set_async_dbs_scan(scan.async_dbs_scan());
            self.cur_scan_config.set_sync_dbs_scan(scan.sync_dbs_scan());
            self.cur_scan_config.set_dbs_scan(scan.dbs_scan());
            self.cur_scan_config.set_agile_scan(scan.agile_scan());
            self.cur_scan_config.set_agile_dfs_scan(scan.agile_dfs_scan());
            self.cur_fw_mode_config.set_dbs(fw.dbs());
            self.cur_fw_mode_config.set_agile_dfs(fw.agile_dfs());
            self.cur_fw_mode_config.set_dbs_for_cxn(fw.dbs_for_cxn());
        }

        self.prev_scan_config = self.cur_scan_config;
        self.prev_fw_mode_config = self.cur_fw_mode_config;
    }

    /// Copies the firmware's async-SBS bit when SBS is enabled in configuration.
    pub fn init_sbs_fw_config(&mut self, sbs_enable: bool, fw_config: u32) {
        if !sbs_enable {
            return;
        }
        self.cur_fw_mode_config.set_async_sbs(DualMacFwModeConfig(fw_config).async_sbs());
        self.prev_fw_mode_config = self.cur_fw_mode_config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_dbs_word() {
        // 2x2 MAC0 @ 80 MHz, 1x1 MAC1 @ 40 MHz, DBS, id 1.
        let raw: u64 = (2 << 28) | (2 << 24) | (1 << 20) | (1 << 16) | (5 << 12) | (4 << 8)
            | (1 << 7) | (0x3 << 3) | 1;
        let mode = HwModeDescriptor::from(HwModeWord(raw));
        assert_eq!(mode.mac0.tx_streams, 2);
        assert_eq!(mode.mac0.rx_streams, 2);
        assert_eq!(mode.mac1.tx_streams, 1);
        assert_eq!(mode.mac0.bw, HwModeBandwidth::Mhz80);
        assert_eq!(mode.mac1.bw, HwModeBandwidth::Mhz40);
        assert!(mode.dbs);
        assert!(!mode.sbs);
        assert!(!mode.emlsr);
        assert_eq!(mode.mac0.band_cap, 0x3);
        assert_eq!(mode.hw_mode_id, 1);
        assert_eq!(HwModeWord::from(&mode).0, raw);
    }

    #[test]
    fn emlsr_lives_above_the_low_word() {
        let mut word = HwModeWord(0);
        word.set_emlsr(true);
        assert_eq!(word.0, 1 << 32);
        assert!(HwModeDescriptor::from(word).emlsr);
    }

    #[test]
    fn config_type_from_raw() {
        assert_eq!(HwModeConfigType::from_raw(5), Some(HwModeConfigType::DbsOrSbs));
        assert_eq!(HwModeConfigType::from_raw(8), Some(HwModeConfigType::Emlsr));
        assert_eq!(HwModeConfigType::from_raw(10), None);
        assert!(HwModeConfigType::Sbs.is_dual_mac());
        assert!(!HwModeConfigType::DbsSbs.is_dual_mac());
        assert!(!HwModeConfigType::Emlsr.is_dual_mac());
    }

    #[test]
    fn disabled_feature_leaves_config_zero() {
        let mut cfg = DualMacConfig::default();
        cfg.init_dbs_config(DualMacFeature::DisableDbsCxnAndScan, 0xffff_ffff, 0xffff_ffff);
        assert_eq!(cfg.cur_fw_mode_config.0, 0);
        assert_eq!(cfg.cur_scan_config.0, 0);
    }

    #[test]
    fn init_copies_only_known_bits() {
        let mut cfg = DualMacConfig::default();
        cfg.init_dbs_config(DualMacFeature::EnableDbsCxnAndScan, 0xffff_ffff, 0xffff_ffff);
        assert_eq!(cfg.cur_scan_config.0, 0xf800_0000);
        // Async SBS is only taken from the SBS init path.
        assert_eq!(cfg.cur_fw_mode_config.0, 0xe000_0000);
        assert_eq!(cfg.prev_fw_mode_config, cfg.cur_fw_mode_config);

        cfg.init_sbs_fw_config(false, 1 << 26);
        assert!(!cfg.cur_fw_mode_config.async_sbs());
        cfg.init_sbs_fw_config(true, 1 << 26);
        assert!(cfg.cur_fw_mode_config.async_sbs());
        assert!(cfg.prev_fw_mode_config.async_sbs());
    }
}
