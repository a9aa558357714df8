// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The hardware-mode catalog: the decoded list of firmware hardware modes, the frequency range of
//! every MAC in every mode, the current hw-mode index and the radio combinations the hardware can
//! run simultaneously.
//!
//! The catalog is rebuilt wholesale by [`HwCatalog::update_hw_mode_list`] whenever firmware
//! reports its capabilities, and refined by [`HwCatalog::update_sbs_freq`] once the SBS cutoff
//! becomes known.

use {
    crate::{
        channel::{is_5ghz_or_6ghz, Freq, HwModeBandwidth, WifiBand},
        error::PolicyError,
        freq_range::{FreqRangeMode, FreqRangeTable, MacFreqRanges, RegFreqBounds},
        hw_mode::{
            DualMacConfig, DualMacFeature, HwModeConfigType, HwModeDescriptor, HwModeWord,
            MacCapability, MacPhyCaps, DEFAULT_HW_MODE_INDEX, MAX_MAC,
        },
    },
    log::{debug, error, info},
};

pub const MAX_RADIO_COMBINATION: usize = 16;

/// A set of bands the MACs can serve at the same time, with the antenna count used on each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RadioCombination {
    pub hw_mode: FreqRangeMode,
    /// Bitmask of `1 << band` per MAC, zero for an unused MAC.
    pub band_mask: [u32; MAX_MAC],
    pub antenna: [u8; MAX_MAC],
}

pub fn band_bit(band: WifiBand) -> u32 {
    match band {
        WifiBand::Band2G => 1 << 0,
        WifiBand::Band5G => 1 << 1,
        WifiBand::Band6G => 1 << 2,
    }
}

impl RadioCombination {
    fn new(
        hw_mode: FreqRangeMode,
        mac0_band: Option<WifiBand>,
        mac1_band: Option<WifiBand>,
        mac0_antenna: u8,
        mac1_antenna: u8,
    ) -> Self {
        Self {
            hw_mode,
            band_mask: [mac0_band.map_or(0, band_bit), mac1_band.map_or(0, band_bit)],
            antenna: [mac0_antenna, mac1_antenna],
        }
    }
}

/// Current and previous firmware hw-mode index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwModeIndex {
    pub old: u32,
    pub new: u32,
}

impl Default for HwModeIndex {
    fn default() -> Self {
        Self { old: DEFAULT_HW_MODE_INDEX, new: DEFAULT_HW_MODE_INDEX }
    }
}

#[derive(Clone, Debug)]
pub struct HwCatalog {
    modes: Vec<HwModeDescriptor>,
    freq_ranges: FreqRangeTable,
    cur_mac_freq_range: MacFreqRanges,
    radio_combinations: Vec<RadioCombination>,
    index: HwModeIndex,
    sbs_lower_band_end_freq: Freq,
    dual_mac: DualMacConfig,
    dual_mac_feature: DualMacFeature,
    fw_dbs_support: bool,
    bounds: RegFreqBounds,
    // Kept so the catalog can be rebuilt when the SBS cutoff arrives later.
    last_caps: Vec<MacPhyCaps>,
    last_num_hw_modes: usize,
}

impl HwCatalog {
    pub fn new(dual_mac_feature: DualMacFeature, fw_dbs_support: bool, bounds: RegFreqBounds) -> Self {
        Self {
            modes: Vec::new(),
            freq_ranges: FreqRangeTable::default(),
            cur_mac_freq_range: MacFreqRanges::default(),
            radio_combinations: Vec::new(),
            index: HwModeIndex::default(),
            sbs_lower_band_end_freq: 0,
            dual_mac: DualMacConfig::default(),
            dual_mac_feature,
            fw_dbs_support,
            bounds,
            last_caps: Vec::new(),
            last_num_hw_modes: 0,
        }
    }

    pub fn bounds(&self) -> &RegFreqBounds {
        &self.bounds
    }

    pub fn set_bounds(&mut self, bounds: RegFreqBounds) {
        self.bounds = bounds;
    }

    /// The dual-MAC configuration currently in force.
    pub fn get_dbs_config(&self) -> &DualMacConfig {
        &self.dual_mac
    }

    pub fn init_dbs_config(&mut self, scan_config: u32, fw_config: u32) {
        if self.dual_mac_feature == DualMacFeature::DisableDbsCxnAndScan {
            error!("Disabling dual mac capabilities");
        }
        self.dual_mac.init_dbs_config(self.dual_mac_feature, scan_config, fw_config);
        debug!(
            "cur_scan_config:{:x} cur_fw_mode_config:{:x}",
            self.dual_mac.cur_scan_config.0, self.dual_mac.cur_fw_mode_config.0
        );
    }

    pub fn init_sbs_fw_config(&mut self, sbs_enable: bool, fw_config: u32) {
        if !sbs_enable {
            debug!("SBS not enabled from config");
        }
        self.dual_mac.init_sbs_fw_config(sbs_enable, fw_config);
    }

    pub fn hw_modes(&self) -> &[HwModeDescriptor] {
        &self.modes
    }

    /// Firmware encoding of the mode at `index`, as used in hw-mode change commands.
    pub fn hw_mode_word(&self, index: usize) -> Option<u64> {
        self.modes.get(index).map(|mode| HwModeWord::from(mode).0)
    }

    pub fn freq_ranges(&self) -> &FreqRangeTable {
        &self.freq_ranges
    }

    pub fn cur_mac_freq_range(&self) -> &MacFreqRanges {
        &self.cur_mac_freq_range
    }

    pub fn sbs_lower_band_end_freq(&self) -> Freq {
        self.sbs_lower_band_end_freq
    }

    /// Rebuilds modes, frequency ranges and radio combinations from the MAC-PHY capability
    /// records of the service-ready extension event. Records are consumed in order: one per
    /// single-MAC mode, two per dual-MAC or eMLSR mode.
    pub fn update_hw_mode_list(
        &mut self,
        caps: &[MacPhyCaps],
        num_hw_modes: usize,
    ) -> Result<(), PolicyError> {
        if num_hw_modes == 0 {
            error!("Number of HW modes: 0");
            return Err(PolicyError::Failure("no hw modes reported"));
        }

        self.last_caps = caps.to_vec();
        self.last_num_hw_modes = num_hw_modes;
        self.modes.clear();
        self.freq_ranges.clear();
        self.cur_mac_freq_range = MacFreqRanges::default();
        self.radio_combinations.clear();
        debug!("Updated HW mode list: Num modes:{}", num_hw_modes);

        let mut records = caps.iter();
        for i in 0..num_hw_modes {
            let mac0_cap = records.next().ok_or_else(|| {
                error!("hw mode {} has no mac-phy capability record", i);
                PolicyError::Inval("truncated mac-phy capability list")
            })?;
            let mac0 = self.mac_capability(mac0_cap);
            let config_type = mac0_cap.hw_mode_config_type;
            self.freq_ranges.update_mac_freq_info(mac0_cap, self.sbs_lower_band_end_freq, &self.bounds);

            let mut mac1 = MacCapability::default();
            let mut dbs = false;
            let mut sbs = false;
            let mut emlsr = false;
            let mut last = mac0_cap;
            if config_type.is_dual_mac() || config_type == HwModeConfigType::Emlsr {
                let mac1_cap = records.next().ok_or_else(|| {
                    error!("hw mode {} is missing its MAC1 record", i);
                    PolicyError::Inval("truncated mac-phy capability list")
                })?;
                mac1 = self.mac_capability(mac1_cap);
                self.freq_ranges.update_mac_freq_info(
                    mac1_cap,
                    self.sbs_lower_band_end_freq,
                    &self.bounds,
                );
                last = mac1_cap;
                if config_type == HwModeConfigType::Emlsr {
                    emlsr = true;
                } else {
                    dbs = config_type == HwModeConfigType::Dbs
                        || config_type == HwModeConfigType::DbsOrSbs;
                    sbs = self.freq_ranges.sbs_range_present(self.sbs_lower_band_end_freq)
                        && config_type != HwModeConfigType::Dbs;
                }
            }

            let mode = HwModeDescriptor {
                mac0,
                mac1,
                dbs,
                sbs,
                emlsr,
                agile_dfs: false,
                hw_mode_id: last.hw_mode_id,
            };
            debug!("[{}] {:?}", i, mode);
            self.modes.push(mode);
            self.update_radio_combination_matrix(&mac0, &mac1, dbs, sbs);
        }

        self.fill_curr_mac_freq_by_hwmode(FreqRangeMode::Smm);
        self.dump_freq_range();
        Ok(())
    }

    /// Records the SBS cutoff published by firmware and, when set, rebuilds the catalog so the
    /// lower/upper share ranges replace the raw SBS range.
    pub fn update_sbs_freq(&mut self, sbs_lower_band_end_freq: Freq) -> Result<(), PolicyError> {
        debug!("sbs_lower_band_end_freq {}", sbs_lower_band_end_freq);
        if is_5ghz_or_6ghz(sbs_lower_band_end_freq) {
            self.sbs_lower_band_end_freq = sbs_lower_band_end_freq;
        }
        if self.sbs_lower_band_end_freq == 0 || self.last_num_hw_modes == 0 {
            return Ok(());
        }
        let caps = std::mem::take(&mut self.last_caps);
        let result = self.update_hw_mode_list(&caps, self.last_num_hw_modes);
        if result.is_err() {
            self.last_caps = caps;
        }
        result
    }

    fn mac_capability(&self, cap: &MacPhyCaps) -> MacCapability {
        let mut info = MacCapability {
            tx_streams: cap.tx_chain_mask_2g.max(cap.tx_chain_mask_5g).count_ones() as u8,
            rx_streams: cap.rx_chain_mask_2g.max(cap.rx_chain_mask_5g).count_ones() as u8,
            bw: HwModeBandwidth::from_wmi_width(cap.max_bw_supported_2g.max(cap.max_bw_supported_5g)),
            band_cap: cap.supported_bands,
            support_6ghz: false,
        };
        if info.supports_5g() {
            let max_5g = self.bounds.max_5ghz_range_freq();
            let max_5g = if cap.reg_cap_ext.high_5ghz_chan != 0 {
                cap.reg_cap_ext.high_5ghz_chan.min(max_5g)
            } else {
                max_5g
            };
            info.support_6ghz = max_5g > self.bounds.min_6ghz_freq;
        }
        info
    }

    fn add_radio_comb(&mut self, radio: RadioCombination) {
        if self.radio_combinations.contains(&radio) {
            return;
        }
        if self.radio_combinations.len() == MAX_RADIO_COMBINATION {
            error!("radio combination overflow {}", self.radio_combinations.len());
            return;
        }
        debug!("radio combination {}: {:?}", self.radio_combinations.len(), radio);
        self.radio_combinations.push(radio);
    }

    fn update_radio_combination_matrix(
        &mut self,
        mac0: &MacCapability,
        mac1: &MacCapability,
        dbs: bool,
        sbs: bool,
    ) {
        use {FreqRangeMode::*, WifiBand::*};

        if !dbs && !sbs {
            if mac0.supports_2g() {
                self.add_radio_comb(RadioCombination::new(Smm, Some(Band2G), None, mac0.tx_streams, 0));
            }
            if mac0.supports_5g() {
                self.add_radio_comb(RadioCombination::new(Smm, Some(Band5G), None, mac0.tx_streams, 0));
                if mac0.support_6ghz {
                    self.add_radio_comb(RadioCombination::new(
                        Smm,
                        Some(Band6G),
                        None,
                        mac0.tx_streams,
                        0,
                    ));
                }
            }
            return;
        }

        if mac0.supports_2g() && mac1.supports_5g() {
            self.add_radio_comb(RadioCombination::new(
                Dbs,
                Some(Band2G),
                Some(Band5G),
                mac0.tx_streams,
                mac1.tx_streams,
            ));
            if mac1.support_6ghz {
                self.add_radio_comb(RadioCombination::new(
                    Dbs,
                    Some(Band2G),
                    Some(Band6G),
                    mac0.tx_streams,
                    mac1.tx_streams,
                ));
            }
        }
        if mac0.supports_5g() && mac1.supports_2g() {
            self.add_radio_comb(RadioCombination::new(
                Dbs,
                Some(Band2G),
                Some(Band5G),
                mac1.tx_streams,
                mac0.tx_streams,
            ));
            if mac0.support_6ghz {
                self.add_radio_comb(RadioCombination::new(
                    Dbs,
                    Some(Band2G),
                    Some(Band6G),
                    mac1.tx_streams,
                    mac0.tx_streams,
                ));
            }
        }
        if mac0.supports_5g() && mac1.supports_5g() {
            if mac0.support_6ghz {
                self.add_radio_comb(RadioCombination::new(
                    Sbs,
                    Some(Band5G),
                    Some(Band6G),
                    mac1.tx_streams,
                    mac0.tx_streams,
                ));
            } else if mac1.support_6ghz {
                self.add_radio_comb(RadioCombination::new(
                    Sbs,
                    Some(Band5G),
                    Some(Band6G),
                    mac0.tx_streams,
                    mac1.tx_streams,
                ));
            }
        }
    }

    /// Radio combinations usable on this hardware. Multi-MAC entries are hidden unless the
    /// hardware is DBS or SBS capable.
    pub fn get_radio_combinations(&self, max: usize) -> Result<Vec<RadioCombination>, PolicyError> {
        let dbs_or_sbs = self.is_hw_dbs_capable() || self.is_hw_sbs_capable();
        let mut out = Vec::new();
        for comb in self.radio_combinations.iter() {
            if !dbs_or_sbs && comb.hw_mode != FreqRangeMode::Smm {
                continue;
            }
            if out.len() >= max {
                error!(
                    "out of buffer size radio_comb_num {} comb_max {}",
                    self.radio_combinations.len(),
                    max
                );
                return Err(PolicyError::Resources("radio combination output"));
            }
            out.push(*comb);
        }
        Ok(out)
    }

    fn dump_freq_range(&self) {
        for mode in FreqRangeMode::ALL.iter() {
            for (mac, range) in self.freq_ranges.get(*mode).iter().enumerate() {
                if range.is_filled() {
                    debug!("freq range {:?} mac {}: {:?}", mode, mac, range);
                }
            }
        }
        for (mac, range) in self.cur_mac_freq_range.iter().enumerate() {
            if range.is_filled() {
                debug!("current freq range mac {}: {:?}", mac, range);
            }
        }
    }

    /// Dual-MAC features are enabled in configuration and firmware mode config.
    pub fn is_dbs_enable(&self) -> bool {
        if self.dual_mac_feature == DualMacFeature::DisableDbsCxnAndScan {
            return false;
        }
        self.dual_mac.cur_fw_mode_config.dbs()
    }

    fn hwlist_has_dbs(&self) -> bool {
        self.modes.iter().any(|m| m.dbs)
    }

    fn hwlist_has_sbs(&self) -> bool {
        self.modes.iter().any(|m| m.sbs)
    }

    pub fn is_hw_dbs_capable(&self) -> bool {
        self.is_dbs_enable() && self.fw_dbs_support && self.hwlist_has_dbs()
    }

    pub fn is_hw_sbs_capable(&self) -> bool {
        self.dual_mac.cur_fw_mode_config.async_sbs() && self.fw_dbs_support && self.hwlist_has_sbs()
    }

    pub fn is_hw_emlsr_capable(&self) -> bool {
        self.modes.iter().any(|m| m.emlsr)
    }

    pub fn is_dbs_scan_allowed(&self) -> bool {
        if !self.fw_dbs_support || !self.hwlist_has_dbs() {
            return false;
        }
        match self.dual_mac_feature {
            DualMacFeature::DisableDbsCxnAndScan
            | DualMacFeature::EnableDbsCxnAndDisableDbsScan => false,
            _ => true,
        }
    }

    /// Whether a 1x1 and a 2x2 DBS mode exist.
    pub fn get_dbs_hw_modes(&self) -> (bool, bool) {
        if !self.is_hw_dbs_capable() {
            return (false, false);
        }
        let has_ss = |m: &HwModeDescriptor, ss: u8| {
            m.dbs
                && ((m.mac0.tx_streams == ss && m.mac0.rx_streams == ss)
                    || (m.mac1.tx_streams == ss && m.mac1.rx_streams == ss))
        };
        (self.modes.iter().any(|m| has_ss(m, 1)), self.modes.iter().any(|m| has_ss(m, 2)))
    }

    pub fn hw_mode_index(&self) -> HwModeIndex {
        self.index
    }

    pub fn update_hw_mode_index(&mut self, new_hw_mode_index: u32) {
        if self.index.new == DEFAULT_HW_MODE_INDEX {
            self.index.new = new_hw_mode_index;
        } else {
            self.index.old = self.index.new;
            self.index.new = new_hw_mode_index;
        }
        debug!("Updated: old_hw_index:{} new_hw_index:{}", self.index.old, self.index.new);
    }

    pub fn get_hw_mode_from_idx(&self, index: u32) -> Result<HwModeDescriptor, PolicyError> {
        self.modes.get(index as usize).copied().ok_or_else(|| {
            error!("Invalid hw mode index {} of {}", index, self.modes.len());
            PolicyError::Inval("hw mode index out of range")
        })
    }

    pub fn get_current_hw_mode(&self) -> Result<HwModeDescriptor, PolicyError> {
        if self.index.new == DEFAULT_HW_MODE_INDEX {
            error!("HW mode is not yet initialized");
            return Err(PolicyError::Failure("hw mode not initialized"));
        }
        self.get_hw_mode_from_idx(self.index.new)
    }

    /// Some MAC of the current range carries both 2.4 GHz and 5 GHz, which only SBS does.
    pub fn is_cur_freq_range_sbs(&self) -> bool {
        self.cur_mac_freq_range.iter().any(|r| r.is_shared())
    }

    pub fn is_current_hwmode_dbs(&self) -> bool {
        if !self.is_hw_dbs_capable() {
            return false;
        }
        match self.get_current_hw_mode() {
            Ok(mode) if mode.dbs => !self.is_hw_sbs_capable() || !self.is_cur_freq_range_sbs(),
            _ => false,
        }
    }

    pub fn is_current_hwmode_sbs(&self) -> bool {
        if !self.is_hw_sbs_capable() {
            return false;
        }
        match self.get_current_hw_mode() {
            Ok(mode) => mode.sbs && self.is_cur_freq_range_sbs(),
            Err(_) => false,
        }
    }

    pub fn is_current_hwmode_emlsr(&self) -> bool {
        if !self.is_hw_emlsr_capable() {
            return false;
        }
        self.get_current_hw_mode().map(|mode| mode.emlsr).unwrap_or(false)
    }

    pub fn fill_curr_mac_freq_by_hwmode(&mut self, mode: FreqRangeMode) {
        self.cur_mac_freq_range = *self.freq_ranges.get(mode);
    }

    /// Applies a firmware hw-mode switch: records the index and re-anchors the current MAC
    /// frequency range to the table matching the new mode.
    pub fn set_current_hw_mode(&mut self, index: u32) -> Result<(), PolicyError> {
        let mode = self.get_hw_mode_from_idx(index)?;
        self.update_hw_mode_index(index);
        let range_mode = if mode.sbs && self.is_hw_sbs_capable() {
            if self.sbs_lower_band_end_freq == 0 {
                FreqRangeMode::Sbs
            } else if self.sbs_24_shared_with_high_5() {
                FreqRangeMode::SbsUpperShare
            } else {
                FreqRangeMode::SbsLowerShare
            }
        } else if mode.dbs {
            FreqRangeMode::Dbs
        } else if mode.emlsr {
            FreqRangeMode::Emlsr
        } else {
            FreqRangeMode::Smm
        };
        info!("hw mode {} now current, frequency range {:?}", index, range_mode);
        self.fill_curr_mac_freq_by_hwmode(range_mode);
        Ok(())
    }

    /// Frequency splitting the two 5 GHz shares of SBS, or 0 when no SBS range is known.
    pub fn get_sbs_cut_off_freq(&self) -> Freq {
        if self.sbs_lower_band_end_freq != 0 {
            return self.sbs_lower_band_end_freq;
        }
        let sbs = self.freq_ranges.get(FreqRangeMode::Sbs);
        sbs[0].low_5ghz_freq.max(sbs[1].low_5ghz_freq).saturating_sub(1)
    }

    pub fn can_2ghz_share_low_high_5ghz_sbs(&self) -> bool {
        self.sbs_lower_band_end_freq != 0
    }

    pub fn sbs_24_shared_with_high_5(&self) -> bool {
        if self.can_2ghz_share_low_high_5ghz_sbs() {
            return true;
        }
        let cutoff = self.get_sbs_cut_off_freq();
        if cutoff == 0 {
            error!("Invalid cut off freq");
            return false;
        }
        self.freq_ranges
            .get(FreqRangeMode::Sbs)
            .iter()
            .any(|r| r.is_shared() && cutoff < r.low_5ghz_freq)
    }

    pub fn sbs_24_shared_with_low_5(&self) -> bool {
        if self.can_2ghz_share_low_high_5ghz_sbs() {
            return true;
        }
        let cutoff = self.get_sbs_cut_off_freq();
        if cutoff == 0 {
            error!("Invalid cut off freq");
            return false;
        }
        self.freq_ranges
            .get(FreqRangeMode::Sbs)
            .iter()
            .any(|r| r.low_2ghz_freq != 0 && r.high_5ghz_freq != 0 && cutoff > r.high_5ghz_freq)
    }
}
