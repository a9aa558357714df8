// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per hardware mode, per MAC frequency ranges and the range arithmetic used to derive them from
//! firmware capability records.

use {
    crate::{
        channel::{Freq, SBS_GUARD_MHZ},
        hw_mode::{MacPhyCaps, MAX_MAC, WLAN_2G_CAPABILITY, WLAN_5G_CAPABILITY},
    },
    log::{debug, error, info},
    serde::{Deserialize, Serialize},
};

/// Band boundaries of the current regulatory domain. A zero 6 GHz maximum means the domain has no
/// 6 GHz channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegFreqBounds {
    pub min_24ghz_freq: Freq,
    pub max_24ghz_freq: Freq,
    pub min_5ghz_freq: Freq,
    pub max_5ghz_freq: Freq,
    pub min_6ghz_freq: Freq,
    pub max_6ghz_freq: Freq,
}

impl Default for RegFreqBounds {
    fn default() -> Self {
        Self {
            min_24ghz_freq: 2412,
            max_24ghz_freq: 2484,
            min_5ghz_freq: 4912,
            max_5ghz_freq: 5885,
            min_6ghz_freq: 5935,
            max_6ghz_freq: 7115,
        }
    }
}

impl RegFreqBounds {
    /// Upper bound of the "5 GHz" range of a MAC, which also covers 6 GHz when present.
    pub fn max_5ghz_range_freq(&self) -> Freq {
        if self.max_6ghz_freq != 0 {
            self.max_6ghz_freq
        } else {
            self.max_5ghz_freq
        }
    }
}

/// Frequency span served by one MAC in one hardware mode. All-zero means the MAC is unused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreqRange {
    pub low_2ghz_freq: Freq,
    pub high_2ghz_freq: Freq,
    pub low_5ghz_freq: Freq,
    pub high_5ghz_freq: Freq,
}

impl FreqRange {
    pub fn is_filled(&self) -> bool {
        self.low_2ghz_freq != 0 || self.low_5ghz_freq != 0
    }

    /// MAC carries both 2.4 GHz and a share of 5 GHz.
    pub fn is_shared(&self) -> bool {
        self.low_2ghz_freq != 0 && self.low_5ghz_freq != 0
    }

    pub fn contains(&self, freq: Freq) -> bool {
        (freq >= self.low_2ghz_freq && freq <= self.high_2ghz_freq)
            || (freq >= self.low_5ghz_freq && freq <= self.high_5ghz_freq)
    }

    fn fill_24ghz(&mut self, cap: &MacPhyCaps, bounds: &RegFreqBounds) {
        let ext = &cap.reg_cap_ext;
        self.low_2ghz_freq = ext.low_2ghz_chan.max(bounds.min_24ghz_freq);
        self.high_2ghz_freq = if ext.high_2ghz_chan != 0 {
            ext.high_2ghz_chan.min(bounds.max_24ghz_freq)
        } else {
            bounds.max_24ghz_freq
        };
    }

    fn fill_5ghz(&mut self, cap: &MacPhyCaps, bounds: &RegFreqBounds) {
        let ext = &cap.reg_cap_ext;
        let max_5g = bounds.max_5ghz_range_freq();
        self.low_5ghz_freq = ext.low_5ghz_chan.max(bounds.min_5ghz_freq);
        self.high_5ghz_freq =
            if ext.high_5ghz_chan != 0 { ext.high_5ghz_chan.min(max_5g) } else { max_5g };
    }

    /// Widens this range with every band the capability record supports.
    pub fn fill_from_caps(&mut self, cap: &MacPhyCaps, bounds: &RegFreqBounds) {
        if cap.supported_bands & WLAN_2G_CAPABILITY != 0 {
            self.fill_24ghz(cap, bounds);
        }
        if cap.supported_bands & WLAN_5G_CAPABILITY != 0 {
            self.fill_5ghz(cap, bounds);
        }
    }
}

pub type MacFreqRanges = [FreqRange; MAX_MAC];

/// Hardware mode a frequency table belongs to. The two share modes are derived from `Sbs` when
/// firmware publishes the SBS cutoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreqRangeMode {
    Smm,
    Dbs,
    Sbs,
    SbsUpperShare,
    SbsLowerShare,
    Emlsr,
}

impl FreqRangeMode {
    pub const ALL: [FreqRangeMode; 6] = [
        FreqRangeMode::Smm,
        FreqRangeMode::Dbs,
        FreqRangeMode::Sbs,
        FreqRangeMode::SbsUpperShare,
        FreqRangeMode::SbsLowerShare,
        FreqRangeMode::Emlsr,
    ];

    fn slot(self) -> usize {
        match self {
            FreqRangeMode::Smm => 0,
            FreqRangeMode::Dbs => 1,
            FreqRangeMode::Sbs => 2,
            FreqRangeMode::SbsUpperShare => 3,
            FreqRangeMode::SbsLowerShare => 4,
            FreqRangeMode::Emlsr => 5,
        }
    }
}

/// Frequency ranges of every hardware mode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreqRangeTable {
    ranges: [MacFreqRanges; 6],
}

impl FreqRangeTable {
    pub fn get(&self, mode: FreqRangeMode) -> &MacFreqRanges {
        &self.ranges[mode.slot()]
    }

    pub fn get_mut(&mut self, mode: FreqRangeMode) -> &mut MacFreqRanges {
        &mut self.ranges[mode.slot()]
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Both MACs of `mode` have at least one band filled.
    pub fn both_phy_range_updated(&self, mode: FreqRangeMode) -> bool {
        self.get(mode).iter().all(FreqRange::is_filled)
    }

    /// SBS ranges are known, either directly or through the cutoff-derived share modes.
    pub fn sbs_range_present(&self, sbs_cutoff: Freq) -> bool {
        self.both_phy_range_updated(FreqRangeMode::Sbs)
            || (sbs_cutoff != 0
                && self.both_phy_range_updated(FreqRangeMode::SbsLowerShare)
                && self.both_phy_range_updated(FreqRangeMode::SbsUpperShare))
    }

    fn update_freq_info(
        &mut self,
        mode: FreqRangeMode,
        phy_id: usize,
        cap: &MacPhyCaps,
        bounds: &RegFreqBounds,
    ) {
        self.get_mut(mode)[phy_id].fill_from_caps(cap, bounds);
    }

    /// Records the range a capability record contributes to the hardware modes its config type
    /// participates in, running the DBS and SBS fixups once both MACs of a mode are known.
    pub fn update_mac_freq_info(
        &mut self,
        cap: &MacPhyCaps,
        sbs_cutoff: Freq,
        bounds: &RegFreqBounds,
    ) {
        use crate::hw_mode::HwModeConfigType::*;

        let phy_id = cap.phy_id as usize;
        if phy_id >= MAX_MAC {
            error!("Invalid phy id {}", phy_id);
            return;
        }

        match cap.hw_mode_config_type {
            Single => {
                if phy_id == 0 {
                    self.update_freq_info(FreqRangeMode::Smm, phy_id, cap, bounds);
                }
            }
            Dbs | Dbs2g5g => {
                if !self.both_phy_range_updated(FreqRangeMode::Dbs) {
                    self.update_freq_info(FreqRangeMode::Dbs, phy_id, cap, bounds);
                }
            }
            DbsSbs | DbsOrSbs => {
                self.update_freq_info(FreqRangeMode::Dbs, phy_id, cap, bounds);
                // Without any SBS hint the record says nothing about how 5 GHz is split.
                if sbs_cutoff != 0
                    || cap.reg_cap_ext.low_5ghz_chan != 0
                    || cap.reg_cap_ext.low_2ghz_chan != 0
                {
                    self.update_freq_info(FreqRangeMode::Sbs, phy_id, cap, bounds);
                }
                if self.both_phy_range_updated(FreqRangeMode::Dbs) {
                    self.update_dbs_freq_info();
                }
                if self.both_phy_range_updated(FreqRangeMode::Sbs) {
                    self.update_sbs_freq_info(sbs_cutoff, bounds);
                }
            }
            Phyb2g => {
                if phy_id != 0 {
                    self.update_freq_info(FreqRangeMode::Smm, phy_id, cap, bounds);
                }
            }
            Sbs | SbsPassive => {
                self.update_freq_info(FreqRangeMode::Sbs, phy_id, cap, bounds);
                if self.both_phy_range_updated(FreqRangeMode::Sbs) {
                    self.update_sbs_freq_info(sbs_cutoff, bounds);
                }
            }
            Emlsr => self.update_freq_info(FreqRangeMode::Emlsr, phy_id, cap, bounds),
            FwInternal => debug!("Ignoring fw internal hw mode for phy {}", phy_id),
        }
    }

    /// In DBS a MAC serving 2.4 GHz never also serves 5 GHz.
    fn update_dbs_freq_info(&mut self) {
        for range in self.get_mut(FreqRangeMode::Dbs).iter_mut() {
            if range.is_shared() {
                range.low_5ghz_freq = 0;
                range.high_5ghz_freq = 0;
            }
        }
    }

    /// Splits the SBS ranges so that the two MACs never overlap in 5 GHz. With a cutoff the split
    /// is materialized as the lower/upper share modes and the raw SBS table is cleared.
    pub fn update_sbs_freq_info(&mut self, sbs_cutoff: Freq, bounds: &RegFreqBounds) {
        if sbs_cutoff != 0 {
            let reference = *self.get(FreqRangeMode::Sbs);
            self.fill_share_sbs_freq(FreqRangeMode::SbsUpperShare, sbs_cutoff, &reference, bounds);
            self.fill_share_sbs_freq(FreqRangeMode::SbsLowerShare, sbs_cutoff, &reference, bounds);
            *self.get_mut(FreqRangeMode::Sbs) = MacFreqRanges::default();
            return;
        }

        for phy_id in 0..MAX_MAC {
            if self.modify_sbs_freq(phy_id).is_err() {
                error!("Invalid SBS frequency range, dropping SBS ranges");
                *self.get_mut(FreqRangeMode::Sbs) = MacFreqRanges::default();
                break;
            }
        }
    }

    /// Clips a 5 GHz-only MAC so it does not overlap the 5 GHz share of the 2.4 GHz MAC.
    fn modify_sbs_freq(&mut self, phy_id: usize) -> Result<(), ()> {
        let sbs = self.get_mut(FreqRangeMode::Sbs);
        let current = sbs[phy_id];
        if current.is_shared() {
            return Ok(());
        }
        if current.low_2ghz_freq != 0 {
            error!("SBS mac {} has only 2.4 GHz: {:?}", phy_id, current);
            return Err(());
        }

        let shared = sbs[if phy_id == 0 { 1 } else { 0 }];
        let non_shared = &mut sbs[phy_id];
        if shared.low_5ghz_freq > non_shared.low_5ghz_freq {
            // Shared MAC takes the high share.
            if non_shared.high_5ghz_freq >= shared.low_5ghz_freq {
                non_shared.high_5ghz_freq = shared
                    .low_5ghz_freq
                    .saturating_sub(SBS_GUARD_MHZ)
                    .max(non_shared.low_5ghz_freq);
            }
        } else if shared.high_5ghz_freq < non_shared.high_5ghz_freq {
            // Shared MAC takes the low share.
            if shared.high_5ghz_freq >= non_shared.low_5ghz_freq {
                non_shared.low_5ghz_freq =
                    (shared.high_5ghz_freq + SBS_GUARD_MHZ).min(non_shared.high_5ghz_freq);
            }
        } else {
            info!("Invalid SBS range with all 5 GHz shared");
            return Err(());
        }
        Ok(())
    }

    fn fill_share_sbs_freq(
        &mut self,
        mode: FreqRangeMode,
        sep: Freq,
        reference: &MacFreqRanges,
        bounds: &RegFreqBounds,
    ) {
        let lowest = lowest_5ghz_freq(reference, bounds);
        let highest = highest_5ghz_freq(reference, bounds);
        let shared_takes_upper = mode == FreqRangeMode::SbsUpperShare;
        for (range, reference) in self.get_mut(mode).iter_mut().zip(reference.iter()) {
            range.low_2ghz_freq = reference.low_2ghz_freq;
            range.high_2ghz_freq = reference.high_2ghz_freq;
            let shared_mac = range.low_2ghz_freq != 0;
            if shared_mac == shared_takes_upper {
                range.low_5ghz_freq = sep + SBS_GUARD_MHZ;
                range.high_5ghz_freq = highest;
            } else {
                range.low_5ghz_freq = lowest;
                range.high_5ghz_freq = sep;
            }
        }
    }
}

/// Highest 5 GHz frequency of any MAC, or the regulatory maximum when none is known.
pub fn highest_5ghz_freq(ranges: &MacFreqRanges, bounds: &RegFreqBounds) -> Freq {
    match ranges.iter().map(|r| r.high_5ghz_freq).max() {
        Some(freq) if freq != 0 => freq,
        _ => bounds.max_5ghz_range_freq(),
    }
}

/// Lowest non-zero 5 GHz frequency of any MAC, or the regulatory minimum when none is known.
pub fn lowest_5ghz_freq(ranges: &MacFreqRanges, bounds: &RegFreqBounds) -> Freq {
    ranges
        .iter()
        .map(|r| r.low_5ghz_freq)
        .filter(|f| *f != 0)
        .min()
        .unwrap_or(bounds.min_5ghz_freq)
}
