// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Answers whether a set of frequencies is bound to share one physical MAC.
//!
//! Two views are combined. When the current hardware mode is DBS or SBS the current MAC
//! frequency ranges decide. Otherwise the frequencies "always" share a MAC only if neither DBS
//! nor SBS (in any share variant) could place them on different MACs.

use {
    crate::{
        catalog::HwCatalog,
        channel::{is_24ghz, Freq},
        conn_table::PolicyMode,
        freq_range::{FreqRangeMode, MacFreqRanges},
        hw_mode::MAX_MAC,
    },
    log::{debug, error, trace},
};

/// Some MAC of `ranges` serves every one of `freqs`.
pub fn freqs_same_mac_in_range(ranges: &MacFreqRanges, freqs: &[Freq]) -> bool {
    ranges.iter().any(|range| freqs.iter().all(|freq| range.contains(*freq)))
}

/// Frequencies (with their modes) that land on `mac` in `ranges`. Unset frequencies are skipped.
fn mac_freq_list(
    ranges: &MacFreqRanges,
    mac: usize,
    conns: &[(Freq, PolicyMode)],
) -> Vec<(Freq, PolicyMode)> {
    conns.iter().copied().filter(|(freq, _)| *freq != 0 && ranges[mac].contains(*freq)).collect()
}

/// A MAC can host one or two home channels, or three interfaces in SCC made of one STA/CLI and
/// two APs or of three APs.
fn mac_freq_list_allow(list: &[(Freq, PolicyMode)]) -> bool {
    match list.len() {
        1 | 2 => true,
        3 => {
            let freq = list[0].0;
            if list.iter().any(|(f, _)| *f != freq) {
                return false;
            }
            let sta = list
                .iter()
                .filter(|(_, mode)| matches!(mode, PolicyMode::Sta | PolicyMode::P2pClient))
                .count();
            let ap = list.len() - sta;
            (sta == 1 && ap == 2) || ap == 3
        }
        _ => false,
    }
}

impl HwCatalog {
    /// The frequency table of `mode` is one the hardware can actually switch to.
    pub fn is_supported_range_mode(&self, mode: FreqRangeMode) -> bool {
        match mode {
            FreqRangeMode::Smm => true,
            FreqRangeMode::Dbs => self.is_hw_dbs_capable(),
            FreqRangeMode::Sbs => self.is_hw_sbs_capable(),
            FreqRangeMode::SbsUpperShare | FreqRangeMode::SbsLowerShare => {
                self.is_hw_sbs_capable() && self.sbs_lower_band_end_freq() != 0
            }
            FreqRangeMode::Emlsr => false,
        }
    }

    fn freqs_same_mac_in_mode(&self, mode: FreqRangeMode, freqs: &[Freq]) -> bool {
        freqs_same_mac_in_range(self.freq_ranges().get(mode), freqs)
    }

    fn freqs_same_mac_in_sbs(&self, freqs: &[Freq]) -> bool {
        if !self.is_hw_sbs_capable() {
            return true;
        }
        if self.sbs_lower_band_end_freq() != 0 {
            return self.freqs_same_mac_in_mode(FreqRangeMode::SbsLowerShare, freqs)
                || self.freqs_same_mac_in_mode(FreqRangeMode::SbsUpperShare, freqs);
        }
        self.freqs_same_mac_in_mode(FreqRangeMode::Sbs, freqs)
    }

    fn freqs_always_on_same_mac(&self, freqs: &[Freq]) -> bool {
        if !self.is_hw_dbs_capable() {
            return true;
        }
        let dbs = self.freqs_same_mac_in_mode(FreqRangeMode::Dbs, freqs);
        let sbs = dbs && self.freqs_same_mac_in_sbs(freqs);
        trace!("freqs {:?} same mac: dbs {} sbs {}", freqs, dbs, sbs);
        dbs && sbs
    }

    fn freqs_on_same_mac(&self, freqs: &[Freq]) -> bool {
        if !self.is_hw_dbs_capable() {
            return true;
        }
        let mode = match self.get_current_hw_mode() {
            Ok(mode) => mode,
            Err(e) => {
                error!("current hw mode unavailable: {}", e);
                return false;
            }
        };
        if mode.dbs || mode.sbs {
            return freqs_same_mac_in_range(self.cur_mac_freq_range(), freqs);
        }
        self.freqs_always_on_same_mac(freqs)
    }

    pub fn two_freq_same_mac_in_dbs(&self, freq_1: Freq, freq_2: Freq) -> bool {
        self.freqs_same_mac_in_mode(FreqRangeMode::Dbs, &[freq_1, freq_2])
    }

    pub fn three_freq_same_mac_in_dbs(&self, freq_1: Freq, freq_2: Freq, freq_3: Freq) -> bool {
        self.freqs_same_mac_in_mode(FreqRangeMode::Dbs, &[freq_1, freq_2, freq_3])
    }

    /// True when SBS cannot separate the frequencies, including when the hardware has no SBS.
    pub fn two_freq_same_mac_in_sbs(&self, freq_1: Freq, freq_2: Freq) -> bool {
        self.freqs_same_mac_in_sbs(&[freq_1, freq_2])
    }

    pub fn three_freq_same_mac_in_sbs(&self, freq_1: Freq, freq_2: Freq, freq_3: Freq) -> bool {
        self.freqs_same_mac_in_sbs(&[freq_1, freq_2, freq_3])
    }

    pub fn two_freq_always_on_same_mac(&self, freq_1: Freq, freq_2: Freq) -> bool {
        self.freqs_always_on_same_mac(&[freq_1, freq_2])
    }

    pub fn three_freq_always_on_same_mac(&self, freq_1: Freq, freq_2: Freq, freq_3: Freq) -> bool {
        self.freqs_always_on_same_mac(&[freq_1, freq_2, freq_3])
    }

    pub fn are_2_freq_on_same_mac(&self, freq_1: Freq, freq_2: Freq) -> bool {
        self.freqs_on_same_mac(&[freq_1, freq_2])
    }

    pub fn are_3_freq_on_same_mac(&self, freq_1: Freq, freq_2: Freq, freq_3: Freq) -> bool {
        self.freqs_on_same_mac(&[freq_1, freq_2, freq_3])
    }

    /// Two 5/6 GHz frequencies that SBS places on different MACs.
    pub fn are_sbs_chan(&self, freq_1: Freq, freq_2: Freq) -> bool {
        if !self.is_hw_sbs_capable() {
            return false;
        }
        if is_24ghz(freq_1) || is_24ghz(freq_2) {
            return false;
        }
        !self.two_freq_same_mac_in_sbs(freq_1, freq_2)
    }

    /// Whether some supported hardware mode can host the existing connections plus a new one on
    /// `freq` in `mode`. `ml_links` holds the two active ML STA link frequencies, which must stay
    /// on different MACs in any mode considered.
    pub fn allow_4th_new_freq(
        &self,
        existing: &[(Freq, PolicyMode)],
        freq: Freq,
        mode: PolicyMode,
        ml_links: Option<(Freq, Freq)>,
    ) -> bool {
        if !self.is_hw_dbs_capable() {
            return false;
        }

        let mut conns = existing.to_vec();
        conns.push((freq, mode));
        for range_mode in FreqRangeMode::ALL.iter().copied() {
            if !self.is_supported_range_mode(range_mode) {
                continue;
            }
            let ranges = self.freq_ranges().get(range_mode);
            if let Some((link0, link1)) = ml_links {
                if link0 != 0 && link1 != 0 && freqs_same_mac_in_range(ranges, &[link0, link1]) {
                    continue;
                }
            }
            if (0..MAX_MAC).all(|mac| mac_freq_list_allow(&mac_freq_list(ranges, mac, &conns))) {
                debug!("new freq {} mode {:?} is allowed in hw mode {:?}", freq, mode, range_mode);
                return true;
            }
        }
        debug!("the 4th new freq {} mode {:?} is not allowed in any hw mode", freq, mode);
        false
    }
}
