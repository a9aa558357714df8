// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    bitfield::bitfield,
    serde::{Deserialize, Serialize},
};

/// Channel center frequency in MHz. Zero means "no channel".
pub type Freq = u32;

pub const MIN_24GHZ_FREQ: Freq = 2412;
pub const MAX_24GHZ_FREQ: Freq = 2484;
pub const MIN_5GHZ_FREQ: Freq = 4912;
pub const MAX_5GHZ_FREQ: Freq = 5885;
pub const MIN_6GHZ_FREQ: Freq = 5935;
pub const MAX_6GHZ_FREQ: Freq = 7115;

/// Guard separation kept between the two 5 GHz shares of an SBS split.
pub const SBS_GUARD_MHZ: Freq = 10;

pub fn is_24ghz(freq: Freq) -> bool {
    (MIN_24GHZ_FREQ..=MAX_24GHZ_FREQ).contains(&freq)
}

pub fn is_5ghz(freq: Freq) -> bool {
    (MIN_5GHZ_FREQ..=MAX_5GHZ_FREQ).contains(&freq)
}

pub fn is_6ghz(freq: Freq) -> bool {
    (MIN_6GHZ_FREQ..=MAX_6GHZ_FREQ).contains(&freq)
}

/// True for 5 GHz and 6 GHz channels, the bands SBS can split.
pub fn is_5ghz_or_6ghz(freq: Freq) -> bool {
    is_5ghz(freq) || is_6ghz(freq)
}

pub fn same_band(a: Freq, b: Freq) -> bool {
    (is_24ghz(a) && is_24ghz(b)) || (is_5ghz(a) && is_5ghz(b)) || (is_6ghz(a) && is_6ghz(b))
}

/// Regulatory band a radio combination entry refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WifiBand {
    Band2G,
    Band5G,
    Band6G,
}

/// Channel state reported by the regulatory collaborator for a frequency and width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Disable,
    Passive,
    Dfs,
    Enable,
    Invalid,
}

/// Channel width as the policy manager tracks it per connection and per MAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HwModeBandwidth {
    None,
    Mhz5,
    Mhz10,
    Mhz20,
    Mhz40,
    Mhz80,
    Mhz80Plus80,
    Mhz160,
    Mhz320,
}

impl Default for HwModeBandwidth {
    fn default() -> Self {
        HwModeBandwidth::None
    }
}

impl HwModeBandwidth {
    /// Decodes the 4-bit bandwidth index carried in the firmware hw-mode word.
    pub fn from_index(index: u8) -> Self {
        match index {
            1 => HwModeBandwidth::Mhz5,
            2 => HwModeBandwidth::Mhz10,
            3 => HwModeBandwidth::Mhz20,
            4 => HwModeBandwidth::Mhz40,
            5 => HwModeBandwidth::Mhz80,
            6 => HwModeBandwidth::Mhz80Plus80,
            7 => HwModeBandwidth::Mhz160,
            8 => HwModeBandwidth::Mhz320,
            _ => HwModeBandwidth::None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            HwModeBandwidth::None => 0,
            HwModeBandwidth::Mhz5 => 1,
            HwModeBandwidth::Mhz10 => 2,
            HwModeBandwidth::Mhz20 => 3,
            HwModeBandwidth::Mhz40 => 4,
            HwModeBandwidth::Mhz80 => 5,
            HwModeBandwidth::Mhz80Plus80 => 6,
            HwModeBandwidth::Mhz160 => 7,
            HwModeBandwidth::Mhz320 => 8,
        }
    }

    /// Maps a WMI channel-width value from the mac-phy capability records.
    pub fn from_wmi_width(width: u32) -> Self {
        match width {
            0 => HwModeBandwidth::Mhz20,
            1 => HwModeBandwidth::Mhz40,
            2 => HwModeBandwidth::Mhz80,
            3 => HwModeBandwidth::Mhz160,
            4 => HwModeBandwidth::Mhz80Plus80,
            5 => HwModeBandwidth::Mhz5,
            6 => HwModeBandwidth::Mhz10,
            9 => HwModeBandwidth::Mhz320,
            _ => HwModeBandwidth::None,
        }
    }

    pub fn is_sub_20(self) -> bool {
        self == HwModeBandwidth::Mhz5 || self == HwModeBandwidth::Mhz10
    }
}

bitfield! {
    /// Extended channel flags kept per connection.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ChanFlagExt(u16);
    impl Debug;
    pub dfs, set_dfs: 1;
    pub dfs_cfreq2, set_dfs_cfreq2: 2;
    pub disallow_adhoc, set_disallow_adhoc: 3;
    pub psc, set_psc: 5;
    pub value, _: 15, 0;
}

impl ChanFlagExt {
    /// Either segment of the channel requires radar detection.
    pub fn any_dfs(&self) -> bool {
        self.dfs() || self.dfs_cfreq2()
    }
}

bitfield! {
    /// Extra facts about a prospective connection that admission needs beyond mode and channel.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ConcExtFlags(u32);
    impl Debug;
    pub mlo, set_mlo: 0;
    pub mlo_link_assoc_connected, set_mlo_link_assoc_connected: 1;
    pub value, _: 31, 0;
}
