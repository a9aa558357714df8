// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Link force requests for ML STA and the view of ML STA links the controller decides on.

use {
    crate::{
        channel::Freq,
        collaborators::VdevManager,
        config::MAX_NUMBER_OF_CONC_CONNECTIONS,
        conn_table::{ConnectionState, PolicyMode, VdevId},
    },
    log::error,
};

/// Number of 32-bit words in a vdev bitmap.
pub const MLO_VDEV_BITMAP_SZ: usize = 2;

/// Whether a link force request is outstanding in firmware. At most one is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetLinkState {
    Idle,
    InFlight,
}

impl Default for SetLinkState {
    fn default() -> Self {
        SetLinkState::Idle
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceMode {
    /// Force the listed links active.
    Active,
    /// Force the listed links inactive.
    Inactive,
    /// Keep `link_num` links of the listed ones active, firmware picks which.
    ActiveNum,
    /// Keep `link_num` links of the listed ones inactive, firmware picks which.
    InactiveNum,
    /// Activate `vdev_bitmap` and deactivate `inactive_bitmap` in one command.
    ActiveInactive,
    /// Drop any previous force on the listed links.
    NoForce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceReason {
    Connect,
    Disconnect,
    LinkRemoval,
}

/// A set of vdev ids packed the way firmware expects: bit `id % 32` of word `id / 32`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VdevBitmap {
    pub words: [u32; MLO_VDEV_BITMAP_SZ],
    /// Number of words in use.
    pub num_words: u8,
}

impl VdevBitmap {
    pub fn from_vdevs(vdevs: &[VdevId]) -> Self {
        let mut bitmap = Self::default();
        for &vdev_id in vdevs {
            bitmap.insert(vdev_id);
        }
        bitmap
    }

    /// Adds `vdev_id`. Ids past the last word are dropped with an error.
    pub fn insert(&mut self, vdev_id: VdevId) {
        let word = vdev_id as usize / 32;
        if word >= MLO_VDEV_BITMAP_SZ {
            error!("vdev {} does not fit the link bitmap", vdev_id);
            return;
        }
        self.words[word] |= 1 << (vdev_id % 32);
        self.num_words = self.num_words.max(word as u8 + 1);
    }

    pub fn contains(&self, vdev_id: VdevId) -> bool {
        let word = vdev_id as usize / 32;
        word < MLO_VDEV_BITMAP_SZ && self.words[word] & (1 << (vdev_id % 32)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn vdevs(&self) -> Vec<VdevId> {
        let mut vdevs = vec![];
        for (word, bits) in self.words.iter().enumerate() {
            for bit in 0..32 {
                if bits & (1 << bit) != 0 {
                    vdevs.push((word * 32 + bit) as VdevId);
                }
            }
        }
        vdevs
    }

    /// Vdevs in exactly one of the two sets.
    pub fn symmetric_difference(&self, other: &VdevBitmap) -> VdevBitmap {
        let mut words = [0; MLO_VDEV_BITMAP_SZ];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.words[i] ^ other.words[i];
        }
        VdevBitmap { words, num_words: self.num_words.max(other.num_words) }
    }
}

/// A link force command for the ML STA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetLinkRequest {
    pub reason: ForceReason,
    pub mode: ForceMode,
    pub vdev_bitmap: VdevBitmap,
    /// Only used by `ForceMode::ActiveInactive`.
    pub inactive_bitmap: VdevBitmap,
    /// Link count for the `*Num` modes, zero otherwise.
    pub link_num: u8,
}

impl SetLinkRequest {
    /// Builds a request over `vdevs`, plus `inactive` when `mode` is `ActiveInactive`.
    pub fn new(reason: ForceReason, mode: ForceMode, vdevs: &[VdevId], inactive: &[VdevId]) -> Self {
        let link_num = match mode {
            ForceMode::ActiveNum | ForceMode::InactiveNum => {
                vdevs.len().saturating_sub(1) as u8
            }
            _ => 0,
        };
        let inactive_bitmap = match mode {
            ForceMode::ActiveInactive => VdevBitmap::from_vdevs(inactive),
            _ => VdevBitmap::default(),
        };
        Self { reason, mode, vdev_bitmap: VdevBitmap::from_vdevs(vdevs), inactive_bitmap, link_num }
    }
}

/// Result of a link force command as reported by firmware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetLinkResponse {
    /// Zero on success.
    pub status: u32,
    pub active: VdevBitmap,
    pub inactive: VdevBitmap,
}

/// ML STA links, active ones first and force-inactive ones after them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MlStaInfo {
    pub ml: Vec<(VdevId, Freq)>,
    pub num_disabled: usize,
    pub non_ml: Vec<(VdevId, Freq)>,
}

impl MlStaInfo {
    pub fn num_ml(&self) -> usize {
        self.ml.len()
    }

    pub fn num_active(&self) -> usize {
        self.ml.len().saturating_sub(self.num_disabled)
    }

    pub fn ml_vdevs(&self) -> Vec<VdevId> {
        self.ml.iter().map(|(vdev_id, _)| *vdev_id).collect()
    }

    pub fn ml_freqs(&self) -> Vec<Freq> {
        self.ml.iter().map(|(_, freq)| *freq).collect()
    }

    /// Link counts that no controller decision handles: none, or more than the table can hold.
    pub fn out_of_range(&self) -> bool {
        self.ml.len() > MAX_NUMBER_OF_CONC_CONNECTIONS
            || self.num_disabled > MAX_NUMBER_OF_CONC_CONNECTIONS
            || self.ml.len() <= self.num_disabled
    }
}

/// Splits STA rows into ML and legacy STA, then appends the force-inactive ML links.
pub fn get_ml_sta_info(state: &ConnectionState, vdevs: &dyn VdevManager) -> MlStaInfo {
    let mut info = MlStaInfo::default();
    for conn in state.mode_specific_connections(PolicyMode::Sta) {
        if vdevs.is_mlo(conn.vdev_id) {
            info.ml.push((conn.vdev_id, conn.freq));
        } else {
            info.non_ml.push((conn.vdev_id, conn.freq));
        }
    }
    for link in state.disabled_links().filter(|l| l.mode == PolicyMode::Sta) {
        info.ml.push((link.vdev_id, link.freq));
        info.num_disabled += 1;
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_packs_words() {
        let bitmap = VdevBitmap::from_vdevs(&[0, 3, 33]);
        assert_eq!(bitmap.words, [0b1001, 0b10]);
        assert_eq!(bitmap.num_words, 2);
        assert!(bitmap.contains(33));
        assert!(!bitmap.contains(1));
        assert_eq!(bitmap.vdevs(), vec![0, 3, 33]);
    }

    #[test]
    fn bitmap_drops_ids_past_last_word() {
        let bitmap = VdevBitmap::from_vdevs(&[1, 64, 70]);
        assert_eq!(bitmap.words, [0b10, 0]);
        assert_eq!(bitmap.num_words, 1);
        assert!(!bitmap.contains(64));
    }

    #[test]
    fn symmetric_difference() {
        let a = VdevBitmap::from_vdevs(&[0, 1, 2]);
        let b = VdevBitmap::from_vdevs(&[1]);
        assert_eq!(a.symmetric_difference(&b).vdevs(), vec![0, 2]);
    }

    #[test]
    fn num_modes_keep_one_link_fewer() {
        let req = SetLinkRequest::new(ForceReason::Connect, ForceMode::ActiveNum, &[0, 1], &[]);
        assert_eq!(req.link_num, 1);
        assert_eq!(req.vdev_bitmap.vdevs(), vec![0, 1]);

        let req = SetLinkRequest::new(ForceReason::Connect, ForceMode::Inactive, &[1], &[]);
        assert_eq!(req.link_num, 0);
    }

    #[test]
    fn inactive_bitmap_only_for_active_inactive() {
        let req =
            SetLinkRequest::new(ForceReason::LinkRemoval, ForceMode::ActiveInactive, &[2], &[1]);
        assert_eq!(req.vdev_bitmap.vdevs(), vec![2]);
        assert_eq!(req.inactive_bitmap.vdevs(), vec![1]);

        let req = SetLinkRequest::new(ForceReason::LinkRemoval, ForceMode::Inactive, &[2], &[1]);
        assert!(req.inactive_bitmap.is_empty());
    }

    #[test]
    fn ml_sta_info_bounds() {
        let mut info = MlStaInfo::default();
        assert!(info.out_of_range());
        info.ml = vec![(0, 5180), (1, 6135)];
        info.num_disabled = 1;
        assert!(!info.out_of_range());
        assert_eq!(info.num_active(), 1);
        info.num_disabled = 2;
        assert!(info.out_of_range());
    }
}
