// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::hw_mode::DualMacFeature,
    anyhow::{Context, Error},
    serde::{Deserialize, Serialize},
    std::io::Read,
};

/// Upper bound of concurrently tracked connections.
pub const MAX_NUMBER_OF_CONC_CONNECTIONS: usize = 4;
/// Upper bound of force-inactive ML STA links tracked at once.
pub const MAX_NUMBER_OF_DISABLE_LINK: usize = 4;
pub const DEFAULT_SET_LINK_TIMEOUT_MS: u64 = 6000;

/// DFS master capability policy while a STA is connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DfsMasterConfig {
    /// No explicit policy; DFS master stays enabled.
    Unspecified,
    Enabled,
    Disabled,
    /// Enabled unless a STA sits on 5 GHz without DBS to separate it.
    Flex,
}

/// MCC to SCC switch policy for SAP/GO that share a band with a STA.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MccToSccSwitch {
    Disable,
    ForceWithoutDisconnection,
    WithFavoriteChannel,
    ForcePreferredWithoutDisconnection,
    WithPreferredBand,
}

/// What to do beyond logging when a table invariant is found broken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertAction {
    LogOnly,
    /// Lower the global log level to `Off` to freeze log buffers for postmortem.
    SuppressLogging,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_conc_cxns: u32,
    pub dual_mac_feature: DualMacFeature,
    pub sbs_enable: bool,
    pub dfs_master: DfsMasterConfig,
    pub sta_sap_scc_on_dfs_chan: bool,
    pub sta_sap_scc_on_lte_coex_chan: bool,
    pub sta_sap_scc_on_indoor_chan: bool,
    pub mcc_to_scc_switch: MccToSccSwitch,
    pub go_force_scc: bool,
    pub sub_20_mhz_enabled: bool,
    pub indoor_channel_support: bool,
    pub keep_6ghz_on_sta_disconnect: bool,
    pub same_band_sta_allowed: bool,
    pub set_link_timeout_ms: u64,
    pub alert_action: AlertAction,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_conc_cxns: MAX_NUMBER_OF_CONC_CONNECTIONS as u32,
            dual_mac_feature: DualMacFeature::EnableDbsCxnAndScan,
            sbs_enable: true,
            dfs_master: DfsMasterConfig::Unspecified,
            sta_sap_scc_on_dfs_chan: false,
            sta_sap_scc_on_lte_coex_chan: true,
            sta_sap_scc_on_indoor_chan: false,
            mcc_to_scc_switch: MccToSccSwitch::WithPreferredBand,
            go_force_scc: false,
            sub_20_mhz_enabled: false,
            indoor_channel_support: false,
            keep_6ghz_on_sta_disconnect: false,
            same_band_sta_allowed: true,
            set_link_timeout_ms: DEFAULT_SET_LINK_TIMEOUT_MS,
            alert_action: AlertAction::LogOnly,
        }
    }
}

impl PolicyConfig {
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json).context("failed to parse policy config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, Error> {
        let config: Self =
            serde_json::from_reader(reader).context("failed to read policy config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.max_conc_cxns == 0 || self.max_conc_cxns as usize > MAX_NUMBER_OF_CONC_CONNECTIONS
        {
            anyhow::bail!(
                "max_conc_cxns {} outside 1..={}",
                self.max_conc_cxns,
                MAX_NUMBER_OF_CONC_CONNECTIONS
            );
        }
        Ok(())
    }

    /// Dual-MAC features are fully disabled by configuration.
    pub fn is_dual_mac_disabled(&self) -> bool {
        self.dual_mac_feature == DualMacFeature::DisableDbsCxnAndScan
    }

    pub fn is_force_scc(&self) -> bool {
        match self.mcc_to_scc_switch {
            MccToSccSwitch::ForceWithoutDisconnection
            | MccToSccSwitch::WithFavoriteChannel
            | MccToSccSwitch::ForcePreferredWithoutDisconnection
            | MccToSccSwitch::WithPreferredBand => true,
            MccToSccSwitch::Disable => false,
        }
    }

    pub fn go_scc_enforced(&self) -> bool {
        self.mcc_to_scc_switch == MccToSccSwitch::ForcePreferredWithoutDisconnection
            || (self.go_force_scc && self.is_force_scc())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test]
    fn empty_json_yields_defaults() {
        let config = PolicyConfig::from_json_str("{}").expect("parse defaults");
        assert_eq!(config, PolicyConfig::default());
        assert_eq!(config.set_link_timeout_ms, 6000);
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config = PolicyConfig::from_json_str(
            r#"{"max_conc_cxns": 3, "dfs_master": "Flex", "alert_action": "SuppressLogging"}"#,
        )
        .expect("parse partial");
        assert_eq!(config.max_conc_cxns, 3);
        assert_eq!(config.dfs_master, DfsMasterConfig::Flex);
        assert_eq!(config.alert_action, AlertAction::SuppressLogging);
        assert!(config.sbs_enable);
    }

    #[test]
    fn reader_input_is_accepted() {
        let json = br#"{"dual_mac_feature": "DisableDbsCxnAndScan"}"#;
        let config = PolicyConfig::from_json_reader(&json[..]).expect("parse from reader");
        assert!(config.is_dual_mac_disabled());
    }

    #[test]
    fn capacity_beyond_table_is_rejected() {
        assert!(PolicyConfig::from_json_str(r#"{"max_conc_cxns": 9}"#).is_err());
        assert!(PolicyConfig::from_json_str(r#"{"max_conc_cxns": 0}"#).is_err());
    }

    #[test_case(MccToSccSwitch::Disable, false, false, false; "disabled")]
    #[test_case(MccToSccSwitch::WithPreferredBand, false, true, false; "preferred band")]
    #[test_case(MccToSccSwitch::WithPreferredBand, true, true, true; "go force scc")]
    #[test_case(MccToSccSwitch::ForcePreferredWithoutDisconnection, false, true, true; "forced")]
    fn scc_switch_policy(
        switch: MccToSccSwitch,
        go_force_scc: bool,
        force_scc: bool,
        go_enforced: bool,
    ) {
        let config = PolicyConfig { mcc_to_scc_switch: switch, go_force_scc, ..Default::default() };
        assert_eq!(config.is_force_scc(), force_scc);
        assert_eq!(config.go_scc_enforced(), go_enforced);
    }
}
