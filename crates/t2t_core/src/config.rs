use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use t2t_common::{csr, ctrl};

/// A 48-bit multicast MAC address.
///
/// The first octet of the text form is the most significant byte of the
/// value, matching the register layout (`MCAST_MAC_HI` holds octets 0-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(u64);

impl MacAddr {
    pub const MASK: u64 = 0xFFFF_FFFF_FFFF;

    /// Builds an address from the low 48 bits of `value`.
    pub const fn new(value: u64) -> Self {
        Self(value & Self::MASK)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn octets(self) -> [u8; 6] {
        let b = self.0.to_be_bytes();
        [b[2], b[3], b[4], b[5], b[6], b[7]]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address {0:?}, expected six hex octets like 01:00:5e:00:00:01")]
pub struct ParseMacError(pub String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMacError(s.to_string());
        let mut value = 0u64;
        let mut count = 0;
        for part in s.trim().split(':') {
            if part.is_empty() || part.len() > 2 {
                return Err(err());
            }
            let octet = u8::from_str_radix(part, 16).map_err(|_| err())?;
            value = (value << 8) | u64::from(octet);
            count += 1;
        }
        if count != 6 {
            return Err(err());
        }
        Ok(MacAddr(value))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ParseMacError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> String {
        mac.to_string()
    }
}

/// Every risk and control parameter the device exposes.
///
/// Field widths follow the register encodings, so any value of this type
/// survives a write/read cycle through hardware unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub enable: bool,
    pub promiscuous: bool,
    pub mcast_enable: bool,
    pub mcast_mac: MacAddr,
    pub check_ip_csum: bool,
    pub expected_port: u16,
    /// Price band around the reference price, in basis points.
    pub price_band_bps: u16,
    /// Token bucket refill per millisecond.
    pub token_rate: u16,
    /// Token bucket burst size.
    pub token_max: u16,
    pub position_limit: i32,
    pub stale_usec: u32,
    pub seq_gap_thr: u32,
    pub kill_switch: bool,
    pub expected_seq: u32,
    pub seq_check_en: bool,
    pub msix_enable: bool,
    /// Records per interrupt when MSI-X is enabled.
    pub msix_threshold: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enable: false,
            promiscuous: false,
            mcast_enable: false,
            mcast_mac: MacAddr::default(),
            check_ip_csum: true,
            expected_port: 0,
            price_band_bps: 500,
            token_rate: 1000,
            token_max: 10_000,
            position_limit: 1_000_000,
            stale_usec: 100_000,
            seq_gap_thr: 100,
            kill_switch: false,
            expected_seq: 1,
            seq_check_en: true,
            msix_enable: false,
            msix_threshold: 256,
        }
    }
}

impl DeviceConfig {
    /// Number of registers written by [`DeviceConfig::register_writes`].
    pub const REGISTER_COUNT: usize = 12;

    /// The value of the CTRL register for this configuration.
    pub fn ctrl_bits(&self) -> u32 {
        let mut bits = 0;
        for (on, bit) in [
            (self.enable, ctrl::ENABLE),
            (self.promiscuous, ctrl::PROMISCUOUS),
            (self.mcast_enable, ctrl::MCAST_ENABLE),
            (self.check_ip_csum, ctrl::CHECK_IP_CSUM),
            (self.seq_check_en, ctrl::SEQ_CHECK_EN),
            (self.msix_enable, ctrl::MSIX_ENABLE),
        ] {
            if on {
                bits |= bit;
            }
        }
        bits
    }

    /// Register writes that apply this configuration, in issue order.
    ///
    /// CTRL is always last: the device must see every parameter before the
    /// enable bit can start the pipeline.
    pub fn register_writes(&self) -> [(usize, u32); Self::REGISTER_COUNT] {
        let mac = self.mcast_mac.value();
        [
            (csr::PRICE_BAND_BPS, u32::from(self.price_band_bps)),
            (
                csr::TOKEN_RATE,
                (u32::from(self.token_max) << 16) | u32::from(self.token_rate),
            ),
            (csr::POSITION_LIMIT, self.position_limit as u32),
            (csr::STALE_USEC, self.stale_usec),
            (csr::SEQ_GAP_THR, self.seq_gap_thr),
            (csr::KILL, u32::from(self.kill_switch)),
            (csr::EXPECTED_SEQ, self.expected_seq),
            (csr::EXPECTED_PORT, u32::from(self.expected_port)),
            (csr::MSIX_CFG, u32::from(self.msix_threshold)),
            (csr::MCAST_MAC_LO, (mac & 0xFFFF_FFFF) as u32),
            (csr::MCAST_MAC_HI, ((mac >> 32) & 0xFFFF) as u32),
            (csr::CTRL, self.ctrl_bits()),
        ]
    }

    /// Rebuilds a configuration from live register values.
    pub fn from_registers(read: impl Fn(usize) -> u32) -> Self {
        let ctrl_reg = read(csr::CTRL);
        let token = read(csr::TOKEN_RATE);
        let mac_lo = u64::from(read(csr::MCAST_MAC_LO));
        let mac_hi = u64::from(read(csr::MCAST_MAC_HI) & 0xFFFF);

        Self {
            enable: ctrl_reg & ctrl::ENABLE != 0,
            promiscuous: ctrl_reg & ctrl::PROMISCUOUS != 0,
            mcast_enable: ctrl_reg & ctrl::MCAST_ENABLE != 0,
            mcast_mac: MacAddr::new((mac_hi << 32) | mac_lo),
            check_ip_csum: ctrl_reg & ctrl::CHECK_IP_CSUM != 0,
            expected_port: (read(csr::EXPECTED_PORT) & 0xFFFF) as u16,
            price_band_bps: (read(csr::PRICE_BAND_BPS) & 0xFFFF) as u16,
            token_rate: (token & 0xFFFF) as u16,
            token_max: (token >> 16) as u16,
            position_limit: read(csr::POSITION_LIMIT) as i32,
            stale_usec: read(csr::STALE_USEC),
            seq_gap_thr: read(csr::SEQ_GAP_THR),
            kill_switch: read(csr::KILL) & 1 != 0,
            expected_seq: read(csr::EXPECTED_SEQ),
            seq_check_en: ctrl_reg & ctrl::SEQ_CHECK_EN != 0,
            msix_enable: ctrl_reg & ctrl::MSIX_ENABLE != 0,
            msix_threshold: (read(csr::MSIX_CFG) & 0xFFFF) as u16,
        }
    }
}

/// Named sets of risk limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskProfile {
    Default,
    Aggressive,
    Conservative,
    /// Zero limits with the kill switch engaged.
    Disabled,
}

impl RiskProfile {
    pub const ALL: [RiskProfile; 4] = [
        RiskProfile::Default,
        RiskProfile::Aggressive,
        RiskProfile::Conservative,
        RiskProfile::Disabled,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RiskProfile::Default => "default",
            RiskProfile::Aggressive => "aggressive",
            RiskProfile::Conservative => "conservative",
            RiskProfile::Disabled => "disabled",
        }
    }

    /// `(price_band_bps, token_rate, position_limit, kill_switch)`.
    pub fn limits(self) -> (u16, u16, i32, bool) {
        match self {
            RiskProfile::Default => (100, 1000, 50_000, false),
            RiskProfile::Aggressive => (200, 2000, 100_000, false),
            RiskProfile::Conservative => (50, 500, 25_000, false),
            RiskProfile::Disabled => (0, 0, 0, true),
        }
    }

    /// Overlays the profile's four risk fields onto `cfg`.
    pub fn apply(self, cfg: &mut DeviceConfig) {
        let (band, rate, limit, kill) = self.limits();
        cfg.price_band_bps = band;
        cfg.token_rate = rate;
        cfg.position_limit = limit;
        cfg.kill_switch = kill;
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown risk profile {0:?} (available: default, aggressive, conservative, disabled)")]
pub struct UnknownProfile(pub String);

impl FromStr for RiskProfile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskProfile::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownProfile(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashMap;

    fn write_then_read(cfg: &DeviceConfig) -> DeviceConfig {
        let regs: HashMap<usize, u32> = cfg.register_writes().into_iter().collect();
        DeviceConfig::from_registers(|off| regs.get(&off).copied().unwrap_or(0))
    }

    fn random_config(rng: &mut impl Rng) -> DeviceConfig {
        DeviceConfig {
            enable: rng.r#gen(),
            promiscuous: rng.r#gen(),
            mcast_enable: rng.r#gen(),
            mcast_mac: MacAddr::new(rng.r#gen()),
            check_ip_csum: rng.r#gen(),
            expected_port: rng.r#gen(),
            price_band_bps: rng.r#gen(),
            token_rate: rng.r#gen(),
            token_max: rng.r#gen(),
            position_limit: rng.r#gen(),
            stale_usec: rng.r#gen(),
            seq_gap_thr: rng.r#gen(),
            kill_switch: rng.r#gen(),
            expected_seq: rng.r#gen(),
            seq_check_en: rng.r#gen(),
            msix_enable: rng.r#gen(),
            msix_threshold: rng.r#gen(),
        }
    }

    #[test]
    fn ctrl_is_written_last() {
        let writes = DeviceConfig::default().register_writes();
        assert_eq!(writes.last().map(|w| w.0), Some(csr::CTRL));
        assert_eq!(writes.iter().filter(|w| w.0 == csr::CTRL).count(), 1);
    }

    #[test]
    fn default_ctrl_bits() {
        let bits = DeviceConfig::default().ctrl_bits();
        assert_eq!(bits, ctrl::CHECK_IP_CSUM | ctrl::SEQ_CHECK_EN);
    }

    #[test]
    fn token_register_packs_burst_in_high_half() {
        let cfg = DeviceConfig {
            token_rate: 0x1234,
            token_max: 0xABCD,
            ..Default::default()
        };
        let token = cfg
            .register_writes()
            .into_iter()
            .find(|w| w.0 == csr::TOKEN_RATE)
            .map(|w| w.1);
        assert_eq!(token, Some(0xABCD_1234));
    }

    #[test]
    fn random_configs_survive_register_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let cfg = random_config(&mut rng);
            assert_eq!(write_then_read(&cfg), cfg);
        }
    }

    #[test]
    fn negative_position_limit_round_trips() {
        let cfg = DeviceConfig {
            position_limit: -5,
            ..Default::default()
        };
        assert_eq!(write_then_read(&cfg).position_limit, -5);
    }

    #[test]
    fn mac_text_form() {
        let mac: MacAddr = "01:00:5E:7f:00:01".parse().unwrap();
        assert_eq!(mac.value(), 0x0100_5E7F_0001);
        assert_eq!(mac.to_string(), "01:00:5e:7f:00:01");
        assert!("01:00:5e".parse::<MacAddr>().is_err());
        assert!("01:00:5e:7f:00:01:02".parse::<MacAddr>().is_err());
        assert!("zz:00:5e:7f:00:01".parse::<MacAddr>().is_err());
    }

    #[test]
    fn profiles_overlay_only_risk_fields() {
        let mut cfg = DeviceConfig {
            stale_usec: 7,
            ..Default::default()
        };
        RiskProfile::Disabled.apply(&mut cfg);
        assert_eq!(cfg.price_band_bps, 0);
        assert_eq!(cfg.token_rate, 0);
        assert_eq!(cfg.position_limit, 0);
        assert!(cfg.kill_switch);
        assert_eq!(cfg.stale_usec, 7);
        assert_eq!(cfg.token_max, 10_000);

        assert_eq!("Aggressive".parse(), Ok(RiskProfile::Aggressive));
        assert!("yolo".parse::<RiskProfile>().is_err());
    }
}
