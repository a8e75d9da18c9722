//! Card communication protocols identifiable through PC/SC readers
//!
//! Each protocol associates an identifier with a default ATR-matching rule.
//! The rules follow the PC/SC standard Part 3 (core and supplemental
//! documents) for contactless card identification and are full-match
//! regular expressions over the uppercase hex encoding of the ATR.
//!
//! See <https://pcscworkgroup.com/> for the underlying specifications.

/// Protocols and technologies with built-in identification rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardCommunicationProtocol {
    /// Any ISO 14443-4 compliant card or device (both Type A and Type B)
    Iso14443_4,

    /// Calypso cards using the Innovatron B Prime protocol
    ///
    /// B Prime ATRs carry the `5A0A` signature in the first historical
    /// bytes; note that such ATRs may also satisfy the ISO 14443-4 rule,
    /// and precedence between matching protocols is the caller's concern.
    InnovatronBPrime,

    /// NXP MIFARE Ultralight technologies
    MifareUltralight,

    /// NXP MIFARE Classic 1K
    MifareClassic,

    /// NXP MIFARE DESFire, DESFire EV1 and EV2
    MifareDesfire,

    /// STMicroelectronics ST25/SRT512 memory tags
    St25Srt512,

    /// ISO 7816-3 contact cards, any transmission protocol
    Iso7816_3,

    /// ISO 7816-3 contact cards communicating with T=0
    Iso7816_3T0,

    /// ISO 7816-3 contact cards communicating with T=1
    Iso7816_3T1,
}

impl CardCommunicationProtocol {
    pub(crate) const ALL: [Self; 9] = [
        Self::Iso14443_4,
        Self::InnovatronBPrime,
        Self::MifareUltralight,
        Self::MifareClassic,
        Self::MifareDesfire,
        Self::St25Srt512,
        Self::Iso7816_3,
        Self::Iso7816_3T0,
        Self::Iso7816_3T1,
    ];

    /// The registry identifier for this protocol.
    pub const fn identifier(self) -> &'static str {
        match self {
            Self::Iso14443_4 => "ISO_14443_4",
            Self::InnovatronBPrime => "INNOVATRON_B_PRIME",
            Self::MifareUltralight => "MIFARE_ULTRALIGHT",
            Self::MifareClassic => "MIFARE_CLASSIC",
            Self::MifareDesfire => "MIFARE_DESFIRE",
            Self::St25Srt512 => "ST25_SRT512",
            Self::Iso7816_3 => "ISO_7816_3",
            Self::Iso7816_3T0 => "ISO_7816_3_T0",
            Self::Iso7816_3T1 => "ISO_7816_3_T1",
        }
    }

    /// The built-in ATR identification rule for this protocol.
    pub const fn default_rule(self) -> &'static str {
        match self {
            Self::Iso14443_4 => {
                "3B8880....................|3B8B80.*|3B8C800150.*|.*4F4D4141544C4153.*"
            }
            Self::InnovatronBPrime => "3B8.8001(80)?5A0A.*",
            Self::MifareUltralight => "3B8F8001804F0CA0000003060300030.*",
            Self::MifareClassic => "3B8F8001804F0CA000000306030001000000006A",
            Self::MifareDesfire => "3B8180018080",
            Self::St25Srt512 => "3B8F8001804F0CA0000003060(5|6|7)0007.*",
            Self::Iso7816_3 | Self::Iso7816_3T0 | Self::Iso7816_3T1 => "3.*",
        }
    }
}
