//! SSH algorithm profiles.
//!
//! Switches in the field run anything from current firmware to decade-old
//! images, so the algorithm set is a per-connection choice. Each profile is
//! the modern set plus progressively weaker fallbacks appended after it, so a
//! capable peer still negotiates a modern algorithm.

use std::borrow::Cow;

use async_ssh2_tokio::ServerCheckMethod;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{Preferred, cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which algorithm profile to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Secure,
    /// Adds SHA-1 key exchange/MACs and CBC ciphers.
    Balanced,
    /// Adds the obsolete group1/gex-sha1 exchanges and DSA/ssh-rsa host keys.
    LegacyCompatible,
}

struct Tier {
    kex: &'static [kex::Name],
    cipher: &'static [cipher::Name],
    mac: &'static [mac::Name],
    key: &'static [Algorithm],
}

const MODERN: Tier = Tier {
    kex: &[
        kex::CURVE25519,
        kex::CURVE25519_PRE_RFC_8731,
        kex::ECDH_SHA2_NISTP256,
        kex::ECDH_SHA2_NISTP384,
        kex::ECDH_SHA2_NISTP521,
        kex::DH_G16_SHA512,
        kex::DH_G14_SHA256,
    ],
    cipher: &[
        cipher::CHACHA20_POLY1305,
        cipher::AES_256_GCM,
        cipher::AES_256_CTR,
        cipher::AES_192_CTR,
        cipher::AES_128_CTR,
    ],
    mac: &[
        mac::HMAC_SHA512_ETM,
        mac::HMAC_SHA256_ETM,
        mac::HMAC_SHA512,
        mac::HMAC_SHA256,
    ],
    key: &[
        Algorithm::Ed25519,
        Algorithm::Ecdsa { curve: EcdsaCurve::NistP256 },
        Algorithm::Ecdsa { curve: EcdsaCurve::NistP384 },
        Algorithm::Ecdsa { curve: EcdsaCurve::NistP521 },
        Algorithm::Rsa { hash: Some(HashAlg::Sha512) },
        Algorithm::Rsa { hash: Some(HashAlg::Sha256) },
    ],
};

const SHA1_FALLBACK: Tier = Tier {
    kex: &[kex::DH_GEX_SHA256, kex::DH_G14_SHA1],
    cipher: &[cipher::AES_256_CBC, cipher::AES_128_CBC],
    mac: &[mac::HMAC_SHA1_ETM, mac::HMAC_SHA1],
    key: &[],
};

// IOS 12.x images with 768/1024-bit keys stop here.
const OBSOLETE_FALLBACK: Tier = Tier {
    kex: &[kex::DH_GEX_SHA1, kex::DH_G1_SHA1],
    cipher: &[cipher::AES_192_CBC],
    mac: &[],
    key: &[Algorithm::Rsa { hash: None }, Algorithm::Dsa],
};

const COMPRESSION: &[compression::Name] = &[compression::NONE, compression::ZLIB, compression::ZLIB_LEGACY];

impl SecurityLevel {
    fn tiers(self) -> &'static [Tier] {
        match self {
            SecurityLevel::Secure => &[MODERN],
            SecurityLevel::Balanced => &[MODERN, SHA1_FALLBACK],
            SecurityLevel::LegacyCompatible => &[MODERN, SHA1_FALLBACK, OBSOLETE_FALLBACK],
        }
    }
}

fn collect<T: Clone>(tiers: &[Tier], pick: impl Fn(&Tier) -> &'static [T]) -> Cow<'static, [T]> {
    match tiers {
        [only] => Cow::Borrowed(pick(only)),
        _ => Cow::Owned(tiers.iter().flat_map(|t| pick(t).iter().cloned()).collect()),
    }
}

/// How the SSH transport negotiates and verifies a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::secure_default()
    }
}

impl ConnectionSecurityOptions {
    /// Known-hosts verification with the given profile.
    pub fn with_level(level: SecurityLevel) -> Self {
        Self {
            level,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    pub fn secure_default() -> Self {
        Self::with_level(SecurityLevel::Secure)
    }

    pub fn balanced() -> Self {
        Self::with_level(SecurityLevel::Balanced)
    }

    /// Broadest algorithm set and no host key check; lab use only.
    pub fn legacy_compatible() -> Self {
        Self {
            level: SecurityLevel::LegacyCompatible,
            server_check: ServerCheckMethod::NoCheck,
        }
    }

    pub(super) fn preferred(&self) -> Preferred {
        let tiers = self.level.tiers();
        Preferred {
            kex: collect(tiers, |t| t.kex),
            key: collect(tiers, |t| t.key),
            cipher: collect(tiers, |t| t.cipher),
            mac: collect(tiers, |t| t.mac),
            compression: Cow::Borrowed(COMPRESSION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_checks_known_hosts() {
        let options = ConnectionSecurityOptions::default();
        assert_eq!(options.level, SecurityLevel::Secure);
        assert!(matches!(
            options.server_check,
            ServerCheckMethod::DefaultKnownHostsFile
        ));
    }

    #[test]
    fn secure_offers_no_sha1_or_cbc() {
        let preferred = ConnectionSecurityOptions::secure_default().preferred();
        assert!(!preferred.kex.contains(&kex::DH_G14_SHA1));
        assert!(!preferred.cipher.contains(&cipher::AES_128_CBC));
        assert!(!preferred.mac.contains(&mac::HMAC_SHA1));
    }

    #[test]
    fn fallbacks_come_after_modern_algorithms() {
        let preferred = ConnectionSecurityOptions::legacy_compatible().preferred();
        assert_eq!(preferred.kex.first(), Some(&kex::CURVE25519));
        assert_eq!(preferred.kex.last(), Some(&kex::DH_G1_SHA1));
        assert!(preferred.key.contains(&Algorithm::Dsa));
        assert!(preferred.mac.contains(&mac::HMAC_SHA1));

        let balanced = ConnectionSecurityOptions::balanced().preferred();
        assert!(!balanced.kex.contains(&kex::DH_G1_SHA1));
        assert!(balanced.cipher.contains(&cipher::AES_256_CBC));
    }
}
