use std::borrow::Cow;

use async_ssh2_tokio::ServerCheckMethod;
use russh::Preferred;
use serde::{Deserialize, Serialize};

use crate::algorithms;

/// Security level used for SSH algorithm selection on the root hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Strict modern algorithms.
    Secure,
    /// Modern algorithms plus SHA-1 MACs and CBC ciphers.
    #[default]
    Balanced,
    /// Maximum compatibility with legacy jumpboxes.
    Legacy,
}

/// Connection security options for the root hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    /// SSH algorithm policy.
    pub level: SecurityLevel,
    /// Server host key verification method.
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    /// Balanced algorithms and no host key check. Later hops are reached with
    /// `StrictHostKeyChecking no` anyway, the root follows the same policy
    /// unless [`strict`](Self::strict) is used.
    fn default() -> Self {
        Self::new(SecurityLevel::Balanced, false)
    }
}

impl ConnectionSecurityOptions {
    pub fn new(level: SecurityLevel, strict_host_keys: bool) -> Self {
        let server_check = if strict_host_keys {
            ServerCheckMethod::DefaultKnownHostsFile
        } else {
            ServerCheckMethod::NoCheck
        };
        Self {
            level,
            server_check,
        }
    }

    /// Secure algorithms, host key checked against `~/.ssh/known_hosts`.
    pub fn strict() -> Self {
        Self::new(SecurityLevel::Secure, true)
    }

    pub(super) fn preferred(&self) -> Preferred {
        match self.level {
            SecurityLevel::Secure => Preferred {
                kex: Cow::Borrowed(algorithms::SECURE_KEX_ORDER),
                key: Cow::Borrowed(algorithms::SECURE_KEY_TYPES),
                cipher: Cow::Borrowed(algorithms::SECURE_CIPHERS),
                mac: Cow::Borrowed(algorithms::SECURE_MAC_ALGORITHMS),
                compression: Cow::Borrowed(algorithms::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Balanced => Preferred {
                kex: Cow::Borrowed(algorithms::BALANCED_KEX_ORDER),
                key: Cow::Borrowed(algorithms::BALANCED_KEY_TYPES),
                cipher: Cow::Borrowed(algorithms::BALANCED_CIPHERS),
                mac: Cow::Borrowed(algorithms::BALANCED_MAC_ALGORITHMS),
                compression: Cow::Borrowed(algorithms::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Legacy => Preferred {
                kex: Cow::Borrowed(algorithms::LEGACY_KEX_ORDER),
                key: Cow::Borrowed(algorithms::LEGACY_KEY_TYPES),
                cipher: Cow::Borrowed(algorithms::LEGACY_CIPHERS),
                mac: Cow::Borrowed(algorithms::LEGACY_MAC_ALGORITHMS),
                compression: Cow::Borrowed(algorithms::DEFAULT_COMPRESSION_ALGORITHMS),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionSecurityOptions, SecurityLevel};
    use async_ssh2_tokio::ServerCheckMethod;
    use russh::{cipher, kex, mac};

    #[test]
    fn default_options_skip_host_key_check() {
        let options = ConnectionSecurityOptions::default();
        assert_eq!(options.level, SecurityLevel::Balanced);
        assert!(matches!(options.server_check, ServerCheckMethod::NoCheck));
    }

    #[test]
    fn strict_options_use_known_hosts() {
        let options = ConnectionSecurityOptions::strict();
        assert_eq!(options.level, SecurityLevel::Secure);
        assert!(matches!(
            options.server_check,
            ServerCheckMethod::DefaultKnownHostsFile
        ));
    }

    #[test]
    fn secure_profile_excludes_weak_algorithms() {
        let preferred = ConnectionSecurityOptions::strict().preferred();

        assert!(preferred.kex.iter().all(|alg| *alg != kex::DH_G1_SHA1));
        assert!(preferred.cipher.iter().all(|alg| *alg != cipher::AES_128_CBC));
        assert!(preferred.mac.iter().all(|alg| *alg != mac::HMAC_SHA1));
    }

    #[test]
    fn legacy_profile_keeps_sha1_key_exchange() {
        let preferred = ConnectionSecurityOptions::new(SecurityLevel::Legacy, false).preferred();

        assert!(preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(preferred.mac.contains(&mac::HMAC_SHA1));
    }
}
