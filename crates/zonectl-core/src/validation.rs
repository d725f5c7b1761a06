// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Syntax rules for identifiers that end up in SPIFFE IDs and Helm values.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ZonectlError;

/// Name of the chart's catch-all ClusterSPIFFEID. No attestation policy may
/// take it.
pub const RESERVED_POLICY_NAME: &str = "default";

/// Maximum length of a trust domain name.
pub const MAX_TRUST_DOMAIN_LEN: usize = 255;

static TRUST_DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._-]+$").unwrap_or_else(|e| panic!("invalid trust domain regex: {e}"))
});

/// Validates a SPIFFE trust domain name (`example.org`, not `spiffe://example.org`).
pub fn validate_trust_domain(trust_domain: &str) -> Result<(), ZonectlError> {
    if trust_domain.is_empty() {
        return Err(ZonectlError::InvalidArgument(
            "trust domain must not be empty".into(),
        ));
    }
    if trust_domain.contains("://") {
        return Err(ZonectlError::InvalidArgument(format!(
            "trust domain {trust_domain} must not include a scheme"
        )));
    }
    if trust_domain.len() > MAX_TRUST_DOMAIN_LEN {
        return Err(ZonectlError::InvalidArgument(format!(
            "trust domain {trust_domain} exceeds {MAX_TRUST_DOMAIN_LEN} characters"
        )));
    }
    if !TRUST_DOMAIN_RE.is_match(trust_domain) {
        return Err(ZonectlError::InvalidArgument(format!(
            "trust domain {trust_domain} contains characters other than lowercase letters, digits, '.', '-' and '_'"
        )));
    }
    if trust_domain.starts_with('.') || trust_domain.ends_with('.') {
        return Err(ZonectlError::InvalidArgument(format!(
            "trust domain {trust_domain} must not start or end with '.'"
        )));
    }
    Ok(())
}

/// Validates an entity name: non-empty, no surrounding whitespace, no path separators.
pub fn validate_name(kind: &str, name: &str) -> Result<(), ZonectlError> {
    if name.trim().is_empty() {
        return Err(ZonectlError::InvalidArgument(format!(
            "{kind} name must not be empty"
        )));
    }
    if name.trim() != name || name.contains('/') {
        return Err(ZonectlError::InvalidArgument(format!(
            "{kind} name `{name}` must not contain whitespace padding or '/'"
        )));
    }
    Ok(())
}

/// Validates an attestation policy name, which also keys a ClusterSPIFFEID.
pub fn validate_policy_name(name: &str) -> Result<(), ZonectlError> {
    validate_name("attestation policy", name)?;
    if name == RESERVED_POLICY_NAME {
        return Err(ZonectlError::InvalidArgument(format!(
            "attestation policy name `{RESERVED_POLICY_NAME}` is reserved for the chart's catch-all identity"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_trust_domains() {
        for td in ["td1", "example.org", "prod-eu_1.example.com"] {
            assert!(validate_trust_domain(td).is_ok(), "{td} should be valid");
        }
    }

    #[test]
    fn rejects_scheme_and_uppercase() {
        assert!(validate_trust_domain("spiffe://example.org").is_err());
        assert!(validate_trust_domain("Example.org").is_err());
        assert!(validate_trust_domain("example.org/path").is_err());
        assert!(validate_trust_domain(".example.org").is_err());
        assert!(validate_trust_domain("").is_err());
    }

    #[test]
    fn rejects_overlong_trust_domain() {
        let td = "a".repeat(MAX_TRUST_DOMAIN_LEN + 1);
        assert!(validate_trust_domain(&td).is_err());
    }

    #[test]
    fn names_must_be_trimmed() {
        assert!(validate_name("trust zone", "tz1").is_ok());
        assert!(validate_name("trust zone", " tz1").is_err());
        assert!(validate_name("trust zone", "").is_err());
        assert!(validate_name("cluster", "a/b").is_err());
    }

    proptest! {
        #[test]
        fn generated_dns_like_domains_are_valid(td in "[a-z0-9]{1,20}(\\.[a-z0-9-]{1,20}){0,3}") {
            prop_assert!(validate_trust_domain(&td).is_ok());
        }

        #[test]
        fn anything_with_uppercase_is_rejected(td in "[a-z]{0,5}[A-Z][a-z]{0,5}") {
            prop_assert!(validate_trust_domain(&td).is_err());
        }
    }

    #[test]
    fn default_policy_name_is_reserved() {
        let err = validate_policy_name(RESERVED_POLICY_NAME).unwrap_err();
        assert!(matches!(err, ZonectlError::InvalidArgument(_)));
        assert!(err.to_string().contains("reserved"));
        assert!(validate_policy_name("Default").is_ok());
        assert!(validate_policy_name("ap1").is_ok());
    }
}
