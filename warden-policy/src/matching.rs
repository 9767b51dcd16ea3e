//! Glob-style pattern matching for grant principals.

use glob_match::glob_match;
use warden_engine::Principal;

use crate::config::PrincipalConfig;

/// Check if a value matches a pattern.
///
/// Supports glob-style patterns:
/// - `*` matches any sequence of characters
/// - `ops-*` matches `ops-east`, `ops-west`, etc.
/// - Exact strings match exactly.
pub fn matches_pattern(pattern: &str, value: &str) -> bool {
    glob_match(pattern, value)
}

/// Check if a principal matches a grant's principal pattern on both class
/// and name.
pub fn principal_matches(pattern: &PrincipalConfig, principal: &Principal) -> bool {
    matches_pattern(&pattern.class, principal.class())
        && matches_pattern(&pattern.name, principal.name())
}

/// Every pattern must be matched by at least one of `principals`.
pub fn all_principals_match(patterns: &[PrincipalConfig], principals: &[Principal]) -> bool {
    patterns
        .iter()
        .all(|pattern| principals.iter().any(|p| principal_matches(pattern, p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(class: &str, name: &str) -> PrincipalConfig {
        PrincipalConfig {
            class: class.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_exact_match() {
        assert!(matches_pattern("UserPrincipal", "UserPrincipal"));
        assert!(!matches_pattern("UserPrincipal", "GroupPrincipal"));
    }

    #[test]
    fn test_wildcard_match() {
        assert!(matches_pattern("ops-*", "ops-east"));
        assert!(!matches_pattern("ops-*", "dev-east"));
        assert!(matches_pattern("*", "anything"));
    }

    #[test]
    fn test_principal_match() {
        let alice = Principal::new("UserPrincipal", "alice");
        assert!(principal_matches(&pattern("UserPrincipal", "alice"), &alice));
        assert!(principal_matches(&pattern("*", "a*"), &alice));
        assert!(!principal_matches(&pattern("GroupPrincipal", "alice"), &alice));
    }

    #[test]
    fn test_all_principals_match() {
        let principals = vec![
            Principal::new("UserPrincipal", "alice"),
            Principal::new("GroupPrincipal", "ops"),
        ];
        assert!(all_principals_match(&[], &principals));
        assert!(all_principals_match(
            &[pattern("UserPrincipal", "*"), pattern("GroupPrincipal", "ops")],
            &principals
        ));
        assert!(!all_principals_match(&[pattern("GroupPrincipal", "admin")], &principals));
        assert!(!all_principals_match(&[pattern("UserPrincipal", "*")], &[]));
    }
}
