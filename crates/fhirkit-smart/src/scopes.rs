//! SMART v2 scope parsing (spec §4.8): `context/ResourceType.permissions`
//! tokens plus the bare `launch`, `openid`, `fhirUser`, `offline_access`,
//! `online_access` scopes. Permission letters follow the canonical
//! `c < r < u < d < s` order; `*` stands in for "all of cruds" at either
//! the resource-type or the permission position.

use std::fmt;
use std::str::FromStr;

use crate::error::SmartError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeContext {
    Patient,
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
    pub search: bool,
}

impl Permissions {
    #[must_use]
    pub fn full() -> Self {
        Self { create: true, read: true, update: true, delete: true, search: true }
    }

    #[must_use]
    pub fn has(&self, perm: char) -> bool {
        match perm {
            'c' => self.create,
            'r' => self.read,
            'u' => self.update,
            'd' => self.delete,
            's' => self.search,
            _ => false,
        }
    }
}

impl FromStr for Permissions {
    type Err = SmartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::full());
        }
        let mut perms = Self::default();
        let mut last_order = 0u8;
        for c in s.chars() {
            let order = match c {
                'c' => 1,
                'r' => 2,
                'u' => 3,
                'd' => 4,
                's' => 5,
                other => return Err(SmartError::InvalidScope(format!("unknown permission letter '{other}'"))),
            };
            if order <= last_order {
                return Err(SmartError::InvalidScope(format!("permissions must be in order c<r<u<d<s, got '{s}'")));
            }
            match c {
                'c' => perms.create = true,
                'r' => perms.read = true,
                'u' => perms.update = true,
                'd' => perms.delete = true,
                's' => perms.search = true,
                _ => unreachable!(),
            }
            last_order = order;
        }
        Ok(perms)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.create && self.read && self.update && self.delete && self.search {
            return write!(f, "*");
        }
        if self.create {
            write!(f, "c")?;
        }
        if self.read {
            write!(f, "r")?;
        }
        if self.update {
            write!(f, "u")?;
        }
        if self.delete {
            write!(f, "d")?;
        }
        if self.search {
            write!(f, "s")?;
        }
        Ok(())
    }
}

/// The resource-type half of a granted scope, stripped of its context
/// (the context is tracked separately as which set — patient or user — the
/// scope landed in).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopedResourceType {
    Any,
    Specific(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub resource_type: ScopedResourceType,
    pub permissions: Permissions,
}

impl ResourceScope {
    /// Parses `ResourceType.permissions`, e.g. `Observation.rs`, `*.*`, `Patient.c`.
    pub fn parse(s: &str) -> Result<Self, SmartError> {
        let (rt, perms) = s.split_once('.').ok_or_else(|| SmartError::InvalidScope(format!("expected 'ResourceType.permissions', got '{s}'")))?;
        let resource_type = if rt == "*" { ScopedResourceType::Any } else { ScopedResourceType::Specific(rt.to_string()) };
        Ok(Self { resource_type, permissions: Permissions::from_str(perms)? })
    }

    /// Whether this grant covers `perm` for `resource_type` (`None` means a
    /// system-level interaction with no resource type to narrow against).
    #[must_use]
    pub fn grants(&self, resource_type: Option<&str>, perm: char) -> bool {
        let type_matches = match (&self.resource_type, resource_type) {
            (ScopedResourceType::Any, _) => true,
            (ScopedResourceType::Specific(t), Some(rt)) => t == rt,
            (ScopedResourceType::Specific(_), None) => false,
        };
        type_matches && self.permissions.has(perm)
    }
}

/// One token out of a space-separated SMART scope string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeToken {
    Launch,
    LaunchPatient,
    LaunchEncounter,
    OpenId,
    FhirUser,
    OfflineAccess,
    OnlineAccess,
    Resource(ScopeContext, ResourceScope),
}

/// Parses a full requested/granted scope string. Unknown tokens are
/// silently dropped, matching SMART's forward-compatible scope handling.
pub fn parse_scope_string(scope_string: &str) -> Vec<ScopeToken> {
    scope_string
        .split_whitespace()
        .filter_map(|token| match token {
            "launch" => Some(ScopeToken::Launch),
            "launch/patient" => Some(ScopeToken::LaunchPatient),
            "launch/encounter" => Some(ScopeToken::LaunchEncounter),
            "openid" => Some(ScopeToken::OpenId),
            "fhirUser" => Some(ScopeToken::FhirUser),
            "offline_access" => Some(ScopeToken::OfflineAccess),
            "online_access" => Some(ScopeToken::OnlineAccess),
            other => {
                let (context, rest) = other.split_once('/')?;
                let context = match context {
                    "patient" => ScopeContext::Patient,
                    "user" => ScopeContext::User,
                    "system" => ScopeContext::System,
                    _ => return None,
                };
                ResourceScope::parse(rest).ok().map(|rs| ScopeToken::Resource(context, rs))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cruds_in_order() {
        let perms = Permissions::from_str("crus").unwrap();
        assert!(perms.create && perms.read && perms.update && !perms.delete && !perms.search);
    }

    #[test]
    fn rejects_out_of_order_permissions() {
        assert!(Permissions::from_str("rc").is_err());
    }

    #[test]
    fn star_permission_means_full() {
        assert_eq!(Permissions::from_str("*").unwrap(), Permissions::full());
    }

    #[test]
    fn resource_scope_wildcard_type_and_perm_grants_everything() {
        let scope = ResourceScope::parse("*.*").unwrap();
        assert!(scope.grants(Some("Patient"), 'c'));
        assert!(scope.grants(None, 'd'));
    }

    #[test]
    fn resource_scope_specific_type_create_only() {
        let scope = ResourceScope::parse("Patient.c").unwrap();
        assert!(scope.grants(Some("Patient"), 'c'));
        assert!(!scope.grants(Some("Patient"), 'r'));
        assert!(!scope.grants(Some("Observation"), 'c'));
    }

    #[test]
    fn parses_full_scope_string() {
        let tokens = parse_scope_string("launch openid fhirUser patient/Observation.rs offline_access");
        assert!(tokens.contains(&ScopeToken::Launch));
        assert!(tokens.contains(&ScopeToken::OpenId));
        assert!(tokens.contains(&ScopeToken::FhirUser));
        assert!(tokens.contains(&ScopeToken::OfflineAccess));
        assert!(tokens.iter().any(|t| matches!(t, ScopeToken::Resource(ScopeContext::Patient, _))));
    }

    #[test]
    fn unknown_tokens_are_dropped() {
        let tokens = parse_scope_string("launch not-a-real-scope openid");
        assert_eq!(tokens.len(), 2);
    }
}
