//! Modifiers and comparators (spec §3, §4.4 Stage A).

use serde::{Deserialize, Serialize};
use std::fmt;

/// `name:modifier` suffixes the Search Engine recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modifier {
    None,
    Missing,
    Exact,
    Contains,
    Text,
    Not,
    In,
    NotIn,
    Above,
    Below,
    Identifier,
    OfType,
    /// `subject:Patient` — restricts a reference parameter's target type.
    ResourceTypeQualifier(String),
}

impl Modifier {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "missing" => Self::Missing,
            "exact" => Self::Exact,
            "contains" => Self::Contains,
            "text" => Self::Text,
            "not" => Self::Not,
            "in" => Self::In,
            "not-in" => Self::NotIn,
            "above" => Self::Above,
            "below" => Self::Below,
            "identifier" => Self::Identifier,
            "ofType" => Self::OfType,
            other => Self::ResourceTypeQualifier(other.to_string()),
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Missing => write!(f, ":missing"),
            Self::Exact => write!(f, ":exact"),
            Self::Contains => write!(f, ":contains"),
            Self::Text => write!(f, ":text"),
            Self::Not => write!(f, ":not"),
            Self::In => write!(f, ":in"),
            Self::NotIn => write!(f, ":not-in"),
            Self::Above => write!(f, ":above"),
            Self::Below => write!(f, ":below"),
            Self::Identifier => write!(f, ":identifier"),
            Self::OfType => write!(f, ":ofType"),
            Self::ResourceTypeQualifier(t) => write!(f, ":{t}"),
        }
    }
}

/// Prefix operators applying to `number`, `date`, and `quantity` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa,
    Eb,
    Ap,
}

impl Comparator {
    pub fn parse(value: &str) -> (Option<Self>, &str) {
        if value.len() >= 2 {
            if let Some(c) = Self::from_code(&value[..2]) {
                return (Some(c), &value[2..]);
            }
        }
        (None, value)
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "sa" => Some(Self::Sa),
            "eb" => Some(Self::Eb),
            "ap" => Some(Self::Ap),
            _ => None,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Le => "le",
            Self::Sa => "sa",
            Self::Eb => "eb",
            Self::Ap => "ap",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modifiers() {
        assert_eq!(Modifier::parse("exact"), Modifier::Exact);
        assert_eq!(Modifier::parse("not-in"), Modifier::NotIn);
    }

    #[test]
    fn unknown_modifier_is_resource_type_qualifier() {
        assert_eq!(Modifier::parse("Patient"), Modifier::ResourceTypeQualifier("Patient".to_string()));
    }

    #[test]
    fn parses_two_letter_comparator() {
        let (cmp, rest) = Comparator::parse("ge185");
        assert_eq!(cmp, Some(Comparator::Ge));
        assert_eq!(rest, "185");
    }

    #[test]
    fn no_comparator_leaves_value_untouched() {
        let (cmp, rest) = Comparator::parse("185");
        assert_eq!(cmp, None);
        assert_eq!(rest, "185");
    }
}
