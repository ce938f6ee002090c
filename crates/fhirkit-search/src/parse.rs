//! Stage A — parse (spec §4.4). Turns a raw query string into typed search
//! parameters (with chain segments) and the separate result-parameter
//! bundle (`_include`, `_revinclude`, `_sort`, `_count`, `_summary`,
//! `_total`, `_elements`).

use crate::modifier::{Comparator, Modifier};
use fhirkit_core::error::{CoreError, Result};
use url::form_urlencoded;

/// One `name[:modifier]` hop. A chained parameter (`subject.name=peter`) is
/// represented as more than one segment; the last segment carries the
/// modifier that applies to the leaf predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSegment {
    pub name: String,
    pub modifier: Modifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedValue {
    pub comparator: Option<Comparator>,
    pub raw: String,
}

/// A fully parsed search parameter, possibly a reference chain (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSearchParameter {
    pub segments: Vec<ChainSegment>,
    pub values: Vec<ParsedValue>,
    pub raw: String,
}

impl ParsedSearchParameter {
    pub fn is_chained(&self) -> bool {
        self.segments.len() > 1
    }

    pub fn top_level_name(&self) -> &str {
        &self.segments[0].name
    }

    pub fn leaf_modifier(&self) -> &Modifier {
        &self.segments.last().expect("at least one segment").modifier
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeSpec {
    pub source_type: String,
    pub param: String,
    pub target_type: Option<String>,
}

impl IncludeSpec {
    /// Parses the `SourceType:param[:TargetType]` shape shared by
    /// `_include`/`_revinclude` query values and `SubscriptionTopic`
    /// notification shapes.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        let source_type = parts.next()?.to_string();
        let param = parts.next()?.to_string();
        let target_type = parts.next().map(str::to_string);
        Some(Self { source_type, param, target_type })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub param: String,
    pub descending: bool,
}

/// The `_include`/`_revinclude`/`_sort`/`_count`/`_summary`/`_total`/
/// `_elements` result parameters (spec §3, "Parsed Result Parameter").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultParams {
    pub includes: Vec<IncludeSpec>,
    pub revincludes: Vec<IncludeSpec>,
    pub sort: Vec<SortSpec>,
    pub count: Option<usize>,
    pub summary: bool,
    pub total: Option<String>,
    pub elements: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub params: Vec<ParsedSearchParameter>,
    pub result: ResultParams,
}

/// Parses a query string (no leading `?`) per spec §4.4 Stage A. Multi-value
/// OR is comma; multi-parameter AND is repeated keys.
pub fn parse_query(query: &str) -> Result<ParsedQuery> {
    let mut out = ParsedQuery::default();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "_include" => {
                let spec = IncludeSpec::parse(&value)
                    .ok_or_else(|| CoreError::parse(format!("malformed _include: {value}")))?;
                out.result.includes.push(spec);
                continue;
            }
            "_revinclude" => {
                let spec = IncludeSpec::parse(&value)
                    .ok_or_else(|| CoreError::parse(format!("malformed _revinclude: {value}")))?;
                out.result.revincludes.push(spec);
                continue;
            }
            "_sort" => {
                for field in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let (descending, param) = match field.strip_prefix('-') {
                        Some(rest) => (true, rest),
                        None => (false, field),
                    };
                    out.result.sort.push(SortSpec {
                        param: param.to_string(),
                        descending,
                    });
                }
                continue;
            }
            "_count" => {
                out.result.count = value.parse::<usize>().ok();
                continue;
            }
            "_summary" => {
                out.result.summary = value == "true";
                continue;
            }
            "_total" => {
                out.result.total = Some(value.to_string());
                continue;
            }
            "_elements" => {
                out.result.elements = value.split(',').map(str::to_string).collect();
                continue;
            }
            "_format" | "_pretty" => continue,
            _ => {}
        }

        let segments: Vec<ChainSegment> = key
            .split('.')
            .map(|raw_segment| {
                if let Some((name, modifier_raw)) = raw_segment.split_once(':') {
                    ChainSegment {
                        name: name.to_string(),
                        modifier: Modifier::parse(modifier_raw),
                    }
                } else {
                    ChainSegment {
                        name: raw_segment.to_string(),
                        modifier: Modifier::None,
                    }
                }
            })
            .collect();

        let mut values = Vec::new();
        for raw_value in value.split(',') {
            if raw_value.is_empty() {
                continue;
            }
            let (comparator, remainder) = Comparator::parse(raw_value);
            values.push(ParsedValue {
                comparator,
                raw: remainder.to_string(),
            });
        }

        out.params.push(ParsedSearchParameter {
            segments,
            values,
            raw: format!("{key}={value}"),
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_param() {
        let query = parse_query("gender=male").unwrap();
        assert_eq!(query.params.len(), 1);
        assert_eq!(query.params[0].top_level_name(), "gender");
        assert_eq!(query.params[0].values[0].raw, "male");
    }

    #[test]
    fn comma_is_or_within_one_param() {
        let query = parse_query("gender=male,female").unwrap();
        assert_eq!(query.params.len(), 1);
        assert_eq!(query.params[0].values.len(), 2);
    }

    #[test]
    fn repeated_keys_are_and() {
        let query = parse_query("gender=male&name=peter").unwrap();
        assert_eq!(query.params.len(), 2);
    }

    #[test]
    fn parses_modifier() {
        let query = parse_query("name:exact=Peter").unwrap();
        assert_eq!(*query.params[0].leaf_modifier(), Modifier::Exact);
    }

    #[test]
    fn parses_chain_with_type_qualifier() {
        let query = parse_query("subject:Patient.name=peter").unwrap();
        let p = &query.params[0];
        assert!(p.is_chained());
        assert_eq!(p.segments[0].name, "subject");
        assert_eq!(p.segments[0].modifier, Modifier::ResourceTypeQualifier("Patient".to_string()));
        assert_eq!(p.segments[1].name, "name");
    }

    #[test]
    fn parses_comparator_prefix() {
        let query = parse_query("value-quantity=ge185").unwrap();
        assert_eq!(query.params[0].values[0].comparator, Some(Comparator::Ge));
        assert_eq!(query.params[0].values[0].raw, "185");
    }

    #[test]
    fn parses_include_and_revinclude() {
        let query = parse_query("_revinclude=Observation:patient&_include=Patient:organization:Organization").unwrap();
        assert_eq!(query.result.revincludes[0].source_type, "Observation");
        assert_eq!(query.result.revincludes[0].param, "patient");
        assert_eq!(query.result.includes[0].target_type.as_deref(), Some("Organization"));
    }

    #[test]
    fn parses_sort_with_descending() {
        let query = parse_query("_sort=-_lastUpdated,name").unwrap();
        assert!(query.result.sort[0].descending);
        assert_eq!(query.result.sort[0].param, "_lastUpdated");
        assert!(!query.result.sort[1].descending);
    }
}
