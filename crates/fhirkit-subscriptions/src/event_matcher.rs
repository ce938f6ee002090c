//! Trigger and filter evaluation (spec §4.5): deciding whether a write
//! activates a topic's resource trigger, and whether an active subscription's
//! filters then match the focus resource.

use crate::types::{QueryResultBehavior, ResourceTrigger, SubscriptionFilter};
use fhirkit_core::adapter::{TypedElement, VersionAdapter};
use fhirkit_search::{parse_query, predicate};
use fhirkit_store::registry::ResourceStoreRegistry;
use serde_json::Value;

/// The write kind a Resource Store operation represents, used to pick which
/// of `onCreate`/`onUpdate`/`onDelete` gates the trigger (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

fn gate_passes(trigger: &ResourceTrigger, kind: WriteKind) -> bool {
    match kind {
        WriteKind::Create => trigger.on_create,
        WriteKind::Update => trigger.on_update,
        WriteKind::Delete => trigger.on_delete,
    }
}

/// Evaluates `trigger` against one write. `previous`/`current` are `None`
/// when the write has no such side (create has no previous, delete has no
/// current).
pub fn trigger_fires(
    adapter: &dyn VersionAdapter,
    registry: &ResourceStoreRegistry,
    trigger: &ResourceTrigger,
    kind: WriteKind,
    previous: Option<&Value>,
    current: Option<&Value>,
) -> bool {
    if !gate_passes(trigger, kind) {
        return false;
    }

    if kind == WriteKind::Create {
        if trigger.create_auto_pass {
            return true;
        }
        if trigger.create_auto_fail {
            return false;
        }
    }
    if kind == WriteKind::Delete {
        if trigger.delete_auto_pass {
            return true;
        }
        if trigger.delete_auto_fail {
            return false;
        }
    }

    if let Some(expr) = &trigger.fhir_path_criteria {
        return evaluate_fhirpath_criteria(expr, previous, current);
    }

    if let Some(criteria) = &trigger.query_criteria {
        let previous_ok = match (&criteria.previous, previous) {
            (Some(q), Some(snapshot)) => evaluate_query_criteria(adapter, registry, &trigger.resource_type, q, snapshot),
            (Some(_), None) => matches!(criteria.result_for_create, QueryResultBehavior::TestPasses),
            (None, _) => true,
        };
        let current_ok = match (&criteria.current, current) {
            (Some(q), Some(snapshot)) => evaluate_query_criteria(adapter, registry, &trigger.resource_type, q, snapshot),
            (Some(_), None) => matches!(criteria.result_for_delete, QueryResultBehavior::TestPasses),
            (None, _) => true,
        };
        return if criteria.require_both {
            previous_ok && current_ok
        } else {
            previous_ok || current_ok
        };
    }

    // No criteria at all: the interaction-kind gate alone is the trigger.
    true
}

/// Runs a result-parameter-free query string as a structural predicate
/// against one resource snapshot (not the live store), per spec §4.5:
/// "execute them as type-searches with the focus resource injected as
/// `_id`" — here the snapshot already *is* the focus, so the store lookup
/// that `_id` would otherwise drive is short-circuited.
fn evaluate_query_criteria(
    adapter: &dyn VersionAdapter,
    registry: &ResourceStoreRegistry,
    resource_type: &str,
    query: &str,
    snapshot: &Value,
) -> bool {
    let Ok(parsed) = parse_query(query) else { return false };
    let root = TypedElement::from_value(snapshot.clone());
    let resolver = |rt: &str, id: &str| -> Option<TypedElement> {
        registry
            .get(rt)
            .and_then(|store| store.instance_read(id))
            .map(|stored| adapter.to_typed_element(stored.body))
    };

    parsed.params.iter().all(|param| {
        let Some(store) = registry.get(resource_type) else { return false };
        let Some(def) = store.search_parameter(param.top_level_name()) else {
            return false;
        };
        predicate::evaluate(adapter, &def, param, &root, &resolver)
    })
}

/// A deliberately narrow evaluator for the boolean `%previous`/`%current`
/// expression grammar this server's trigger criteria use: `and`/`or`,
/// parenthesized grouping, `.empty()`, and `<path> (= | !=) 'literal'`. It is
/// not a general FHIRPath engine — only what trigger criteria of this shape
/// need.
fn evaluate_fhirpath_criteria(expr: &str, previous: Option<&Value>, current: Option<&Value>) -> bool {
    let tokens = tokenize(expr);
    let mut parser = CriteriaParser { tokens: &tokens, pos: 0, previous, current };
    parser.parse_or()
}

fn tokenize(expr: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '(' | ')' => {
                tokens.push(c.to_string());
                chars.next();
            }
            '\'' => {
                chars.next();
                let mut s = String::new();
                for ch in chars.by_ref() {
                    if ch == '\'' {
                        break;
                    }
                    s.push(ch);
                }
                tokens.push(format!("'{s}'"));
            }
            '!' | '=' => {
                let mut op = String::new();
                op.push(c);
                chars.next();
                if chars.peek() == Some(&'=') {
                    op.push('=');
                    chars.next();
                }
                tokens.push(op);
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || "()!=".contains(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(word);
            }
        }
    }
    tokens
}

struct CriteriaParser<'a> {
    tokens: &'a [String],
    pos: usize,
    previous: Option<&'a Value>,
    current: Option<&'a Value>,
}

impl<'a> CriteriaParser<'a> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn advance(&mut self) -> Option<&str> {
        let tok = self.tokens.get(self.pos).map(String::as_str);
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> bool {
        let mut result = self.parse_and();
        while self.peek() == Some("or") {
            self.advance();
            let rhs = self.parse_and();
            result = result || rhs;
        }
        result
    }

    fn parse_and(&mut self) -> bool {
        let mut result = self.parse_primary();
        while self.peek() == Some("and") {
            self.advance();
            let rhs = self.parse_primary();
            result = result && rhs;
        }
        result
    }

    fn parse_primary(&mut self) -> bool {
        if self.peek() == Some("(") {
            self.advance();
            let result = self.parse_or();
            if self.peek() == Some(")") {
                self.advance();
            }
            return result;
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> bool {
        let Some(path) = self.advance().map(str::to_string) else { return false };
        let resolved = self.resolve_path(&path);

        if self.peek() == Some("=") || self.peek() == Some("!=") {
            let op = self.advance().unwrap().to_string();
            let literal = self.advance().map(|s| s.trim_matches('\'').to_string()).unwrap_or_default();
            let actual = resolved.and_then(|v| v.as_str().map(str::to_string));
            let equal = actual.as_deref() == Some(literal.as_str());
            return if op == "!=" { !equal } else { equal };
        }

        // Bare `.empty()` was already consumed into `path`'s suffix.
        resolved.is_none()
    }

    fn resolve_path(&self, path: &str) -> Option<Value> {
        let empty_check = path.ends_with(".empty()");
        let trimmed = path.strip_suffix(".empty()").unwrap_or(path);
        let mut segments = trimmed.split('.');
        let root_token = segments.next()?;
        let root = match root_token {
            "%previous" => self.previous,
            "%current" => self.current,
            _ => None,
        };
        let mut current = root.cloned();
        for segment in segments {
            current = current.and_then(|v| v.get(segment).cloned());
        }
        if empty_check {
            // Caller treats a `None` return as "is empty" in `parse_comparison`'s
            // fallthrough; represent non-empty as `Some` regardless of value so
            // `.is_none()` there reads correctly for both absence and presence.
            return if current.is_none() { None } else { Some(Value::Bool(true)) };
        }
        current
    }
}

/// AND across every filter configured for `resourceType` on one subscription
/// (spec §4.5: "AND across filters").
pub fn filters_match(
    adapter: &dyn VersionAdapter,
    registry: &ResourceStoreRegistry,
    resource_type: &str,
    filters: &[SubscriptionFilter],
    focus: &Value,
) -> bool {
    if filters.is_empty() {
        return true;
    }
    let Some(store) = registry.get(resource_type) else { return false };
    let root = TypedElement::from_value(focus.clone());
    let resolver = |rt: &str, id: &str| -> Option<TypedElement> {
        registry
            .get(rt)
            .and_then(|store| store.instance_read(id))
            .map(|stored| adapter.to_typed_element(stored.body))
    };

    filters.iter().all(|filter| {
        let Some(def) = store.search_parameter(&filter.name) else { return false };
        let raw = format!("{}{}={}", filter.name, filter.modifier, filter.value);
        let Ok(parsed) = parse_query(&raw) else { return false };
        let Some(param) = parsed.params.first() else { return false };
        predicate::evaluate(adapter, &def, param, &root, &resolver)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_previous_and_current_finished_fires() {
        let expr = "(%previous.empty() or (%previous.status!='finished')) and (%current.status='finished')";
        assert!(evaluate_fhirpath_criteria(expr, None, Some(&json!({"status": "finished"}))));
    }

    #[test]
    fn planned_to_finished_fires_once() {
        let expr = "(%previous.empty() or (%previous.status!='finished')) and (%current.status='finished')";
        assert!(evaluate_fhirpath_criteria(
            expr,
            Some(&json!({"status": "planned"})),
            Some(&json!({"status": "finished"}))
        ));
    }

    #[test]
    fn finished_to_finished_does_not_refire() {
        let expr = "(%previous.empty() or (%previous.status!='finished')) and (%current.status='finished')";
        assert!(!evaluate_fhirpath_criteria(
            expr,
            Some(&json!({"status": "finished"})),
            Some(&json!({"status": "finished"}))
        ));
    }

    #[test]
    fn delete_of_finished_does_not_fire_since_current_is_absent() {
        let expr = "(%previous.empty() or (%previous.status!='finished')) and (%current.status='finished')";
        assert!(!evaluate_fhirpath_criteria(expr, Some(&json!({"status": "finished"})), None));
    }
}
