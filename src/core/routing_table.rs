use std::{collections::HashMap, sync::Arc};

use regex::Regex;
use uuid::Uuid;

use crate::core::route::Route;

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Compile a path pattern into an anchored regex: `*` matches any sequence,
/// `?` matches exactly one character, everything else is literal.
fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(ch.encode_utf8(&mut [0u8; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

#[derive(Debug, Clone)]
struct PatternEntry {
    route_id: Uuid,
    /// Uppercase method or "*"
    method: String,
    pattern: String,
    matcher: Regex,
    literal_chars: usize,
    stars: usize,
}

/// Index from `(method, pattern)` to route ids.
///
/// Immutable once built; the hub rebuilds it wholesale whenever a route is
/// added, removed or toggled and swaps the new table in atomically. Lookup
/// tries the exact keys first, then scans wildcard patterns ranked by
/// specificity: more literal characters beat fewer, fewer `*` wildcards beat
/// more, a concrete method beats `*`, and remaining ties order by pattern
/// text so results never depend on map iteration order.
#[derive(Debug, Default)]
pub struct RoutingTable {
    /// Wildcard-free patterns keyed `METHOD:pattern`
    exact: HashMap<String, Uuid>,
    /// Wildcard patterns, most specific first
    ranked: Vec<PatternEntry>,
}

impl RoutingTable {
    /// Build the table from the enabled subset of the given routes
    pub fn build<'a, I>(routes: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Route>>,
    {
        let mut exact = HashMap::new();
        let mut ranked = Vec::new();

        for route in routes {
            if !route.enabled() {
                continue;
            }

            if has_wildcards(&route.pattern) {
                match compile_pattern(&route.pattern) {
                    Ok(matcher) => ranked.push(PatternEntry {
                        route_id: route.id,
                        method: route.method.clone(),
                        pattern: route.pattern.clone(),
                        matcher,
                        literal_chars: route
                            .pattern
                            .chars()
                            .filter(|c| !matches!(c, '*' | '?'))
                            .count(),
                        stars: route.pattern.chars().filter(|c| *c == '*').count(),
                    }),
                    Err(e) => {
                        // Escaping makes compiled patterns valid by construction;
                        // if one slips through, drop it rather than poison the table
                        tracing::error!(
                            route = %route.name,
                            pattern = %route.pattern,
                            error = %e,
                            "Failed to compile route pattern, route unreachable via wildcard scan"
                        );
                    }
                }
            } else {
                exact.insert(format!("{}:{}", route.method, route.pattern), route.id);
            }
        }

        ranked.sort_by(|a, b| {
            b.literal_chars
                .cmp(&a.literal_chars)
                .then_with(|| a.stars.cmp(&b.stars))
                .then_with(|| (a.method == "*").cmp(&(b.method == "*")))
                .then_with(|| a.pattern.cmp(&b.pattern))
                .then_with(|| a.method.cmp(&b.method))
        });

        Self { exact, ranked }
    }

    /// Resolve `(method, path)` to the most specific matching route id
    pub fn lookup(&self, method: &str, path: &str) -> Option<Uuid> {
        let method = method.to_ascii_uppercase();

        if let Some(id) = self.exact.get(&format!("{method}:{path}")) {
            return Some(*id);
        }
        if let Some(id) = self.exact.get(&format!("*:{path}")) {
            return Some(*id);
        }

        self.ranked
            .iter()
            .find(|entry| {
                (entry.method == method || entry.method == "*") && entry.matcher.is_match(path)
            })
            .map(|entry| entry.route_id)
    }

    /// Number of indexed patterns
    pub fn len(&self) -> usize {
        self.exact.len() + self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.ranked.is_empty()
    }
}
