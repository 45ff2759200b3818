//! Request → tenant routing.
//!
//! # Invariants
//! - Only `Running` tenants are routable.
//! - Exact host beats wildcard host; wildcard host beats the no-host fallback.
//! - Inside one tier the longest matching path prefix wins, then `Default`,
//!   then name order.
//! - A tier with host matches but no prefix match falls through to the next.

use crate::model::tenant::{TenantRecord, TenantState, DEFAULT_TENANT_NAME};
use regex::Regex;

#[derive(Debug, Clone)]
struct Route {
    tenant: String,
    prefix: Option<String>,
}

impl Route {
    fn prefix_len(&self, path: &str) -> Option<usize> {
        match &self.prefix {
            None => Some(0),
            Some(prefix) => {
                let matches = path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'));
                matches.then_some(prefix.len())
            }
        }
    }
}

/// Immutable routing table built from a record snapshot.
#[derive(Debug, Default)]
pub struct TenantRouter {
    exact: Vec<(String, Route)>,
    wildcard: Vec<(Regex, Route)>,
    fallback: Vec<Route>,
}

impl TenantRouter {
    pub fn new<'a>(records: impl IntoIterator<Item = &'a TenantRecord>) -> Self {
        let mut router = Self::default();
        for record in records {
            if record.state() != TenantState::Running {
                continue;
            }
            let route = Route {
                tenant: record.name().to_string(),
                prefix: record.request_prefix().map(|p| p.to_ascii_lowercase()),
            };
            let hosts = record.request_hosts();
            if hosts.is_empty() {
                router.fallback.push(route);
                continue;
            }
            for host in hosts {
                match host.strip_prefix("*.") {
                    Some(suffix) => {
                        let pattern = format!(r"^[^/]+\.{}$", regex::escape(suffix));
                        if let Ok(regex) = Regex::new(&pattern) {
                            router.wildcard.push((regex, route.clone()));
                        }
                    }
                    None => router.exact.push((host, route.clone())),
                }
            }
        }
        router
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty() && self.fallback.is_empty()
    }

    /// Tenant name serving `host` + `path`, if any.
    pub fn match_request(&self, host: &str, path: &str) -> Option<&str> {
        let host = normalize_host(host);
        let path = path.trim_matches('/').to_ascii_lowercase();

        let exact = self
            .exact
            .iter()
            .filter(|(candidate, _)| *candidate == host)
            .map(|(_, route)| route);
        if let Some(route) = best(exact, &path) {
            return Some(route);
        }

        let wildcard = self
            .wildcard
            .iter()
            .filter(|(regex, _)| regex.is_match(&host))
            .map(|(_, route)| route);
        if let Some(route) = best(wildcard, &path) {
            return Some(route);
        }

        best(self.fallback.iter(), &path)
    }
}

fn best<'a>(routes: impl Iterator<Item = &'a Route>, path: &str) -> Option<&'a str> {
    routes
        .filter_map(|route| route.prefix_len(path).map(|len| (len, route)))
        .max_by(|(len_a, a), (len_b, b)| {
            len_a
                .cmp(len_b)
                .then_with(|| is_default(a).cmp(&is_default(b)))
                .then_with(|| b.tenant.cmp(&a.tenant))
        })
        .map(|(_, route)| route.tenant.as_str())
}

fn is_default(route: &Route) -> bool {
    route.tenant.eq_ignore_ascii_case(DEFAULT_TENANT_NAME)
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => host,
    }
}
