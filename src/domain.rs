//! Primary-domain derivation for crawl scoping.

use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::error::EngineError;

/// Derives the registrable domain of a host.
///
/// Keeps the last two labels, or the last three when the top label is one of
/// `three_label_tlds` (by default only `cn`, so `news.sina.com.cn` resolves
/// to `sina.com.cn`). This is a heuristic, not a public-suffix lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainPolicy {
    three_label_tlds: BTreeSet<String>,
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Self::new(["cn"])
    }
}

impl DomainPolicy {
    pub fn new<I, S>(three_label_tlds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            three_label_tlds: three_label_tlds
                .into_iter()
                .map(|tld| tld.as_ref().trim_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn primary_domain(&self, host: &str) -> Result<String, EngineError> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.parse::<IpAddr>().is_ok() || host.starts_with('[') {
            return Err(EngineError::InvalidHost(host));
        }

        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
            return Err(EngineError::InvalidHost(host));
        }

        let top = labels[labels.len() - 1];
        let keep = if self.three_label_tlds.contains(top) && labels.len() >= 3 {
            3
        } else {
            2
        };
        Ok(labels[labels.len() - keep..].join("."))
    }
}
