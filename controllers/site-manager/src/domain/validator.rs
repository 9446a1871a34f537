//! Tenant scheme validation.
//!
//! Three checkers run in a fixed order against a candidate scheme: URL
//! shape, duplicate hosts inside the candidate, duplicate hosts across the
//! other tenants. A (site, service) pair is valid iff no checker recorded an
//! error for it; the first error sticks.

use crate::domain::{TenantDns, ValidationInfo, ValidationResult};

const HTTP_PROTOCOL: &str = "http://";
const HTTPS_PROTOCOL: &str = "https://";
const MAX_DOMAIN_PARTS: usize = 127;
const MAX_LABEL_LENGTH: usize = 63;

/// One validation rule applied to every address of the candidate scheme.
pub trait SchemeChecker: Send + Sync {
    fn check(&self, candidate: &TenantDns, others: &[TenantDns], result: &mut ValidationResult);
}

/// The fixed checker chain.
pub struct SchemeValidator {
    checkers: Vec<Box<dyn SchemeChecker>>,
}

impl std::fmt::Debug for SchemeValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeValidator")
            .field("checkers", &self.checkers.len())
            .finish()
    }
}

impl SchemeValidator {
    pub fn new() -> Self {
        Self {
            checkers: vec![
                Box::new(UrlChecker),
                Box::new(InTenantDuplicationChecker),
                Box::new(InSchemeDuplicationChecker),
            ],
        }
    }

    pub fn check(
        &self,
        candidate: &TenantDns,
        others: &[TenantDns],
        result: &mut ValidationResult,
    ) {
        for checker in &self.checkers {
            checker.check(candidate, others, result);
        }
    }
}

impl Default for SchemeValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk every (site, service, address) of the candidate, recording the first
/// error per (site, service); a clean pass marks the pair valid once.
fn visit_candidate<F>(candidate: &TenantDns, result: &mut ValidationResult, mut verdict: F)
where
    F: FnMut(&str, &str) -> Result<(), String>,
{
    for (site, services) in &candidate.sites {
        let site_result = result.entry(site.clone()).or_default();
        for (service, addresses) in services {
            for address in addresses {
                match verdict(service, address.as_str()) {
                    Err(reason) => {
                        site_result.insert(
                            service.clone(),
                            ValidationInfo {
                                valid: false,
                                reason,
                            },
                        );
                    }
                    Ok(()) => {
                        site_result.entry(service.clone()).or_insert(ValidationInfo {
                            valid: true,
                            reason: String::new(),
                        });
                    }
                }
            }
        }
    }
}

struct UrlChecker;

impl SchemeChecker for UrlChecker {
    fn check(&self, candidate: &TenantDns, _others: &[TenantDns], result: &mut ValidationResult) {
        visit_candidate(candidate, result, |_service, address| validate_url(address));
    }
}

fn validate_url(address: &str) -> Result<(), String> {
    let with_scheme =
        if address.starts_with(HTTP_PROTOCOL) || address.starts_with(HTTPS_PROTOCOL) {
            address.to_string()
        } else {
            format!("{HTTP_PROTOCOL}{address}")
        };
    let parsed =
        url::Url::parse(&with_scheme).map_err(|_| "Not a valid URL".to_string())?;
    let host = match parsed.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => return Err("Not a valid URL".to_string()),
    };

    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() > MAX_DOMAIN_PARTS {
        return Err("Domain has too many parts".to_string());
    }
    let last = parts.len() - 1;
    for (index, part) in parts.iter().enumerate() {
        if !validate_label(part, index == last) {
            return Err("Not a valid URL".to_string());
        }
    }
    Ok(())
}

fn validate_label(label: &str, is_top_level: bool) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
        return false;
    }
    if !label
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    // the top-level label must not begin with a digit
    !(is_top_level && label.as_bytes()[0].is_ascii_digit())
}

struct InTenantDuplicationChecker;

impl SchemeChecker for InTenantDuplicationChecker {
    fn check(&self, candidate: &TenantDns, _others: &[TenantDns], result: &mut ValidationResult) {
        visit_candidate(candidate, result, |service, address| {
            let wanted = strip_http(address);
            for services in candidate.sites.values() {
                for (other_service, addresses) in services {
                    if other_service == service {
                        continue;
                    }
                    for other_address in addresses {
                        if strip_http(other_address.as_str()) == wanted {
                            return Err(format!(
                                "Matches with another service {other_service} in current tenant"
                            ));
                        }
                    }
                }
            }
            Ok(())
        });
    }
}

struct InSchemeDuplicationChecker;

impl SchemeChecker for InSchemeDuplicationChecker {
    fn check(&self, candidate: &TenantDns, others: &[TenantDns], result: &mut ValidationResult) {
        visit_candidate(candidate, result, |service, address| {
            let wanted = strip_protocol(address);
            for tenant in others {
                if tenant.tenant_id == candidate.tenant_id {
                    continue;
                }
                for services in tenant.sites.values() {
                    for (other_service, addresses) in services {
                        if other_service == service {
                            continue;
                        }
                        if addresses.iter().any(|a| a.as_str() == wanted) {
                            return Err(format!(
                                "Matches with url for service {other_service} in tenant {}",
                                tenant.tenant_id
                            ));
                        }
                    }
                }
            }
            Ok(())
        });
    }
}

fn strip_http(address: &str) -> &str {
    address.strip_prefix(HTTP_PROTOCOL).unwrap_or(address)
}

fn strip_protocol(address: &str) -> &str {
    address
        .strip_prefix(HTTP_PROTOCOL)
        .or_else(|| address.strip_prefix(HTTPS_PROTOCOL))
        .unwrap_or(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Services, DEFAULT_SITE};

    fn tenant(id: &str, entries: &[(&str, &[&str])]) -> TenantDns {
        let mut services = Services::new();
        for (service, addresses) in entries {
            services.insert(
                (*service).to_string(),
                addresses.iter().map(|a| Address::new(*a)).collect(),
            );
        }
        let mut tenant = TenantDns {
            tenant_id: id.to_string(),
            ..TenantDns::default()
        };
        tenant.sites.insert(DEFAULT_SITE.to_string(), services);
        tenant
    }

    fn run(candidate: &TenantDns, others: &[TenantDns]) -> ValidationResult {
        let mut result = ValidationResult::new();
        SchemeValidator::new().check(candidate, others, &mut result);
        result
    }

    #[test]
    fn clean_scheme_is_valid() {
        let candidate = tenant("T1", &[("svc", &["shop.example.org", "www.shop.example.org"])]);
        let result = run(&candidate, &[]);
        assert!(result[DEFAULT_SITE]["svc"].valid);
        assert!(result[DEFAULT_SITE]["svc"].reason.is_empty());
    }

    #[test]
    fn url_checker_rejects_bad_labels() {
        for bad in [
            "-leading.example.org",
            "trailing-.example.org",
            "shop.example.1org",
            "http://",
            &format!("{}.example.org", "a".repeat(64)),
        ] {
            let candidate = tenant("T1", &[("svc", &[bad])]);
            let result = run(&candidate, &[]);
            assert!(!result[DEFAULT_SITE]["svc"].valid, "expected {bad} to fail");
            assert_eq!(result[DEFAULT_SITE]["svc"].reason, "Not a valid URL");
        }
    }

    #[test]
    fn url_checker_rejects_too_many_labels() {
        let host = vec!["a"; 128].join(".") + ".org";
        let candidate = tenant("T1", &[("svc", &[host.as_str()])]);
        let result = run(&candidate, &[]);
        assert_eq!(
            result[DEFAULT_SITE]["svc"].reason,
            "Domain has too many parts"
        );
    }

    #[test]
    fn duplicate_host_within_tenant_is_rejected() {
        let candidate = tenant(
            "T1",
            &[
                ("svc-a", &["h.example.org"]),
                ("svc-b", &["http://h.example.org"]),
            ],
        );
        let result = run(&candidate, &[]);
        assert!(!result[DEFAULT_SITE]["svc-a"].valid);
        assert!(!result[DEFAULT_SITE]["svc-b"].valid);
        assert!(result[DEFAULT_SITE]["svc-a"]
            .reason
            .contains("in current tenant"));
    }

    #[test]
    fn collision_with_other_tenant_is_rejected() {
        let existing = tenant("T1", &[("svcX", &["h.example.org"])]);
        let candidate = tenant("T2", &[("svcY", &["h.example.org"])]);
        let result = run(&candidate, &[existing]);

        let info = &result[DEFAULT_SITE]["svcY"];
        assert!(!info.valid);
        assert_eq!(
            info.reason,
            "Matches with url for service svcX in tenant T1"
        );
    }

    #[test]
    fn same_tenant_rows_are_ignored_by_cross_check() {
        let stored = tenant("T1", &[("svcX", &["h.example.org"])]);
        let candidate = tenant("T1", &[("svcY", &["other.example.org"])]);
        let result = run(&candidate, &[stored]);
        assert!(result[DEFAULT_SITE]["svcY"].valid);
    }

    #[test]
    fn duplicate_flip_leaves_other_services_untouched() {
        let existing = tenant("T1", &[("svcX", &["h.example.org"])]);
        let candidate = tenant(
            "T2",
            &[("svcY", &["h.example.org"]), ("svcZ", &["z.example.org"])],
        );
        let result = run(&candidate, &[existing]);
        assert!(!result[DEFAULT_SITE]["svcY"].valid);
        assert!(result[DEFAULT_SITE]["svcZ"].valid);
    }
}
