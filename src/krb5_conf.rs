//! Minimal reader for MIT `krb5.conf` profiles.
//!
//! Only the relations needed to pick a realm and its KDCs are kept: every relation is
//! stored under a `section|group|name` path and looked up case-insensitively.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_KRB5_CONF_PATHS: &str = "/etc/krb5.conf:/usr/local/etc/krb5.conf";

fn is_comment_or_empty(line: &str) -> bool {
    matches!(line.chars().next(), None | Some('#') | Some(';'))
}

fn section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')).map(str::trim)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Krb5Conf {
    relations: Vec<(String, String)>,
}

impl Krb5Conf {
    pub fn parse(data: &str) -> Self {
        let mut relations = Vec::new();
        let mut section = String::new();
        let mut groups: Vec<String> = Vec::new();

        for line in data.lines().map(str::trim) {
            if is_comment_or_empty(line) {
                continue;
            }

            if let Some(name) = section_name(line) {
                section = name.to_owned();
                groups.clear();
                continue;
            }

            if line.starts_with('}') {
                groups.pop();
                continue;
            }

            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());

            if value == "{" {
                groups.push(name.to_owned());
                continue;
            }

            let mut path = vec![section.as_str()];
            path.extend(groups.iter().map(String::as_str));
            path.push(name);

            relations.push((path.join("|"), value.to_owned()));
        }

        Self { relations }
    }

    pub fn from_file(path: &Path) -> Option<Self> {
        fs::read_to_string(path).ok().map(|data| Self::parse(&data))
    }

    /// Loads the first readable profile from `explicit`, then `KRB5_CONFIG`, then the
    /// system locations.
    pub fn load(explicit: Option<&Path>) -> Option<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let paths = env::var("KRB5_CONFIG").unwrap_or_else(|_| DEFAULT_KRB5_CONF_PATHS.to_owned());

        paths
            .split(':')
            .map(PathBuf::from)
            .filter(|path| path.exists())
            .find_map(|path| Self::from_file(&path))
    }

    pub fn get_value(&self, path: &[&str]) -> Option<&str> {
        self.get_values(path).into_iter().next()
    }

    /// All values of a possibly repeated relation, in file order.
    pub fn get_values(&self, path: &[&str]) -> Vec<&str> {
        let path = path.join("|");

        self.relations
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(&path))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// `(name, value)` pairs directly under `section`.
    pub fn get_values_in_section(&self, section: &str) -> Vec<(&str, &str)> {
        let prefix = format!("{}|", section.to_ascii_lowercase());

        self.relations
            .iter()
            .filter(|(key, _)| key.to_ascii_lowercase().starts_with(&prefix))
            .map(|(key, value)| (&key[prefix.len()..], value.as_str()))
            .collect()
    }

    pub fn default_realm(&self) -> Option<&str> {
        self.get_value(&["libdefaults", "default_realm"])
    }

    pub fn kdcs(&self, realm: &str) -> Vec<&str> {
        self.get_values(&["realms", realm, "kdc"])
    }

    /// Realm of `host` per the `[domain_realm]` mappings, first match wins.
    pub fn realm_for_host(&self, host: &str) -> Option<&str> {
        self.get_values_in_section("domain_realm")
            .into_iter()
            .find(|(mapping, _)| matches_domain(host, mapping))
            .map(|(_, realm)| realm)
    }
}

/// Checks if `domain` matches a `[domain_realm]` mapping.
///
/// A mapping that starts with a dot (`.example.com`) matches hosts under the domain but
/// not the domain itself. A mapping without the dot also matches the domain itself.
pub fn matches_domain(domain: &str, mapping_domain: &str) -> bool {
    let domain = domain.to_lowercase();
    let mapping_domain = mapping_domain.to_lowercase();

    if mapping_domain.starts_with('.') {
        domain.ends_with(&mapping_domain)
    } else {
        domain == mapping_domain || domain.ends_with(&format!(".{}", mapping_domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KRB5_CONF: &str = "
[libdefaults]
	default_realm = AD.IT-HELP.NINJA
	udp_preference_limit = 1
	forwardable = true

[realms]
	AD.IT-HELP.NINJA = {
		kdc = IT-HELP-DC.ad.it-help.ninja:88
		kdc = IT-HELP-DC2.ad.it-help.ninja:88
		admin_server = IT-HELP-DC.ad.it-help.ninja:88
		default_domain = ad.it-help.ninja
	}

[domain_realm]
	.ad.it-help.ninja = AD.IT-HELP.NINJA
	contoso.com = CONTOSO.COM
";

    #[test]
    fn parses_sections_and_groups() {
        let conf = Krb5Conf::parse(KRB5_CONF);

        assert_eq!(conf.default_realm(), Some("AD.IT-HELP.NINJA"));
        assert_eq!(
            conf.get_value(&["realms", "ad.it-help.ninja", "default_domain"]),
            Some("ad.it-help.ninja")
        );
        assert_eq!(
            conf.kdcs("AD.IT-HELP.NINJA"),
            vec!["IT-HELP-DC.ad.it-help.ninja:88", "IT-HELP-DC2.ad.it-help.ninja:88"]
        );
    }

    #[test]
    fn domain_realm_mapping() {
        let conf = Krb5Conf::parse(KRB5_CONF);

        assert_eq!(conf.realm_for_host("dc01.ad.it-help.ninja"), Some("AD.IT-HELP.NINJA"));
        assert_eq!(conf.realm_for_host("contoso.com"), Some("CONTOSO.COM"));
        assert_eq!(conf.realm_for_host("ad.it-help.ninja"), None);
    }

    #[test]
    fn test_matches_domain() {
        assert!(matches_domain("test.example.com", ".example.com"));
        assert!(!matches_domain("example.com", ".example.com"));
        assert!(matches_domain("example.com", "example.com"));
        assert!(matches_domain("d1.EXAMPLE.com", "example.com"));
        assert!(!matches_domain("badexample.com", "example.com"));
    }
}
