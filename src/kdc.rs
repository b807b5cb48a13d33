//! KDC address discovery.

use std::env;
use std::path::Path;
use std::str::FromStr;

use url::Url;

use crate::krb5_conf::Krb5Conf;

/// Overrides the KDC for every realm.
pub const KDC_URL_ENV: &str = "MSRPC_KDC_URL";

/// Normalizes `host[:port]` or a full URL into a KDC URL, TCP by default.
pub fn parse_kdc_url(kdc: &str) -> Option<Url> {
    let kdc = kdc.trim();
    if kdc.is_empty() {
        return None;
    }

    if kdc.contains("://") {
        Url::from_str(kdc).ok()
    } else {
        Url::from_str(&format!("tcp://{}", kdc)).ok()
    }
}

/// Candidate KDC URLs for `realm`, most specific source first: the per-realm and
/// global environment variables, then `krb5.conf`.
pub fn detect_kdc_urls(realm: &str, krb5_conf_path: Option<&Path>) -> Vec<Url> {
    let per_realm = format!("{}_{}", KDC_URL_ENV, realm.to_uppercase());
    for var in [per_realm.as_str(), KDC_URL_ENV] {
        if let Some(url) = env::var(var).ok().as_deref().and_then(parse_kdc_url) {
            return vec![url];
        }
    }

    let Some(conf) = Krb5Conf::load(krb5_conf_path) else {
        return Vec::new();
    };

    let mut kdcs = conf.kdcs(realm);
    if kdcs.is_empty() {
        // the realm section may be keyed by the lowercase name
        kdcs = conf.kdcs(&realm.to_lowercase());
    }

    kdcs.into_iter().filter_map(parse_kdc_url).collect()
}

pub fn detect_kdc_url(realm: &str, krb5_conf_path: Option<&Path>) -> Option<Url> {
    let url = detect_kdc_urls(realm, krb5_conf_path).into_iter().next();
    debug!(realm, ?url, "KDC detection");

    url
}
