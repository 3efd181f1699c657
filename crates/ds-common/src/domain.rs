//! Domain handling: normalization, base-domain derivation, input loading.
//!
//! Domains arrive either as a literal on the command line or as the first
//! column of a CSV file. Every domain is normalized before use, and each
//! carries a derived base (registrable) domain that is emitted alongside it
//! in every result row.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from domain input handling.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("failed to read domains file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Suffixes that are public registries one label deeper than their TLD.
///
/// Not a full public-suffix dataset; covers the registries that show up in
/// government and corporate domain inventories.
const TWO_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "gov.uk", "ac.uk", "ltd.uk", "plc.uk", "com.au", "net.au", "org.au",
    "gov.au", "edu.au", "co.nz", "govt.nz", "co.jp", "go.jp", "ne.jp", "or.jp", "com.br",
    "gov.br", "com.mx", "gob.mx", "co.in", "gov.in", "co.za", "gov.za", "com.sg", "gov.sg",
];

/// Normalize a raw domain string.
///
/// Lowercases, trims whitespace, strips any URL scheme, path remainder,
/// leading `www.`, and a trailing dot.
pub fn normalize_domain(raw: &str) -> String {
    let mut s = raw.trim().to_ascii_lowercase();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest.to_string();
            break;
        }
    }
    if let Some(idx) = s.find('/') {
        s.truncate(idx);
    }
    if let Some(rest) = s.strip_prefix("www.") {
        s = rest.to_string();
    }
    s.trim_end_matches('.').to_string()
}

/// Derive the registrable base domain of an already-normalized domain.
///
/// Keeps one label past the public suffix: two labels normally, three when
/// the suffix itself spans two labels (`co.uk` and friends). Inputs with a
/// single label are returned unchanged.
pub fn base_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    labels[labels.len() - keep.min(labels.len())..].join(".")
}

/// Load the domain list for a run.
///
/// `input` is either a path to a CSV file (first column, optional `Domain`
/// header row) or a literal domain string. An optional suffix filter
/// restricts the stream to matching domains.
pub fn load_domains(input: &str, suffix: Option<&str>) -> Result<Vec<String>, DomainError> {
    let path = Path::new(input);
    let mut domains = if path.is_file() {
        let content = fs::read_to_string(path).map_err(|source| DomainError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut out = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let first = line.split(',').next().unwrap_or("").trim();
            if first.is_empty() {
                continue;
            }
            if i == 0 && first.eq_ignore_ascii_case("domain") {
                continue;
            }
            out.push(normalize_domain(first));
        }
        out
    } else {
        vec![normalize_domain(input)]
    };

    if let Some(sfx) = suffix {
        let sfx = sfx.trim_start_matches('.').to_ascii_lowercase();
        domains.retain(|d| d == &sfx || d.ends_with(&format!(".{sfx}")));
    }
    domains.retain(|d| !d.is_empty());
    Ok(domains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn normalize_strips_scheme_www_and_path() {
        assert_eq!(normalize_domain("https://WWW.Example.com/path"), "example.com");
        assert_eq!(normalize_domain("example.com."), "example.com");
        assert_eq!(normalize_domain("  sub.example.com  "), "sub.example.com");
    }

    #[test]
    fn base_domain_two_labels() {
        assert_eq!(base_domain("example.com"), "example.com");
        assert_eq!(base_domain("a.b.example.com"), "example.com");
    }

    #[test]
    fn base_domain_two_label_suffix() {
        assert_eq!(base_domain("portal.service.gov.uk"), "service.gov.uk");
        assert_eq!(base_domain("shop.example.co.uk"), "example.co.uk");
    }

    #[test]
    fn base_domain_single_label() {
        assert_eq!(base_domain("localhost"), "localhost");
    }

    #[test]
    fn load_literal_domain() {
        let domains = load_domains("Example.com", None).unwrap();
        assert_eq!(domains, vec!["example.com"]);
    }

    #[test]
    fn load_csv_file_with_header() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "Domain,Agency").unwrap();
        writeln!(f, "example.com,GSA").unwrap();
        writeln!(f, "https://foo.gov,GSA").unwrap();
        writeln!(f).unwrap();

        let domains = load_domains(f.path().to_str().unwrap(), None).unwrap();
        assert_eq!(domains, vec!["example.com", "foo.gov"]);
    }

    #[test]
    fn load_csv_file_without_header() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "one.example.com").unwrap();
        writeln!(f, "two.example.com").unwrap();

        let domains = load_domains(f.path().to_str().unwrap(), None).unwrap();
        assert_eq!(domains.len(), 2);
    }

    #[test]
    fn suffix_filter_restricts_stream() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "a.example.gov").unwrap();
        writeln!(f, "b.example.com").unwrap();
        writeln!(f, "example.gov").unwrap();

        let domains = load_domains(f.path().to_str().unwrap(), Some(".gov")).unwrap();
        assert_eq!(domains, vec!["a.example.gov", "example.gov"]);
    }

    #[test]
    fn missing_file_is_treated_as_literal() {
        let domains = load_domains("no-such-file.csv", None).unwrap();
        assert_eq!(domains, vec!["no-such-file.csv"]);
    }
}
