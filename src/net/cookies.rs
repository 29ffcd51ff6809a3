//! Netscape cookie-file formatting
//!
//! Converts a browser `Cookie:` header value into the Netscape cookie-file
//! format consumed by helper processes.

const HEADER: &str = "# Netscape HTTP Cookie File\n# This file was generated by the app.\n";

/// Fixed expiry written for every cookie (i32::MAX, far future)
const EXPIRY: &str = "2147483647";

/// Render a raw `Cookie:` header value as a Netscape cookie file.
///
/// Entries split on `;`, each pair on the first `=`. Invalid pairs are
/// dropped. Domain is deliberately left blank and path fixed to `/`; the
/// flag columns and expiry are constants.
pub fn write_netscape(cookie_header: &str) -> String {
    let mut out = String::from(HEADER);
    for (name, value) in parse_pairs(cookie_header) {
        out.push_str(&format!("\tFALSE\t/\tFALSE\t{}\t{}\t{}\n", EXPIRY, name, value));
    }
    out
}

/// Parse a Netscape cookie file back into (name, value) pairs.
///
/// Used to validate round-trips; comment lines and malformed rows are
/// skipped.
pub fn parse_netscape(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }
            Some((fields[5].to_string(), fields[6].to_string()))
        })
        .collect()
}

fn parse_pairs(cookie_header: &str) -> Vec<(String, String)> {
    cookie_header
        .split(';')
        .filter_map(|entry| {
            let mut it = entry.splitn(2, '=');
            let name = it.next()?.trim();
            let value = it.next()?.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn formats_simple_pairs() {
        let out = write_netscape("sid=abc123; theme=dark");
        assert!(out.starts_with("# Netscape HTTP Cookie File\n"));
        assert!(out.contains("\tFALSE\t/\tFALSE\t2147483647\tsid\tabc123\n"));
        assert!(out.contains("\tFALSE\t/\tFALSE\t2147483647\ttheme\tdark\n"));
    }

    #[test]
    fn drops_invalid_entries() {
        let out = write_netscape("valid=1; ; noequals; =novalue");
        let pairs = parse_netscape(&out);
        assert_eq!(pairs, vec![("valid".to_string(), "1".to_string())]);
    }

    #[test]
    fn value_may_contain_equals() {
        let out = write_netscape("token=a=b=c");
        let pairs = parse_netscape(&out);
        assert_eq!(pairs, vec![("token".to_string(), "a=b=c".to_string())]);
    }

    #[test]
    fn round_trip_preserves_pair_set() {
        let header = "a=1; b=2; c=three; dup=x; dup=y";
        let expected: HashSet<(String, String)> = [
            ("a", "1"),
            ("b", "2"),
            ("c", "three"),
            ("dup", "x"),
            ("dup", "y"),
        ]
        .into_iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();

        let parsed: HashSet<(String, String)> =
            parse_netscape(&write_netscape(header)).into_iter().collect();
        assert_eq!(parsed, expected);
    }
}
