//! Loopback rewriting for retrieved kubeconfigs
//!
//! k3s writes its kubeconfig for local use, pointing the server URL at
//! the loopback interface. Swapping in the public address makes the file
//! usable from the workstation that fetched it.

const LOOPBACK_FORMS: [&[u8]; 2] = [b"localhost", b"127.0.0.1"];

/// Replace every `localhost` and `127.0.0.1` in `doc` with `address`.
///
/// Operates on raw bytes; everything outside the two patterns is copied
/// through verbatim, whether or not it is valid UTF-8. Single pass over
/// the document: substituted text is never rescanned, so an address that
/// itself contains a loopback form stays intact.
pub fn rewrite_loopback(doc: &[u8], address: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(doc.len());
    let mut rest = doc;

    while !rest.is_empty() {
        let next = LOOPBACK_FORMS
            .iter()
            .filter_map(|form| find(rest, form).map(|idx| (idx, form.len())))
            .min_by_key(|(idx, _)| *idx);

        match next {
            Some((idx, form_len)) => {
                out.extend_from_slice(&rest[..idx]);
                out.extend_from_slice(address.as_bytes());
                rest = &rest[idx + form_len..];
            }
            None => {
                out.extend_from_slice(rest);
                break;
            }
        }
    }

    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_both_loopback_forms() {
        let doc = b"server: https://127.0.0.1:6443\nname: localhost\n";
        let out = rewrite_loopback(doc, "203.0.113.7");
        assert_eq!(
            out,
            b"server: https://203.0.113.7:6443\nname: 203.0.113.7\n"
        );
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let doc = b"127.0.0.1 localhost 127.0.0.1 localhost";
        let out = rewrite_loopback(doc, "x");
        assert_eq!(out, b"x x x x");
    }

    #[test]
    fn test_leaves_everything_else_untouched() {
        let doc = b"clusters: []\nusers: []\n";
        assert_eq!(rewrite_loopback(doc, "203.0.113.7"), doc.to_vec());
    }

    #[test]
    fn test_non_utf8_bytes_pass_through_untouched() {
        // Certificate blobs are not guaranteed to be valid UTF-8
        let doc = b"server: https://127.0.0.1:6443\n# \xff\x00 trailer\n";
        let out = rewrite_loopback(doc, "203.0.113.7");
        assert_eq!(out, b"server: https://203.0.113.7:6443\n# \xff\x00 trailer\n");
    }

    #[test]
    fn test_substituted_address_is_not_rescanned() {
        // 127.0.0.10 contains "127.0.0.1"; a naive double pass would
        // mangle the address it just inserted
        let doc = b"server: https://127.0.0.1:6443";
        let out = rewrite_loopback(doc, "127.0.0.10");
        assert_eq!(out, b"server: https://127.0.0.10:6443");
    }

    #[test]
    fn test_empty_document() {
        assert!(rewrite_loopback(b"", "203.0.113.7").is_empty());
    }
}
