// tls/pem.rs - PEM Chain Handling

const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const END: &str = "-----END CERTIFICATE-----";

/// Split a PEM bundle into its certificate blocks, leaf first.
///
/// Each block is returned with its armor lines and a trailing newline.
/// Text outside of armor is dropped.
pub fn break_chain(bundle: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = bundle;

    while let Some(start) = rest.find(BEGIN) {
        let after_begin = &rest[start..];
        let Some(end) = after_begin.find(END) else {
            break;
        };
        let block = &after_begin[..end + END.len()];
        blocks.push(format!("{}\n", block.trim()));
        rest = &after_begin[end + END.len()..];
    }

    blocks
}

/// Every certificate after the leaf, concatenated
pub fn ca_chain(bundle: &str) -> String {
    break_chain(bundle).into_iter().skip(1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(body: &str) -> String {
        format!("{}\n{}\n{}\n", BEGIN, body, END)
    }

    #[test]
    fn test_break_chain() {
        let bundle = format!("{}{}{}", cert("leaf"), cert("intermediate"), cert("root"));
        let blocks = break_chain(&bundle);

        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].contains("leaf"));
        assert!(blocks[2].ends_with("-----END CERTIFICATE-----\n"));
    }

    #[test]
    fn test_ca_chain_skips_leaf() {
        let bundle = format!("{}{}", cert("leaf"), cert("root"));
        let ca = ca_chain(&bundle);
        assert!(!ca.contains("leaf"));
        assert!(ca.contains("root"));

        assert!(ca_chain(&cert("leaf")).is_empty());
        assert!(ca_chain("").is_empty());
    }

    #[test]
    fn test_truncated_block_ignored() {
        let bundle = format!("{}{}\nMIIB", cert("leaf"), BEGIN);
        assert_eq!(break_chain(&bundle).len(), 1);
    }
}
