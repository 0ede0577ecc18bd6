//! Template rendering for `string` field formats.
//!
//! Supported tokens:
//! - `{seq:NNd}` - the entity's sequence counter, zero-padded to NN digits
//! - `{field}` - the value already bound to `field` in the current record

use streamgen_core::Record;

/// Render a format string against the sequence counter and the partially
/// built record. Returns the failure reason on unbound or malformed tokens.
pub fn render(format: &str, seq: u64, record: &Record) -> Result<String, String> {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(format!("unterminated token in template '{format}'"));
        };
        let token = &after[..end];

        if let Some(spec) = token.strip_prefix("seq:") {
            let width = spec
                .strip_suffix('d')
                .and_then(|w| w.parse::<usize>().ok())
                .ok_or_else(|| format!("malformed sequence token '{{{token}}}'"))?;
            out.push_str(&format!("{seq:0width$}"));
        } else {
            let value = record
                .get(token)
                .ok_or_else(|| format!("unbound field '{token}' in template"))?;
            out.push_str(&value.to_string());
        }

        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamgen_core::Value;

    #[test]
    fn test_render_sequence_zero_padded() {
        let record = Record::new();
        assert_eq!(render("ORDER_{seq:05d}", 3, &record).unwrap(), "ORDER_00003");
        assert_eq!(render("CUST_{seq:04d}", 1, &record).unwrap(), "CUST_0001");
    }

    #[test]
    fn test_render_wide_counter_overflows_padding() {
        let record = Record::new();
        assert_eq!(render("P_{seq:02d}", 123, &record).unwrap(), "P_123");
    }

    #[test]
    fn test_render_field_substitution() {
        let mut record = Record::new();
        record.insert("customer_id", Value::String("CUST_0007".into()));
        assert_eq!(
            render("{customer_id}-note", 1, &record).unwrap(),
            "CUST_0007-note"
        );
    }

    #[test]
    fn test_render_mixed_tokens() {
        let mut record = Record::new();
        record.insert("region", Value::String("eu".into()));
        assert_eq!(
            render("{region}_ORD_{seq:03d}", 42, &record).unwrap(),
            "eu_ORD_042"
        );
    }

    #[test]
    fn test_render_unbound_field_fails() {
        let record = Record::new();
        let err = render("{missing}", 1, &record).unwrap_err();
        assert!(err.contains("unbound field 'missing'"));
    }

    #[test]
    fn test_render_malformed_seq_fails() {
        let record = Record::new();
        assert!(render("{seq:xd}", 1, &record).is_err());
        assert!(render("{seq:5", 1, &record).is_err());
    }

    #[test]
    fn test_render_no_tokens_passthrough() {
        let record = Record::new();
        assert_eq!(render("plain", 1, &record).unwrap(), "plain");
    }
}
