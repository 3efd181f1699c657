//! Minimal CSV encoding and parsing for result tables.
//!
//! Tables are written and re-read by the dispatcher itself (sort
//! finalization and post-run enrichment), so both directions live here.
//! Quoting follows the usual rules: a field is quoted when it contains a
//! comma, a quote, or a line break, and embedded quotes are doubled.

/// Encode one record, without a trailing line terminator.
pub fn encode_record(fields: &[String]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains(['"', ',', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out
}

/// Parse a full table into records.
///
/// Handles quoted fields spanning line breaks and both LF and CRLF
/// terminators. A trailing newline does not produce an empty record.
pub fn parse_table(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();
    let mut saw_any = false;

    while let Some(c) = chars.next() {
        saw_any = true;
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => {
                record.push(std::mem::take(&mut field));
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    // Final record without a trailing newline.
    if saw_any && (!field.is_empty() || !record.is_empty()) {
        record.push(field);
        records.push(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn plain_fields_stay_unquoted() {
        assert_eq!(encode_record(&s(&["example.com", "True", ""])), "example.com,True,");
    }

    #[test]
    fn special_fields_get_quoted() {
        assert_eq!(encode_record(&s(&["a,b"])), "\"a,b\"");
        assert_eq!(encode_record(&s(&["say \"hi\""])), "\"say \"\"hi\"\"\"");
        assert_eq!(encode_record(&s(&["line\nbreak"])), "\"line\nbreak\"");
    }

    #[test]
    fn encode_parse_round_trip() {
        let record = s(&["example.com", "a,b", "q\"uote", "multi\nline", ""]);
        let text = format!("{}\n", encode_record(&record));
        assert_eq!(parse_table(&text), vec![record]);
    }

    #[test]
    fn parses_multiple_records_and_crlf() {
        let text = "Domain,Value\r\nexample.com,1\nfoo.gov,2\n";
        assert_eq!(
            parse_table(text),
            vec![s(&["Domain", "Value"]), s(&["example.com", "1"]), s(&["foo.gov", "2"])]
        );
    }

    #[test]
    fn empty_input_has_no_records() {
        assert!(parse_table("").is_empty());
    }

    #[test]
    fn trailing_empty_field_is_kept() {
        assert_eq!(parse_table("a,\n"), vec![s(&["a", ""])]);
    }
}
