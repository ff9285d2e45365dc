//! State bill XML parser (BILLSTATUS and BILLTEXT dialects)
//!
//! BILLSTATUS carries scalar bill fields, the sponsor list and dated
//! actions; BILLTEXT carries the full text under an amendment version label.
//! Both name the bill with `session`/`billhse`/`billno`/`version` attributes
//! on the root element.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use legis_common::{EntityKey, Fragment, FragmentKind};
use serde_json::json;

use super::xml::{self, Element};
use super::{ParseError, ParseOutput, Parser};
use crate::registry::SourceFile;

pub struct BillXmlParser;

impl Parser for BillXmlParser {
    fn name(&self) -> &'static str {
        "bill-xml"
    }

    fn parse(&self, file: &SourceFile, content: &[u8]) -> ParseOutput {
        let text = match std::str::from_utf8(content) {
            Ok(text) => text,
            Err(e) => return ParseOutput::failure(vec![ParseError::new(format!("Not UTF-8: {}", e))]),
        };
        let root = match xml::parse_document(text) {
            Ok(root) => root,
            Err(e) => return ParseOutput::failure(vec![e]),
        };

        match root.name.as_str() {
            "billstatus" => parse_billstatus(&root, file.extracted_at),
            "billtext" => parse_billtext(&root, file.extracted_at),
            other => ParseOutput::failure(vec![ParseError::new(format!(
                "Unexpected root element <{}>",
                other
            ))]),
        }
    }
}

/// Bill identity from the root attributes; the amendment version is
/// returned separately because it is a lineage label, not part of the key.
fn bill_key(root: &Element) -> Result<(EntityKey, String), ParseError> {
    let session: u16 = root
        .attr("session")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::new("Missing or bad session attribute"))?;
    let house = root
        .attr("billhse")
        .filter(|h| h.len() == 1)
        .ok_or_else(|| ParseError::new("Missing or bad billhse attribute"))?;
    let number: u32 = root
        .attr("billno")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ParseError::new("Missing or bad billno attribute"))?;
    let version = root.attr("version").unwrap_or("").to_string();

    Ok((
        EntityKey::Bill {
            session,
            print_no: format!("{}{:05}", house.to_ascii_uppercase(), number),
        },
        version,
    ))
}

fn parse_billstatus(root: &Element, extracted_at: DateTime<Utc>) -> ParseOutput {
    let (key, _) = match bill_key(root) {
        Ok(pair) => pair,
        Err(e) => return ParseOutput::failure(vec![e]),
    };

    let mut fragments = Vec::new();
    let mut errors = Vec::new();

    let title = root.child_text("title");
    let summary = root.child_text("summary");
    if title.is_some() || summary.is_some() {
        fragments.push(Fragment::new(
            key.clone(),
            FragmentKind::Metadata,
            extracted_at,
            json!({ "title": title, "summary": summary }),
        ));
    }

    if let Some(sponsor) = root.child_text("sponsor") {
        let co_sponsors: Vec<String> = root
            .child("cosponsors")
            .map(|c| {
                c.children_named("member")
                    .map(|m| m.trimmed_text())
                    .collect()
            })
            .unwrap_or_default();
        fragments.push(Fragment::new(
            key.clone(),
            FragmentKind::Sponsor,
            extracted_at,
            json!({ "sponsor": sponsor, "co_sponsors": co_sponsors }),
        ));
    }

    if let Some(actions) = root.child("actions") {
        for (idx, action) in actions.children_named("action").enumerate() {
            match action_fragment(&key, action, idx) {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => errors.push(e),
            }
        }
    }

    if !errors.is_empty() {
        return ParseOutput::failure(errors);
    }
    if fragments.is_empty() {
        return ParseOutput::failure(vec![ParseError::new("Bill status carries no fields")]);
    }
    ParseOutput::success(fragments)
}

fn action_fragment(key: &EntityKey, action: &Element, idx: usize) -> Result<Fragment, ParseError> {
    let date_attr = action
        .attr("date")
        .ok_or_else(|| ParseError::new("Action missing date attribute"))?;
    let date = NaiveDate::parse_from_str(date_attr, "%Y-%m-%d")
        .map_err(|_| ParseError::new(format!("Bad action date {:?}", date_attr)))?;
    let seq: u32 = action
        .attr("seqno")
        .and_then(|s| s.parse().ok())
        .unwrap_or(idx as u32);

    Ok(Fragment::new(
        key.clone(),
        FragmentKind::Action,
        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
        json!({ "date": date.to_string(), "text": action.trimmed_text() }),
    )
    .with_sequence_hint(seq))
}

fn parse_billtext(root: &Element, extracted_at: DateTime<Utc>) -> ParseOutput {
    let (key, version) = match bill_key(root) {
        Ok(pair) => pair,
        Err(e) => return ParseOutput::failure(vec![e]),
    };

    let Some(text) = root.child_text("text") else {
        return ParseOutput::failure(vec![ParseError::new("Bill text missing <text> element")]);
    };

    ParseOutput::success(vec![Fragment::new(
        key,
        FragmentKind::Text,
        extracted_at,
        json!({ "version": version, "text": text }),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DocType, SourceStatus};
    use std::path::PathBuf;

    fn xml_file(doc_type: DocType) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/staging/test.XML"),
            file_name: "test.XML".to_string(),
            doc_type,
            extracted_at: Utc.with_ymd_and_hms(2023, 1, 15, 10, 30, 0).unwrap(),
            status: SourceStatus::Staged,
        }
    }

    #[test]
    fn test_parse_billstatus() {
        let content = br#"<billstatus session="2023" billhse="S" billno="1234" version="">
            <title>An act to amend the tax law</title>
            <sponsor>SMITH</sponsor>
            <cosponsors><member>JONES</member><member>DOE</member></cosponsors>
            <actions>
                <action date="2023-01-15" seqno="1">REFERRED TO FINANCE</action>
                <action date="2023-01-15" seqno="2">AMENDED ON THIRD READING</action>
            </actions>
        </billstatus>"#;
        let output = BillXmlParser.parse(&xml_file(DocType::BillStatus), content);
        assert!(output.errors.is_empty(), "{:?}", output.errors);

        // billno pads to the canonical five-digit print number
        assert!(output
            .fragments
            .iter()
            .all(|f| f.entity_key.canonical() == "bill/2023/S01234"));

        let actions: Vec<&Fragment> = output
            .fragments
            .iter()
            .filter(|f| f.kind == FragmentKind::Action)
            .collect();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].sequence_hint, Some(1));
        assert_eq!(actions[1].sequence_hint, Some(2));

        let sponsor = output
            .fragments
            .iter()
            .find(|f| f.kind == FragmentKind::Sponsor)
            .unwrap();
        assert_eq!(sponsor.payload["co_sponsors"][1], "DOE");
    }

    #[test]
    fn test_parse_billtext_version() {
        let content = br#"<billtext session="2023" billhse="S" billno="1234" version="B">
            <text>Section 1. This act shall be known as...</text>
        </billtext>"#;
        let output = BillXmlParser.parse(&xml_file(DocType::BillText), content);
        assert!(output.errors.is_empty());
        assert_eq!(output.fragments.len(), 1);
        assert_eq!(output.fragments[0].kind, FragmentKind::Text);
        assert_eq!(output.fragments[0].payload["version"], "B");
    }

    #[test]
    fn test_missing_identity_attributes_fail() {
        let content = br#"<billstatus session="2023"><title>No bill number</title></billstatus>"#;
        let output = BillXmlParser.parse(&xml_file(DocType::BillStatus), content);
        assert!(output.is_failure());
        assert!(output.fragments.is_empty());
    }

    #[test]
    fn test_broken_xml_fails_with_zero_fragments() {
        let content = br#"<billstatus session="2023" billhse="S" billno="1234"><title>Unclosed"#;
        let output = BillXmlParser.parse(&xml_file(DocType::BillStatus), content);
        assert!(output.is_failure());
        assert!(output.fragments.is_empty());
    }

    #[test]
    fn test_bad_action_date_fails_whole_file() {
        let content = br#"<billstatus session="2023" billhse="S" billno="1234">
            <title>Ok title</title>
            <actions><action date="01/15/2023">REFERRED</action></actions>
        </billstatus>"#;
        let output = BillXmlParser.parse(&xml_file(DocType::BillStatus), content);
        assert!(output.is_failure());
        assert!(output.fragments.is_empty());
    }
}
