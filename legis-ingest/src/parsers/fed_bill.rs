//! Federal bulk bill status XML parser
//!
//! The federal publisher wraps everything in `<billStatus><bill>…`, names
//! the bill by congress + type + number child elements, and stamps the
//! document with an `<updateDate>`. Scalar fragments use the update date;
//! actions use their own action dates.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use legis_common::{EntityKey, Fragment, FragmentKind};
use serde_json::json;

use super::xml::{self, Element};
use super::{ParseError, ParseOutput, Parser};
use crate::registry::SourceFile;

pub struct FedBillParser;

impl Parser for FedBillParser {
    fn name(&self) -> &'static str {
        "fed-bill"
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
        if root.name != "billStatus" {
            return ParseOutput::failure(vec![ParseError::new(format!(
                "Unexpected root element <{}>",
                root.name
            ))]);
        }
        let Some(bill) = root.child("bill") else {
            return ParseOutput::failure(vec![ParseError::new("Missing <bill> element")]);
        };

        let key = match fed_key(bill) {
            Ok(key) => key,
            Err(e) => return ParseOutput::failure(vec![e]),
        };

        // Publication timestamp for scalar fragments
        let published_at = match bill.child_text("updateDate") {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(_) => {
                    return ParseOutput::failure(vec![ParseError::new(format!(
                        "Bad updateDate {:?}",
                        raw
                    ))])
                }
            },
            None => file.extracted_at,
        };

        let mut fragments = Vec::new();
        let mut errors = Vec::new();

        if let Some(title) = bill.child_text("title") {
            fragments.push(Fragment::new(
                key.clone(),
                FragmentKind::Metadata,
                published_at,
                json!({ "title": title, "summary": bill.child_text("summary") }),
            ));
        }

        if let Some(sponsors) = bill.child("sponsors") {
            let names: Vec<String> = sponsors
                .children_named("item")
                .filter_map(|item| item.child_text("fullName"))
                .collect();
            if !names.is_empty() {
                fragments.push(Fragment::new(
                    key.clone(),
                    FragmentKind::Sponsor,
                    published_at,
                    json!({ "sponsor": names[0], "co_sponsors": names[1..].to_vec() }),
                ));
            }
        }

        if let Some(actions) = bill.child("actions") {
            for (idx, item) in actions.children_named("item").enumerate() {
                match fed_action(&key, item, idx) {
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
}

fn fed_key(bill: &Element) -> Result<EntityKey, ParseError> {
    let congress: u16 = bill
        .child_text("congress")
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| ParseError::new("Missing or bad <congress>"))?;
    let bill_type = bill
        .child_text("type")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ParseError::new("Missing <type>"))?
        .to_ascii_lowercase();
    let number: u32 = bill
        .child_text("number")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ParseError::new("Missing or bad <number>"))?;

    Ok(EntityKey::FederalBill {
        congress,
        bill_type,
        number,
    })
}

fn fed_action(key: &EntityKey, item: &Element, idx: usize) -> Result<Fragment, ParseError> {
    let raw = item
        .child_text("actionDate")
        .ok_or_else(|| ParseError::new("Action item missing <actionDate>"))?;
    let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| ParseError::new(format!("Bad actionDate {:?}", raw)))?;
    let text = item
        .child_text("text")
        .ok_or_else(|| ParseError::new("Action item missing <text>"))?;

    Ok(Fragment::new(
        key.clone(),
        FragmentKind::Action,
        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
        json!({ "date": date.to_string(), "text": text }),
    )
    .with_sequence_hint(idx as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DocType, SourceStatus};
    use std::path::PathBuf;

    fn xml_file() -> SourceFile {
        SourceFile {
            path: PathBuf::from("/staging/BILLSTATUS-118hr25.xml"),
            file_name: "BILLSTATUS-118hr25.xml".to_string(),
            doc_type: DocType::FedBillStatus,
            extracted_at: Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
            status: SourceStatus::Staged,
        }
    }

    #[test]
    fn test_parse_fed_billstatus() {
        let content = br#"<billStatus><bill>
            <congress>118</congress>
            <type>HR</type>
            <number>25</number>
            <updateDate>2023-06-01T10:00:00Z</updateDate>
            <title>FairTax Act</title>
            <sponsors><item><fullName>Rep. Carter</fullName></item></sponsors>
            <actions>
                <item><actionDate>2023-01-09</actionDate><text>Introduced in House</text></item>
                <item><actionDate>2023-01-09</actionDate><text>Referred to Ways and Means</text></item>
            </actions>
        </bill></billStatus>"#;
        let output = FedBillParser.parse(&xml_file(), content);
        assert!(output.errors.is_empty(), "{:?}", output.errors);

        assert!(output
            .fragments
            .iter()
            .all(|f| f.entity_key.canonical() == "fedbill/118/hr/25"));

        let metadata = output
            .fragments
            .iter()
            .find(|f| f.kind == FragmentKind::Metadata)
            .unwrap();
        assert_eq!(metadata.payload["title"], "FairTax Act");
        assert_eq!(metadata.published_at.to_rfc3339(), "2023-06-01T10:00:00+00:00");

        // Same-day actions are ordered by sequence hint
        let actions: Vec<&Fragment> = output
            .fragments
            .iter()
            .filter(|f| f.kind == FragmentKind::Action)
            .collect();
        assert_eq!(actions[0].sequence_hint, Some(0));
        assert_eq!(actions[1].sequence_hint, Some(1));
        assert_eq!(actions[0].published_at, actions[1].published_at);
    }

    #[test]
    fn test_missing_identity_fails() {
        let content = br#"<billStatus><bill><type>HR</type><number>25</number>
            <title>No congress</title></bill></billStatus>"#;
        let output = FedBillParser.parse(&xml_file(), content);
        assert!(output.is_failure());
        assert!(output.fragments.is_empty());
    }

    #[test]
    fn test_bad_update_date_fails() {
        let content = br#"<billStatus><bill>
            <congress>118</congress><type>HR</type><number>25</number>
            <updateDate>June 1st</updateDate><title>X</title>
        </bill></billStatus>"#;
        let output = FedBillParser.parse(&xml_file(), content);
        assert!(output.is_failure());
    }
}
