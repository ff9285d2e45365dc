//! Floor calendar and committee agenda XML parser
//!
//! Both dialects produce one schedule fragment for the calendar/agenda
//! aggregate named by `year` + `no` on the root element.

use chrono::{DateTime, Utc};
use legis_common::{EntityKey, Fragment, FragmentKind};
use serde_json::json;

use super::xml::{self, Element};
use super::{ParseError, ParseOutput, Parser};
use crate::registry::SourceFile;

pub struct CalendarXmlParser;

impl Parser for CalendarXmlParser {
    fn name(&self) -> &'static str {
        "calendar-xml"
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
            "calendar" => parse_calendar(&root, file.extracted_at),
            "agenda" => parse_agenda(&root, file.extracted_at),
            other => ParseOutput::failure(vec![ParseError::new(format!(
                "Unexpected root element <{}>",
                other
            ))]),
        }
    }
}

fn year_and_number(root: &Element) -> Result<(u16, u32), ParseError> {
    let year = root
        .attr("year")
        .and_then(|y| y.parse().ok())
        .ok_or_else(|| ParseError::new("Missing or bad year attribute"))?;
    let number = root
        .attr("no")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ParseError::new("Missing or bad no attribute"))?;
    Ok((year, number))
}

fn bill_ref(entry: &Element) -> Result<String, ParseError> {
    let house = entry
        .attr("billhse")
        .filter(|h| h.len() == 1)
        .ok_or_else(|| ParseError::new("Entry missing billhse"))?;
    let number: u32 = entry
        .attr("billno")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ParseError::new("Entry missing or bad billno"))?;
    Ok(format!("{}{:05}", house.to_ascii_uppercase(), number))
}

fn parse_calendar(root: &Element, extracted_at: DateTime<Utc>) -> ParseOutput {
    let (year, number) = match year_and_number(root) {
        Ok(pair) => pair,
        Err(e) => return ParseOutput::failure(vec![e]),
    };

    let mut sections = Vec::new();
    for supplemental in root.children_named("supplemental") {
        let supp_id = supplemental.attr("id").unwrap_or("").to_string();
        for section in supplemental.children_named("section") {
            let name = section.attr("name").unwrap_or("").to_string();
            let mut entries = Vec::new();
            for entry in section.children_named("calentry") {
                let print_no = match bill_ref(entry) {
                    Ok(print_no) => print_no,
                    Err(e) => return ParseOutput::failure(vec![e]),
                };
                entries.push(json!({
                    "calendar_no": entry.attr("no"),
                    "bill_print_no": print_no,
                }));
            }
            sections.push(json!({
                "supplemental": supp_id,
                "section": name,
                "entries": entries,
            }));
        }
    }

    ParseOutput::success(vec![Fragment::new(
        EntityKey::Calendar { year, number },
        FragmentKind::Schedule,
        extracted_at,
        json!({ "sections": sections }),
    )])
}

fn parse_agenda(root: &Element, extracted_at: DateTime<Utc>) -> ParseOutput {
    let (year, number) = match year_and_number(root) {
        Ok(pair) => pair,
        Err(e) => return ParseOutput::failure(vec![e]),
    };

    let mut committees = Vec::new();
    for committee in root.children_named("committee") {
        let mut bills = Vec::new();
        for item in committee.children_named("billitem") {
            match bill_ref(item) {
                Ok(print_no) => bills.push(print_no),
                Err(e) => return ParseOutput::failure(vec![e]),
            }
        }
        committees.push(json!({
            "chamber": committee.attr("chamber"),
            "name": committee.attr("name"),
            "meeting_date": committee.child("meeting").and_then(|m| m.attr("date")),
            "location": committee.child("meeting").and_then(|m| m.attr("location")),
            "bills": bills,
        }));
    }

    ParseOutput::success(vec![Fragment::new(
        EntityKey::Agenda { year, number },
        FragmentKind::Schedule,
        extracted_at,
        json!({ "committees": committees }),
    )])
}
