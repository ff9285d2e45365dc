//! Member roster XML parser

use legis_common::{Chamber, EntityKey, Fragment, FragmentKind};
use serde_json::json;

use super::xml;
use super::{ParseError, ParseOutput, Parser};
use crate::registry::SourceFile;

pub struct MemberXmlParser;

impl Parser for MemberXmlParser {
    fn name(&self) -> &'static str {
        "member-xml"
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
        if root.name != "member" {
            return ParseOutput::failure(vec![ParseError::new(format!(
                "Unexpected root element <{}>",
                root.name
            ))]);
        }

        let chamber: Chamber = match root.attr("chamber").map(str::parse) {
            Some(Ok(chamber)) => chamber,
            _ => return ParseOutput::failure(vec![ParseError::new("Missing or bad chamber attribute")]),
        };
        let Some(session) = root.attr("sessyr").and_then(|s| s.parse().ok()) else {
            return ParseOutput::failure(vec![ParseError::new("Missing or bad sessyr attribute")]);
        };
        let Some(short_name) = root
            .attr("shortname")
            .filter(|n| !n.is_empty() && !n.contains('/'))
        else {
            return ParseOutput::failure(vec![ParseError::new("Missing or bad shortname attribute")]);
        };

        ParseOutput::success(vec![Fragment::new(
            EntityKey::Member {
                chamber,
                session,
                short_name: short_name.to_string(),
            },
            FragmentKind::Metadata,
            file.extracted_at,
            json!({
                "full_name": root.child_text("fullname"),
                "district": root.child_text("district"),
            }),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DocType, SourceStatus};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn xml_file() -> SourceFile {
        SourceFile {
            path: PathBuf::from("/staging/test.XML"),
            file_name: "test.XML".to_string(),
            doc_type: DocType::Member,
            extracted_at: Utc.with_ymd_and_hms(2023, 1, 4, 9, 0, 0).unwrap(),
            status: SourceStatus::Staged,
        }
    }

    #[test]
    fn test_parse_member() {
        let content = br#"<member chamber="assembly" sessyr="2023" shortname="DOE">
            <fullname>Jane Doe</fullname>
            <district>12</district>
        </member>"#;
        let output = MemberXmlParser.parse(&xml_file(), content);
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        let fragment = &output.fragments[0];
        assert_eq!(fragment.entity_key.canonical(), "member/assembly/2023/DOE");
        assert_eq!(fragment.payload["full_name"], "Jane Doe");
        assert_eq!(fragment.payload["district"], "12");
    }

    #[test]
    fn test_missing_shortname_fails() {
        let content = br#"<member chamber="assembly" sessyr="2023"><fullname>X</fullname></member>"#;
        let output = MemberXmlParser.parse(&xml_file(), content);
        assert!(output.is_failure());
    }
}
