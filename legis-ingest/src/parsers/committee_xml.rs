//! Committee roster XML parser

use legis_common::{Chamber, EntityKey, Fragment, FragmentKind};
use serde_json::json;

use super::xml;
use super::{ParseError, ParseOutput, Parser};
use crate::registry::SourceFile;

pub struct CommitteeXmlParser;

impl Parser for CommitteeXmlParser {
    fn name(&self) -> &'static str {
        "committee-xml"
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
        if root.name != "committee" {
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
        let Some(name) = root.attr("name").filter(|n| !n.is_empty()) else {
            return ParseOutput::failure(vec![ParseError::new("Missing committee name")]);
        };
        if name.contains('/') {
            return ParseOutput::failure(vec![ParseError::new(
                "Committee name may not contain '/'",
            )]);
        }

        let members: Vec<serde_json::Value> = root
            .children_named("member")
            .map(|m| {
                json!({
                    "short_name": m.attr("shortname"),
                    "role": m.attr("role").unwrap_or("member"),
                })
            })
            .collect();
        if members.iter().any(|m| m["short_name"].is_null()) {
            return ParseOutput::failure(vec![ParseError::new("Member missing shortname")]);
        }

        ParseOutput::success(vec![Fragment::new(
            EntityKey::Committee {
                chamber,
                session,
                name: name.to_string(),
            },
            FragmentKind::Membership,
            file.extracted_at,
            json!({ "members": members }),
        )])
    }
}
