//! Format parsers
//!
//! One parser per document family, all behind the same contract: a pure
//! function of file content producing canonical fragments. Parsers never
//! touch persisted state, which keeps them independently testable and
//! safely parallelizable across files.
//!
//! A structurally invalid document yields zero fragments and at least one
//! error; partially-populated fragments from a malformed file are never
//! emitted.

pub mod bill_xml;
pub mod calendar_xml;
pub mod committee_xml;
pub mod fed_bill;
pub mod member_xml;
pub mod sobi;
mod xml;

use legis_common::Fragment;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registry::{DocType, SourceFile};

/// One structural problem found while decoding a source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    /// 1-based line number for line-oriented formats
    pub line: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Parser result: fragments on success, errors on structural failure.
/// The two are mutually exclusive by construction.
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub fragments: Vec<Fragment>,
    pub errors: Vec<ParseError>,
}

impl ParseOutput {
    pub fn success(fragments: Vec<Fragment>) -> Self {
        Self {
            fragments,
            errors: Vec::new(),
        }
    }

    pub fn failure(errors: Vec<ParseError>) -> Self {
        Self {
            fragments: Vec::new(),
            errors,
        }
    }

    pub fn is_failure(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// One document family's decoder
pub trait Parser: Send + Sync {
    /// Parser name, recorded in processing records and diagnostics
    fn name(&self) -> &'static str;

    /// Decode a raw file into canonical fragments
    fn parse(&self, file: &SourceFile, content: &[u8]) -> ParseOutput;
}

static SOBI: sobi::SobiParser = sobi::SobiParser;
static BILL_XML: bill_xml::BillXmlParser = bill_xml::BillXmlParser;
static CALENDAR_XML: calendar_xml::CalendarXmlParser = calendar_xml::CalendarXmlParser;
static COMMITTEE_XML: committee_xml::CommitteeXmlParser = committee_xml::CommitteeXmlParser;
static MEMBER_XML: member_xml::MemberXmlParser = member_xml::MemberXmlParser;
static FED_BILL: fed_bill::FedBillParser = fed_bill::FedBillParser;

/// Registry dispatch: detected type to parser
pub fn parser_for(doc_type: DocType) -> &'static dyn Parser {
    match doc_type {
        DocType::Sobi => &SOBI,
        DocType::BillStatus | DocType::BillText => &BILL_XML,
        DocType::Calendar | DocType::Agenda => &CALENDAR_XML,
        DocType::Committee => &COMMITTEE_XML,
        DocType::Member => &MEMBER_XML,
        DocType::FedBillStatus => &FED_BILL,
    }
}
