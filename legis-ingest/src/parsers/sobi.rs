//! Legacy fixed-format transfer file parser
//!
//! Line-oriented positional format, Windows-1252 encoded. Every line names
//! a bill (session year + print number + amendment letter) followed by a
//! one-character line code selecting the field the rest of the line carries:
//!
//! ```text
//! cols 0-3   session year
//! cols 4-9   print number (house letter + 5 digits)
//! col  10    amendment letter (space for the base version)
//! col  11    line code
//! col  12+   data
//! ```
//!
//! Line codes: `3` title, `C` summary, `4` action (`MM/DD/YY TEXT`),
//! `6` sponsor, `7` co-sponsors, `T` text line, `V` vote
//! (`MM/DD/YY AYES nnn NAYS nnn`).

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use legis_common::{EntityKey, Fragment, FragmentKind};
use serde_json::json;
use std::collections::BTreeMap;

use super::{ParseError, ParseOutput, Parser};
use crate::registry::SourceFile;

pub struct SobiParser;

/// Per-bill accumulator while walking the file
#[derive(Default)]
struct BillLines {
    title: Option<String>,
    summary: Option<String>,
    sponsor: Option<String>,
    co_sponsors: Vec<String>,
    actions: Vec<(NaiveDate, String)>,
    text_lines: Vec<String>,
    votes: Vec<serde_json::Value>,
}

/// Bill identity of one line: entity key plus amendment letter
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BillId {
    session: u16,
    print_no: String,
    version: String,
}

impl Parser for SobiParser {
    fn name(&self) -> &'static str {
        "sobi"
    }

    fn parse(&self, file: &SourceFile, content: &[u8]) -> ParseOutput {
        // Windows-1252 maps every byte, so decoding itself cannot fail
        let (text, _, _) = encoding_rs::WINDOWS_1252.decode(content);

        let mut errors = Vec::new();
        let mut bills: BTreeMap<BillId, BillLines> = BTreeMap::new();
        let mut saw_line = false;

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            saw_line = true;

            match parse_line(line) {
                Ok((bill_id, code, data)) => {
                    let entry = bills.entry(bill_id).or_default();
                    if let Err(e) = apply_line(entry, code, data, line_no) {
                        errors.push(e);
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        if !saw_line {
            errors.push(ParseError::new("Empty document"));
        }
        if !errors.is_empty() {
            return ParseOutput::failure(errors);
        }

        let mut fragments = Vec::new();
        for (bill_id, lines) in bills {
            emit_fragments(&mut fragments, &bill_id, lines, file.extracted_at);
        }
        ParseOutput::success(fragments)
    }
}

fn parse_line(line: &str) -> Result<(BillId, char, &str), ParseError> {
    let chars: Vec<char> = line.chars().collect();
    if chars.len() < 12 {
        return Err(ParseError::new(format!("Short line: {:?}", line)));
    }

    let session: u16 = chars[0..4]
        .iter()
        .collect::<String>()
        .parse()
        .map_err(|_| ParseError::new(format!("Bad session year in line: {:?}", line)))?;

    let house = chars[4];
    if legis_common::Chamber::from_print_prefix(house).is_none() {
        return Err(ParseError::new(format!("Bad house letter {:?}", house)));
    }
    let number: String = chars[5..10].iter().collect();
    if !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseError::new(format!("Bad print number in line: {:?}", line)));
    }

    let version_char = chars[10];
    let version = if version_char == ' ' {
        String::new()
    } else if version_char.is_ascii_uppercase() {
        version_char.to_string()
    } else {
        return Err(ParseError::new(format!(
            "Bad amendment letter {:?}",
            version_char
        )));
    };

    let code = chars[11];
    let data_start: usize = line
        .char_indices()
        .nth(12)
        .map(|(i, _)| i)
        .unwrap_or(line.len());

    Ok((
        BillId {
            session,
            print_no: format!("{}{}", house.to_ascii_uppercase(), number),
            version,
        },
        code,
        &line[data_start..],
    ))
}

fn apply_line(entry: &mut BillLines, code: char, data: &str, line_no: usize) -> Result<(), ParseError> {
    match code {
        '3' => {
            entry.title = Some(merge_continuation(entry.title.take(), data));
        }
        'C' => {
            entry.summary = Some(merge_continuation(entry.summary.take(), data));
        }
        '4' => {
            let (date, text) = parse_dated_line(data)
                .ok_or_else(|| ParseError::at_line(format!("Bad action line: {:?}", data), line_no))?;
            entry.actions.push((date, text));
        }
        '6' => {
            entry.sponsor = Some(data.trim().to_string());
        }
        '7' => {
            entry
                .co_sponsors
                .extend(data.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
        }
        'T' => {
            entry.text_lines.push(data.to_string());
        }
        'V' => {
            let vote = parse_vote_line(data)
                .ok_or_else(|| ParseError::at_line(format!("Bad vote line: {:?}", data), line_no))?;
            entry.votes.push(vote);
        }
        other => {
            return Err(ParseError::at_line(
                format!("Unknown line code {:?}", other),
                line_no,
            ));
        }
    }
    Ok(())
}

fn merge_continuation(existing: Option<String>, data: &str) -> String {
    match existing {
        Some(mut s) => {
            s.push(' ');
            s.push_str(data.trim());
            s
        }
        None => data.trim().to_string(),
    }
}

/// `MM/DD/YY <text>`
fn parse_dated_line(data: &str) -> Option<(NaiveDate, String)> {
    let trimmed = data.trim_start();
    let (date_part, rest) = trimmed.split_at_checked(8)?;
    let date = NaiveDate::parse_from_str(date_part, "%m/%d/%y").ok()?;
    Some((date, rest.trim().to_string()))
}

/// `MM/DD/YY AYES nnn NAYS nnn`
fn parse_vote_line(data: &str) -> Option<serde_json::Value> {
    let trimmed = data.trim_start();
    let (date_part, rest) = trimmed.split_at_checked(8)?;
    let date = NaiveDate::parse_from_str(date_part, "%m/%d/%y").ok()?;

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    match tokens.as_slice() {
        ["AYES", ayes, "NAYS", nays] => Some(json!({
            "date": date.to_string(),
            "ayes": ayes.parse::<u32>().ok()?,
            "nays": nays.parse::<u32>().ok()?,
        })),
        _ => None,
    }
}

fn emit_fragments(
    fragments: &mut Vec<Fragment>,
    bill_id: &BillId,
    lines: BillLines,
    extracted_at: DateTime<Utc>,
) {
    let key = EntityKey::Bill {
        session: bill_id.session,
        print_no: bill_id.print_no.clone(),
    };

    if lines.title.is_some() || lines.summary.is_some() {
        fragments.push(Fragment::new(
            key.clone(),
            FragmentKind::Metadata,
            extracted_at,
            json!({
                "title": lines.title,
                "summary": lines.summary,
            }),
        ));
    }

    if lines.sponsor.is_some() || !lines.co_sponsors.is_empty() {
        fragments.push(Fragment::new(
            key.clone(),
            FragmentKind::Sponsor,
            extracted_at,
            json!({
                "sponsor": lines.sponsor,
                "co_sponsors": lines.co_sponsors,
            }),
        ));
    }

    for (seq, (date, text)) in lines.actions.iter().enumerate() {
        fragments.push(
            Fragment::new(
                key.clone(),
                FragmentKind::Action,
                midnight_utc(*date),
                json!({ "date": date.to_string(), "text": text }),
            )
            .with_sequence_hint(seq as u32),
        );
    }

    if !lines.text_lines.is_empty() {
        fragments.push(Fragment::new(
            key.clone(),
            FragmentKind::Text,
            extracted_at,
            json!({
                "version": bill_id.version,
                "text": lines.text_lines.join("\n"),
            }),
        ));
    }

    for vote in lines.votes {
        fragments.push(Fragment::new(
            key.clone(),
            FragmentKind::Vote,
            extracted_at,
            vote,
        ));
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DocType, SourceStatus};
    use std::path::PathBuf;

    fn sobi_file() -> SourceFile {
        SourceFile {
            path: PathBuf::from("/staging/SOBI.D230115.T103000.TXT"),
            file_name: "SOBI.D230115.T103000.TXT".to_string(),
            doc_type: DocType::Sobi,
            extracted_at: Utc.with_ymd_and_hms(2023, 1, 15, 10, 30, 0).unwrap(),
            status: SourceStatus::Staged,
        }
    }

    #[test]
    fn test_parse_full_bill() {
        let content = "\
2023S01234 3Relating to taxation of widgets\n\
2023S01234 4 01/15/23 REFERRED TO FINANCE\n\
2023S01234 4 01/20/23 REPORTED\n\
2023S01234 6SMITH\n\
2023S01234 7JONES, DOE\n\
2023S01234 CProvides for a widget tax exemption\n\
2023S01234 V 01/20/23 AYES 042 NAYS 018\n";
        let output = SobiParser.parse(&sobi_file(), content.as_bytes());
        assert!(output.errors.is_empty(), "{:?}", output.errors);

        let key = EntityKey::Bill {
            session: 2023,
            print_no: "S01234".to_string(),
        };
        assert!(output.fragments.iter().all(|f| f.entity_key == key));

        let actions: Vec<&Fragment> = output
            .fragments
            .iter()
            .filter(|f| f.kind == FragmentKind::Action)
            .collect();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].sequence_hint, Some(0));
        assert_eq!(actions[0].payload["text"], "REFERRED TO FINANCE");
        assert_eq!(actions[0].published_at.to_rfc3339(), "2023-01-15T00:00:00+00:00");

        let metadata = output
            .fragments
            .iter()
            .find(|f| f.kind == FragmentKind::Metadata)
            .unwrap();
        assert_eq!(metadata.payload["title"], "Relating to taxation of widgets");

        let vote = output
            .fragments
            .iter()
            .find(|f| f.kind == FragmentKind::Vote)
            .unwrap();
        assert_eq!(vote.payload["ayes"], 42);
    }

    #[test]
    fn test_amendment_text_carries_version() {
        let content = "2023S01234ATSection one, as amended.\n";
        let output = SobiParser.parse(&sobi_file(), content.as_bytes());
        assert!(output.errors.is_empty());
        let text = &output.fragments[0];
        assert_eq!(text.kind, FragmentKind::Text);
        assert_eq!(text.payload["version"], "A");
        // Amendment letter is a version label, not part of the key
        assert_eq!(text.entity_key.canonical(), "bill/2023/S01234");
    }

    #[test]
    fn test_malformed_line_fails_whole_file() {
        let content = "\
2023S01234 3Relating to taxation of widgets\n\
2023X01234 3A line with a bad house letter\n";
        let output = SobiParser.parse(&sobi_file(), content.as_bytes());
        assert!(output.is_failure());
        assert!(output.fragments.is_empty());
    }

    #[test]
    fn test_unknown_line_code_is_structural_error() {
        let content = "2023S01234 ZSomething unexpected\n";
        let output = SobiParser.parse(&sobi_file(), content.as_bytes());
        assert!(output.is_failure());
    }

    #[test]
    fn test_empty_file_is_error() {
        let output = SobiParser.parse(&sobi_file(), b"\n\n");
        assert!(output.is_failure());
    }

    #[test]
    fn test_windows_1252_decoding() {
        // 0xE9 is e-acute in Windows-1252
        let mut content = b"2023A00042 3Caf".to_vec();
        content.push(0xE9);
        content.extend_from_slice(b" regulation act\n");
        let output = SobiParser.parse(&sobi_file(), &content);
        assert!(output.errors.is_empty());
        assert_eq!(output.fragments[0].payload["title"], "Caf\u{e9} regulation act");
    }

    #[test]
    fn test_multiple_bills_in_one_file() {
        let content = "\
2023S01234 3First bill\n\
2023A00042 3Second bill\n";
        let output = SobiParser.parse(&sobi_file(), content.as_bytes());
        assert!(output.errors.is_empty());
        let keys: Vec<String> = output
            .fragments
            .iter()
            .map(|f| f.entity_key.canonical())
            .collect();
        assert!(keys.contains(&"bill/2023/S01234".to_string()));
        assert!(keys.contains(&"bill/2023/A00042".to_string()));
    }
}
