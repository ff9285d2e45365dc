//! Canonical entity keys
//!
//! Every source format maps its publisher-specific identifiers into this one
//! key space. The canonical string form is the database key for aggregate
//! rows and must round-trip losslessly through `FromStr`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Legislative chamber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chamber {
    Senate,
    Assembly,
}

impl Chamber {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chamber::Senate => "senate",
            Chamber::Assembly => "assembly",
        }
    }

    /// Chamber from a bill print-number house prefix (S1234 / A5678)
    pub fn from_print_prefix(c: char) -> Option<Chamber> {
        match c.to_ascii_uppercase() {
            'S' | 'R' | 'J' | 'B' => Some(Chamber::Senate),
            'A' | 'E' | 'K' | 'L' => Some(Chamber::Assembly),
            _ => None,
        }
    }
}

impl FromStr for Chamber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "senate" => Ok(Chamber::Senate),
            "assembly" => Ok(Chamber::Assembly),
            other => Err(Error::InvalidInput(format!("Unknown chamber: {}", other))),
        }
    }
}

impl fmt::Display for Chamber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identifier naming one legislative aggregate across all source
/// formats that describe it.
///
/// Bill keys carry the *base* print number only; amendment letters (S1234A)
/// are version labels inside the aggregate, not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntityKey {
    /// State bill: session year + base print number (e.g. 2023 / S01234)
    Bill { session: u16, print_no: String },
    /// Federal bill: congress + bill type + number (e.g. 118 / hr / 25)
    FederalBill {
        congress: u16,
        bill_type: String,
        number: u32,
    },
    /// Floor calendar: year + calendar number
    Calendar { year: u16, number: u32 },
    /// Committee agenda: year + agenda number
    Agenda { year: u16, number: u32 },
    /// Standing committee roster: chamber + session year + name
    Committee {
        chamber: Chamber,
        session: u16,
        name: String,
    },
    /// Legislator: chamber + session year + short name
    Member {
        chamber: Chamber,
        session: u16,
        short_name: String,
    },
}

impl EntityKey {
    /// Entity type token, used for the aggregates table and supported-kind
    /// checks in the merger.
    pub fn entity_type(&self) -> &'static str {
        match self {
            EntityKey::Bill { .. } => "bill",
            EntityKey::FederalBill { .. } => "fedbill",
            EntityKey::Calendar { .. } => "calendar",
            EntityKey::Agenda { .. } => "agenda",
            EntityKey::Committee { .. } => "committee",
            EntityKey::Member { .. } => "member",
        }
    }

    /// Canonical string form (database key). Round-trips via `FromStr`.
    pub fn canonical(&self) -> String {
        match self {
            EntityKey::Bill { session, print_no } => {
                format!("bill/{}/{}", session, print_no)
            }
            EntityKey::FederalBill {
                congress,
                bill_type,
                number,
            } => format!("fedbill/{}/{}/{}", congress, bill_type, number),
            EntityKey::Calendar { year, number } => format!("calendar/{}/{}", year, number),
            EntityKey::Agenda { year, number } => format!("agenda/{}/{}", year, number),
            EntityKey::Committee {
                chamber,
                session,
                name,
            } => format!("committee/{}/{}/{}", chamber, session, name),
            EntityKey::Member {
                chamber,
                session,
                short_name,
            } => format!("member/{}/{}/{}", chamber, session, short_name),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for EntityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let bad = || Error::InvalidInput(format!("Malformed entity key: {}", s));

        match parts.as_slice() {
            ["bill", session, print_no] => Ok(EntityKey::Bill {
                session: session.parse().map_err(|_| bad())?,
                print_no: (*print_no).to_string(),
            }),
            ["fedbill", congress, bill_type, number] => Ok(EntityKey::FederalBill {
                congress: congress.parse().map_err(|_| bad())?,
                bill_type: (*bill_type).to_string(),
                number: number.parse().map_err(|_| bad())?,
            }),
            ["calendar", year, number] => Ok(EntityKey::Calendar {
                year: year.parse().map_err(|_| bad())?,
                number: number.parse().map_err(|_| bad())?,
            }),
            ["agenda", year, number] => Ok(EntityKey::Agenda {
                year: year.parse().map_err(|_| bad())?,
                number: number.parse().map_err(|_| bad())?,
            }),
            ["committee", chamber, session, name] => Ok(EntityKey::Committee {
                chamber: chamber.parse()?,
                session: session.parse().map_err(|_| bad())?,
                name: (*name).to_string(),
            }),
            ["member", chamber, session, short_name] => Ok(EntityKey::Member {
                chamber: chamber.parse()?,
                session: session.parse().map_err(|_| bad())?,
                short_name: (*short_name).to_string(),
            }),
            _ => Err(bad()),
        }
    }
}
