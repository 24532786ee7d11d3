// 🗺️ Geography - zipcode, county and state identifiers
//
// Path-style identifiers, same shape as the query routes:
//   zipcode/30301
//   state/13/county/121
//   state/13

use crate::error::{FootprintError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// GEOGRAPHY LEVEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeographyLevel {
    Zipcode,
    County,
    State,
}

impl GeographyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeographyLevel::Zipcode => "zipcode",
            GeographyLevel::County => "county",
            GeographyLevel::State => "state",
        }
    }

    pub fn all() -> [GeographyLevel; 3] {
        [GeographyLevel::Zipcode, GeographyLevel::County, GeographyLevel::State]
    }
}

impl fmt::Display for GeographyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeographyLevel {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "zipcode" | "zip" => Ok(GeographyLevel::Zipcode),
            "county" => Ok(GeographyLevel::County),
            "state" => Ok(GeographyLevel::State),
            other => Err(FootprintError::invalid_parameter(format!(
                "unknown geography level '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// GEOGRAPHY ID
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum GeographyId {
    Zipcode { zipcode: String },
    County { statefp: u32, countyfp: u32 },
    State { statefp: u32 },
}

impl GeographyId {
    pub fn zipcode(zipcode: &str) -> Result<Self> {
        let zipcode = zipcode.trim();
        if zipcode.len() != 5 || !zipcode.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FootprintError::invalid_parameter(format!(
                "zipcode must be five digits, got '{}'",
                zipcode
            )));
        }
        Ok(GeographyId::Zipcode {
            zipcode: zipcode.to_string(),
        })
    }

    pub fn county(statefp: u32, countyfp: u32) -> Self {
        GeographyId::County { statefp, countyfp }
    }

    pub fn state(statefp: u32) -> Self {
        GeographyId::State { statefp }
    }

    pub fn level(&self) -> GeographyLevel {
        match self {
            GeographyId::Zipcode { .. } => GeographyLevel::Zipcode,
            GeographyId::County { .. } => GeographyLevel::County,
            GeographyId::State { .. } => GeographyLevel::State,
        }
    }
}

impl fmt::Display for GeographyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeographyId::Zipcode { zipcode } => write!(f, "zipcode/{}", zipcode),
            GeographyId::County { statefp, countyfp } => {
                write!(f, "state/{:02}/county/{:03}", statefp, countyfp)
            }
            GeographyId::State { statefp } => write!(f, "state/{:02}", statefp),
        }
    }
}

fn parse_fips(value: &str, what: &str) -> Result<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        FootprintError::invalid_parameter(format!("{} FIPS code must be numeric, got '{}'", what, value))
    })
}

impl FromStr for GeographyId {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().trim_matches('/').split('/').collect();

        match parts.as_slice() {
            ["zipcode", zipcode] => GeographyId::zipcode(zipcode),
            ["state", statefp, "county", countyfp] => Ok(GeographyId::county(
                parse_fips(statefp, "state")?,
                parse_fips(countyfp, "county")?,
            )),
            ["state", statefp] => Ok(GeographyId::state(parse_fips(statefp, "state")?)),
            _ => Err(FootprintError::invalid_parameter(format!(
                "unrecognised geography '{}'",
                s
            ))),
        }
    }
}
