//! Admitted value domains
//!
//! Every settable attribute declares the values the instrument accepts.
//! Two shapes matter in practice:
//!
//! - **Ladders**: ordered numeric values such as the voltage ranges
//!   `{0.4, 4, 40, 400, 1000}`. A request that is not on the ladder is snapped
//!   up to the smallest member above it, or clamped to the top rung.
//! - **Closed sets**: named choices such as `{SLOW, MED, FAST}`. Matching is
//!   case-insensitive and a miss is a hard error.

use super::Value;
use crate::error::{DriverError, DriverResult};

/// One member of a closed admitted set.
///
/// `name` is what callers pass and what the cache holds; `token` is what goes
/// on the wire. Tokens may use SCPI long-form capitalization (`VOLTage:DC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    /// Caller-facing name
    pub name: &'static str,
    /// SCPI token sent to the instrument
    pub token: &'static str,
}

impl Choice {
    /// A choice whose wire token differs from its name
    pub const fn new(name: &'static str, token: &'static str) -> Self {
        Self { name, token }
    }

    /// A choice sent to the instrument verbatim
    pub const fn same(name: &'static str) -> Self {
        Self { name, token: name }
    }
}

/// Values an attribute accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    /// Anything of the attribute's kind.
    Any,
    /// Ascending numeric ladder; non-members are snapped.
    Ladder(&'static [f64]),
    /// Closed set of named choices; non-members are rejected.
    Closed(&'static [Choice]),
}

/// A substitution made while admitting a ladder value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Substitution {
    /// Request was between rungs and moved up to the next one.
    Snapped {
        /// Value asked for
        requested: f64,
        /// Ladder member used instead
        admitted: f64,
    },
    /// Request exceeded the top rung.
    Clamped {
        /// Value asked for
        requested: f64,
        /// Top of the ladder
        admitted: f64,
    },
}

impl Domain {
    /// Check `value` against the domain, returning the value to store and any
    /// substitution made along the way.
    ///
    /// Values must already be of the attribute's kind.
    pub fn admit(
        &self,
        attribute: &str,
        value: Value,
    ) -> DriverResult<(Value, Option<Substitution>)> {
        match self {
            Domain::Any => Ok((value, None)),
            Domain::Ladder(rungs) => {
                let requested = value
                    .as_f64()
                    .ok_or_else(|| DriverError::unsupported(attribute, &value))?;
                let (admitted, substitution) = snap_to_ladder(rungs, requested)
                    .ok_or_else(|| DriverError::unsupported(attribute, &value))?;
                Ok((Value::Float(admitted), substitution))
            }
            Domain::Closed(choices) => {
                let requested = value
                    .as_text()
                    .ok_or_else(|| DriverError::unsupported(attribute, &value))?;
                choices
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(requested.trim()))
                    .map(|c| (Value::Text(c.name.to_string()), None))
                    .ok_or_else(|| DriverError::unsupported(attribute, requested))
            }
        }
    }

    /// Wire token for an admitted value (closed sets map names to tokens)
    pub fn token(&self, value: &Value) -> Option<&'static str> {
        match (self, value) {
            (Domain::Closed(choices), Value::Text(name)) => choices
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .map(|c| c.token),
            _ => None,
        }
    }

    /// Map an instrument reply back onto a closed-set name.
    ///
    /// Accepts the choice name or the token in either SCPI short or long form.
    pub fn choice_for_reply(&self, reply: &str) -> Option<&'static str> {
        let Domain::Closed(choices) = self else {
            return None;
        };
        choices
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(reply) || scpi_matches(c.token, reply))
            .map(|c| c.name)
    }
}

/// Smallest ladder member >= `requested`, clamped to the top rung.
///
/// Returns `None` for an empty ladder.
pub fn snap_to_ladder(rungs: &[f64], requested: f64) -> Option<(f64, Option<Substitution>)> {
    let top = *rungs.last()?;

    if rungs.iter().any(|r| same_rung(*r, requested)) {
        return Some((requested, None));
    }
    if requested > top {
        return Some((
            top,
            Some(Substitution::Clamped {
                requested,
                admitted: top,
            }),
        ));
    }
    let admitted = rungs.iter().copied().find(|r| *r > requested)?;
    Some((
        admitted,
        Some(Substitution::Snapped {
            requested,
            admitted,
        }),
    ))
}

fn same_rung(rung: f64, value: f64) -> bool {
    (rung - value).abs() <= rung.abs().max(value.abs()) * 1e-12
}

/// Compare a SCPI program mnemonic such as `VOLTage:DC` against a reply.
///
/// Each colon-separated keyword matches either its short form (the capital
/// letters) or its long form, case-insensitively. Quotes around the reply are
/// ignored.
pub fn scpi_matches(pattern: &str, reply: &str) -> bool {
    let reply = reply.trim().trim_matches('"');
    let expected: Vec<&str> = pattern.split(':').filter(|k| !k.is_empty()).collect();
    let actual: Vec<&str> = reply.split(':').filter(|k| !k.is_empty()).collect();

    expected.len() == actual.len()
        && expected.iter().zip(&actual).all(|(keyword, word)| {
            let short: String = keyword
                .chars()
                .filter(|c| !c.is_ascii_lowercase())
                .collect();
            word.eq_ignore_ascii_case(keyword) || word.eq_ignore_ascii_case(&short)
        })
}
