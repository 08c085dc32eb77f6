//! Per-instance attribute cache
//!
//! `CachedAttributes` owns one [`CacheEntry`] per scalar attribute and one per
//! (attribute, channel) for indexed attributes. All reads and writes of
//! instrument settings go through it:
//!
//! - `get` answers from the cache when the entry is valid (or the session is
//!   simulated) and otherwise performs exactly one query.
//! - `set` validates first, writes (unless simulated), stores the value as
//!   valid and then marks every dependent entry stale.
//!
//! Validation is split out as [`CachedAttributes::admit`] so drivers that need
//! extra device state to build a command (the multimeter's range path depends
//! on the measurement function) can still reject bad values before any I/O.

use super::{command_template, query_template, AttributeId, AttributeSpec, AttributeTable, Value};
use crate::attribute::domain::{Domain, Substitution};
use crate::error::{DriverError, DriverResult};
use crate::session::Session;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Cached value and its validity flag
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Last value read, written or seeded
    pub value: Value,
    /// Whether `value` still reflects the device
    pub valid: bool,
}

/// A value that passed validation for one attribute.
///
/// Only [`CachedAttributes::admit`] creates these, so anything written through
/// [`CachedAttributes::write_admitted`] has already been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted<A> {
    attribute: A,
    value: Value,
    substitution: Option<Substitution>,
}

impl<A: Copy> Admitted<A> {
    /// Attribute the value was admitted for
    pub fn attribute(&self) -> A {
        self.attribute
    }

    /// Value that will be stored (after snapping)
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Ladder substitution made while admitting, if any
    pub fn substitution(&self) -> Option<Substitution> {
        self.substitution
    }
}

/// Cache of instrument attributes for one driver instance
#[derive(Debug)]
pub struct CachedAttributes<A: 'static> {
    table: AttributeTable<A>,
    entries: HashMap<(A, usize), CacheEntry>,
    index_names: Vec<String>,
}

impl<A: AttributeId> CachedAttributes<A> {
    /// Seed one invalid entry per attribute (per channel for indexed ones).
    ///
    /// `index_names` are the channel names substituted for `{channel}` in
    /// indexed templates; their count fixes the valid index range.
    pub fn new(table: AttributeTable<A>, index_names: &[&str]) -> Self {
        let mut entries = HashMap::new();
        for spec in table.specs() {
            let count = if spec.indexed { index_names.len() } else { 1 };
            for index in 0..count {
                entries.insert(
                    (spec.id, index),
                    CacheEntry {
                        value: spec.initial.value(),
                        valid: false,
                    },
                );
            }
        }

        Self {
            table,
            entries,
            index_names: index_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The attribute table this cache was built from
    pub fn table(&self) -> &AttributeTable<A> {
        &self.table
    }

    /// Number of channels indexed attributes exist for
    pub fn index_count(&self) -> usize {
        self.index_names.len()
    }

    /// Current value of `attr`, querying the device only when the entry is stale.
    ///
    /// Indexed attributes default to the first channel when `index` is `None`.
    /// `vars` supplies extra template placeholders.
    pub async fn get<S>(
        &mut self,
        session: &S,
        attr: A,
        index: Option<usize>,
        vars: &[(&str, String)],
    ) -> DriverResult<Value>
    where
        S: Session + ?Sized,
    {
        let spec = self.table.spec(attr)?;
        let key = self.key(spec, index)?;
        let entry = self.entry(key)?;

        if session.simulate() || entry.valid {
            debug!(attribute = spec.name, index = key.1, "cache hit");
            return Ok(entry.value.clone());
        }

        let Some(template) = spec.query else {
            return Ok(entry.value.clone());
        };

        let query = self.render(&query_template(template), key.1, None, vars)?;
        let reply = session.ask(&query).await?;
        debug!(attribute = spec.name, %query, %reply, "attribute refreshed");

        let value = parse_reply(spec, &reply)?;
        self.store(key, value.clone());

        if let (Some(derived), Some(v)) = (spec.derived, value.as_f64()) {
            let partner = (derived.partner, key.1);
            if !self.entries.get(&partner).map_or(false, |e| e.valid) {
                self.store(partner, Value::Float(v * derived.factor));
            }
        }
        Ok(value)
    }

    /// Validate `value` for `attr` without touching the cache or the device.
    ///
    /// Ladder substitutions are logged as warnings here.
    pub fn admit(&self, attr: A, value: impl Into<Value>) -> DriverResult<Admitted<A>> {
        let spec = self.table.spec(attr)?;
        if spec.command.is_none() {
            return Err(DriverError::ReadOnly(spec.name));
        }

        let value = value.into();
        let value = spec
            .kind
            .coerce(value.clone())
            .ok_or_else(|| DriverError::unsupported(spec.name, &value))?;
        let (value, substitution) = spec.domain.admit(spec.name, value)?;

        match substitution {
            Some(Substitution::Snapped {
                requested,
                admitted,
            }) => warn!(
                attribute = spec.name,
                requested,
                admitted,
                "requested value not admitted, snapped up to next range"
            ),
            Some(Substitution::Clamped {
                requested,
                admitted,
            }) => warn!(
                attribute = spec.name,
                requested,
                admitted,
                "requested value above maximum range, clamped"
            ),
            None => {}
        }

        Ok(Admitted {
            attribute: attr,
            value,
            substitution,
        })
    }

    /// Write an admitted value to the device and commit it to the cache.
    ///
    /// `vars` supplies extra template placeholders; `{value}` and `{channel}`
    /// are filled in here.
    pub async fn write_admitted<S>(
        &mut self,
        session: &S,
        admitted: Admitted<A>,
        index: Option<usize>,
        vars: &[(&str, String)],
    ) -> DriverResult<Value>
    where
        S: Session + ?Sized,
    {
        let spec = self.table.spec(admitted.attribute)?;
        let key = self.key(spec, index)?;
        let template = spec.command.ok_or(DriverError::ReadOnly(spec.name))?;

        if !session.simulate() {
            let command = self.render(
                &command_template(template),
                key.1,
                Some(&wire_value(&spec.domain, &admitted.value)),
                vars,
            )?;
            session.write(&command).await?;
            debug!(attribute = spec.name, %command, "attribute written");
        }

        self.commit(key, admitted.value)
    }

    /// Commit an admitted value to the cache without any I/O.
    ///
    /// Used when the instrument has no command for the setting in its current
    /// state and the value is only tracked locally.
    pub fn commit_local(&mut self, admitted: Admitted<A>, index: Option<usize>) -> DriverResult<Value> {
        let spec = self.table.spec(admitted.attribute)?;
        let key = self.key(spec, index)?;
        self.commit(key, admitted.value)
    }

    /// Validate, write and cache `value` in one step.
    pub async fn set<S>(
        &mut self,
        session: &S,
        attr: A,
        value: impl Into<Value>,
        index: Option<usize>,
        vars: &[(&str, String)],
    ) -> DriverResult<Value>
    where
        S: Session + ?Sized,
    {
        let spec = self.table.spec(attr)?;
        self.key(spec, index)?;
        let admitted = self.admit(attr, value)?;
        self.write_admitted(session, admitted, index, vars).await
    }

    /// Mark every entry stale (after a reset, recall or setup load).
    pub fn invalidate_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.valid = false;
        }
        debug!("all cached attributes invalidated");
    }

    /// Whether the entry for `attr` is currently valid.
    pub fn is_valid(&self, attr: A, index: Option<usize>) -> bool {
        self.lookup(attr, index).map(|e| e.valid).unwrap_or(false)
    }

    /// Cached value of `attr`, valid or not, without any I/O.
    pub fn peek(&self, attr: A, index: Option<usize>) -> Option<&Value> {
        self.lookup(attr, index).map(|e| &e.value)
    }

    fn lookup(&self, attr: A, index: Option<usize>) -> Option<&CacheEntry> {
        let spec = self.table.spec(attr).ok()?;
        let key = self.key(spec, index).ok()?;
        self.entries.get(&key)
    }

    fn key(&self, spec: &AttributeSpec<A>, index: Option<usize>) -> DriverResult<(A, usize)> {
        let count = if spec.indexed { self.index_count() } else { 1 };
        let index = index.unwrap_or(0);
        if index >= count {
            return Err(DriverError::OutOfRange {
                target: spec.name.to_string(),
                index,
                min: 0,
                max: count.saturating_sub(1),
            });
        }
        Ok((spec.id, index))
    }

    fn entry(&self, key: (A, usize)) -> DriverResult<&CacheEntry> {
        self.entries.get(&key).ok_or_else(|| {
            DriverError::InvalidAttributeTable(format!("no cache entry for {:?}", key))
        })
    }

    fn store(&mut self, key: (A, usize), value: Value) {
        self.entries.insert(key, CacheEntry { value, valid: true });
    }

    fn commit(&mut self, key: (A, usize), value: Value) -> DriverResult<Value> {
        let stale = self.stale_after_write(key)?;
        self.store(key, value.clone());
        for target in &stale {
            if let Some(entry) = self.entries.get_mut(target) {
                entry.valid = false;
            }
        }
        if !stale.is_empty() {
            debug!(written = ?key, invalidated = ?stale, "dependent attributes invalidated");
        }
        Ok(value)
    }

    /// Entries made stale by writing `written`.
    ///
    /// Follows invalidation edges transitively, plus the derived partner of
    /// every attribute reached. Indexed targets of an indexed source share its
    /// channel; indexed targets of a scalar source are stale on every channel.
    /// The written entry itself is never included.
    fn stale_after_write(&self, written: (A, usize)) -> DriverResult<Vec<(A, usize)>> {
        let mut stale = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![written];

        while let Some((id, index)) = pending.pop() {
            let spec = self.table.spec(id)?;
            let partner = spec.derived.map(|d| d.partner);

            for target in spec.invalidates.iter().copied().chain(partner) {
                let target_spec = self.table.spec(target)?;
                let indices: Vec<usize> = match (spec.indexed, target_spec.indexed) {
                    (true, true) => vec![index],
                    (false, true) => (0..self.index_count()).collect(),
                    _ => vec![0],
                };
                for i in indices {
                    let key = (target, i);
                    if key != written && seen.insert(key) {
                        stale.push(key);
                        pending.push(key);
                    }
                }
            }
        }
        Ok(stale)
    }

    fn render(
        &self,
        template: &str,
        index: usize,
        value: Option<&str>,
        vars: &[(&str, String)],
    ) -> DriverResult<String> {
        let mut context: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if let Some(channel) = self.index_names.get(index) {
            context.insert("channel".to_string(), channel.clone());
        }
        if let Some(value) = value {
            context.insert("value".to_string(), value.to_string());
        }

        strfmt::strfmt(template, &context).map_err(|e| DriverError::Command {
            template: template.to_string(),
            reason: e.to_string(),
        })
    }
}

fn parse_reply<A>(spec: &AttributeSpec<A>, reply: &str) -> DriverResult<Value> {
    let parsed = match spec.domain {
        Domain::Closed(_) => spec
            .domain
            .choice_for_reply(reply.trim().trim_matches('"'))
            .map(|name| Value::Text(name.to_string())),
        _ => spec.kind.parse(reply),
    };
    parsed.ok_or_else(|| DriverError::Parse {
        attribute: spec.name.to_string(),
        reply: reply.to_string(),
    })
}

/// Text sent for `{value}`
fn wire_value(domain: &Domain, value: &Value) -> String {
    domain
        .token(value)
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Choice, Derived, Initial, ValueKind};
    use crate::session::MockSession;
    use tracing_test::traced_test;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Attr {
        Range,
        Rate,
        Scale,
        Span,
        Offset,
        Trigger,
        Serial,
    }

    const RANGES: &[f64] = &[0.4, 4.0, 40.0, 400.0, 1000.0];
    const RATES: &[Choice] = &[Choice::same("SLOW"), Choice::same("MED"), Choice::same("FAST")];

    static SPECS: &[AttributeSpec<Attr>] = &[
        AttributeSpec {
            domain: Domain::Ladder(RANGES),
            ..AttributeSpec::float(Attr::Range, "range", "SENSe:VOLTage:DC:RANGe", Initial::Float(1000.0))
        },
        AttributeSpec {
            kind: ValueKind::Text,
            domain: Domain::Closed(RATES),
            ..AttributeSpec::float(Attr::Rate, "ADC_rate", "SENSe:ADCRate", Initial::Text("FAST"))
        },
        AttributeSpec {
            indexed: true,
            invalidates: &[Attr::Offset],
            derived: Some(Derived {
                partner: Attr::Span,
                factor: 8.0,
            }),
            ..AttributeSpec::float(Attr::Scale, "channel_scale", ":{channel}:scale", Initial::Float(1.0))
        },
        AttributeSpec {
            indexed: true,
            invalidates: &[Attr::Offset],
            derived: Some(Derived {
                partner: Attr::Scale,
                factor: 0.125,
            }),
            ..AttributeSpec::float(Attr::Span, "channel_range", ":{channel}:range", Initial::Float(8.0))
        },
        AttributeSpec {
            indexed: true,
            ..AttributeSpec::float(Attr::Offset, "channel_offset", ":{channel}:offset", Initial::Float(0.0))
        },
        AttributeSpec {
            invalidates: &[Attr::Offset],
            ..AttributeSpec::float(Attr::Trigger, "trigger", "trigger:level", Initial::Float(0.0))
        },
        AttributeSpec {
            kind: ValueKind::Text,
            command: None,
            ..AttributeSpec::float(Attr::Serial, "serial", "serial", Initial::Text(""))
        },
    ];

    fn cache() -> CachedAttributes<Attr> {
        CachedAttributes::new(AttributeTable::new(SPECS).unwrap(), &["channel1", "channel2"])
    }

    #[tokio::test]
    async fn test_second_get_is_served_from_cache() {
        let session = MockSession::new().with_reply("SENSe:VOLTage:DC:RANGe?", "4.000000E+00");
        let mut cache = cache();

        let first = cache.get(&session, Attr::Range, None, &[]).await.unwrap();
        let second = cache.get(&session, Attr::Range, None, &[]).await.unwrap();

        assert_eq!(first, Value::Float(4.0));
        assert_eq!(second, first);
        assert_eq!(session.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_set_then_get_needs_no_round_trip() {
        let session = MockSession::new();
        let mut cache = cache();

        cache.set(&session, Attr::Range, 40.0, None, &[]).await.unwrap();
        let value = cache.get(&session, Attr::Range, None, &[]).await.unwrap();

        assert_eq!(value, Value::Float(40.0));
        assert_eq!(session.round_trips(), 0);
        assert_eq!(session.writes(), vec!["SENSe:VOLTage:DC:RANGe 40"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_snap_warns_once() {
        let session = MockSession::new();
        let mut cache = cache();

        let stored = cache.set(&session, Attr::Range, 7.0, None, &[]).await.unwrap();

        assert_eq!(stored, Value::Float(40.0));
        assert_eq!(cache.peek(Attr::Range, None), Some(&Value::Float(40.0)));
        assert!(logs_contain("snapped"));
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("WARN")).count() {
                1 => Ok(()),
                n => Err(format!("expected one warning, saw {}", n)),
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn test_clamp_warns_once() {
        let session = MockSession::new();
        let mut cache = cache();

        let stored = cache.set(&session, Attr::Range, 5000.0, None, &[]).await.unwrap();

        assert_eq!(stored, Value::Float(1000.0));
        assert!(logs_contain("clamped"));
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("WARN")).count() {
                1 => Ok(()),
                n => Err(format!("expected one warning, saw {}", n)),
            }
        });
    }

    #[test]
    fn test_admit_reports_substitution() {
        let cache = cache();

        let snapped = cache.admit(Attr::Range, 7.0).unwrap();
        assert_eq!(snapped.attribute(), Attr::Range);
        assert_eq!(snapped.value(), &Value::Float(40.0));
        assert_eq!(
            snapped.substitution(),
            Some(Substitution::Snapped {
                requested: 7.0,
                admitted: 40.0
            })
        );

        let clamped = cache.admit(Attr::Range, 5000.0).unwrap();
        assert_eq!(
            clamped.substitution(),
            Some(Substitution::Clamped {
                requested: 5000.0,
                admitted: 1000.0
            })
        );

        let exact = cache.admit(Attr::Rate, "med").unwrap();
        assert_eq!(exact.value(), &Value::Text("MED".into()));
        assert_eq!(exact.substitution(), None);
        // admitting is local
        assert!(!cache.is_valid(Attr::Range, None));
    }

    #[tokio::test]
    async fn test_rejected_value_leaves_cache_untouched() {
        let session = MockSession::new();
        let mut cache = cache();
        cache.set(&session, Attr::Rate, "slow", None, &[]).await.unwrap();

        let err = cache.set(&session, Attr::Rate, "ULTRA", None, &[]).await.unwrap_err();

        assert!(matches!(err, DriverError::UnsupportedValue { .. }));
        assert_eq!(cache.peek(Attr::Rate, None), Some(&Value::Text("SLOW".into())));
        assert!(cache.is_valid(Attr::Rate, None));
        assert_eq!(session.writes(), vec!["SENSe:ADCRate SLOW"]);
    }

    #[tokio::test]
    async fn test_closed_reply_maps_to_choice() {
        let session = MockSession::new().with_reply("SENSe:ADCRate?", "MED");
        let mut cache = cache();
        let value = cache.get(&session, Attr::Rate, None, &[]).await.unwrap();
        assert_eq!(value, Value::Text("MED".into()));
    }

    #[tokio::test]
    async fn test_unparseable_reply() {
        let session = MockSession::new().with_reply("SENSe:VOLTage:DC:RANGe?", "garbage");
        let mut cache = cache();
        let err = cache.get(&session, Attr::Range, None, &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::Parse { .. }));
        assert!(!cache.is_valid(Attr::Range, None));
    }

    #[tokio::test]
    async fn test_indexed_write_stays_on_its_channel() {
        let session = MockSession::new()
            .with_reply(":channel1:offset?", "0")
            .with_reply(":channel2:offset?", "0")
            .with_reply(":channel1:range?", "8")
            .with_reply(":channel2:range?", "8");
        let mut cache = cache();
        for channel in 0..2 {
            cache.get(&session, Attr::Span, Some(channel), &[]).await.unwrap();
            cache.get(&session, Attr::Offset, Some(channel), &[]).await.unwrap();
        }

        cache.set(&session, Attr::Scale, 0.5, Some(0), &[]).await.unwrap();

        assert_eq!(session.writes(), vec![":channel1:scale 0.5"]);
        assert!(cache.is_valid(Attr::Scale, Some(0)));
        assert!(!cache.is_valid(Attr::Span, Some(0)));
        assert!(!cache.is_valid(Attr::Offset, Some(0)));
        assert!(cache.is_valid(Attr::Scale, Some(1)));
        assert!(cache.is_valid(Attr::Span, Some(1)));
        assert!(cache.is_valid(Attr::Offset, Some(1)));
    }

    #[tokio::test]
    async fn test_scalar_write_invalidates_every_channel() {
        let session = MockSession::new()
            .with_reply(":channel1:offset?", "0")
            .with_reply(":channel2:offset?", "0");
        let mut cache = cache();
        cache.get(&session, Attr::Offset, Some(0), &[]).await.unwrap();
        cache.get(&session, Attr::Offset, Some(1), &[]).await.unwrap();

        cache.set(&session, Attr::Trigger, 0.2, None, &[]).await.unwrap();

        assert!(!cache.is_valid(Attr::Offset, Some(0)));
        assert!(!cache.is_valid(Attr::Offset, Some(1)));
    }

    #[tokio::test]
    async fn test_read_refreshes_derived_partner() {
        let session = MockSession::new().with_reply(":channel2:range?", "4");
        let mut cache = cache();

        cache.get(&session, Attr::Span, Some(1), &[]).await.unwrap();
        let scale = cache.get(&session, Attr::Scale, Some(1), &[]).await.unwrap();

        assert_eq!(scale, Value::Float(0.5));
        assert_eq!(session.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_index_out_of_range_before_io() {
        let session = MockSession::new();
        let mut cache = cache();
        let err = cache.set(&session, Attr::Scale, 1.0, Some(2), &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::OutOfRange { index: 2, max: 1, .. }));
        assert!(session.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_attribute() {
        let session = MockSession::new();
        let mut cache = cache();
        let err = cache.set(&session, Attr::Serial, "x", None, &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::ReadOnly("serial")));
    }

    #[tokio::test]
    async fn test_simulate_skips_io() {
        let session = MockSession::simulated();
        let mut cache = cache();

        assert_eq!(cache.get(&session, Attr::Range, None, &[]).await.unwrap(), Value::Float(1000.0));
        cache.set(&session, Attr::Range, 0.4, None, &[]).await.unwrap();
        assert_eq!(cache.get(&session, Attr::Range, None, &[]).await.unwrap(), Value::Float(0.4));
        assert!(session.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_all_forces_requery() {
        let session = MockSession::new();
        let mut cache = cache();
        cache.set(&session, Attr::Trigger, 0.1, None, &[]).await.unwrap();

        cache.invalidate_all();

        assert!(!cache.is_valid(Attr::Trigger, None));
        assert_eq!(cache.get(&session, Attr::Trigger, None, &[]).await.unwrap(), Value::Float(0.1));
        assert_eq!(session.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_extra_template_vars() {
        static PATHED: &[AttributeSpec<Attr>] = &[AttributeSpec::float(
            Attr::Range,
            "range",
            "SENSe:{range_path}:RANGe",
            Initial::Float(1.0),
        )];
        let session = MockSession::new();
        let mut cache = CachedAttributes::new(AttributeTable::new(PATHED).unwrap(), &[]);

        cache
            .set(&session, Attr::Range, 4.0, None, &[("range_path", "CURRent:AC".to_string())])
            .await
            .unwrap();

        assert_eq!(session.writes(), vec!["SENSe:CURRent:AC:RANGe 4"]);
    }

    #[tokio::test]
    async fn test_missing_template_var_is_a_command_error() {
        static PATHED: &[AttributeSpec<Attr>] = &[AttributeSpec::float(
            Attr::Range,
            "range",
            "SENSe:{range_path}:RANGe",
            Initial::Float(1.0),
        )];
        let session = MockSession::new();
        let mut cache = CachedAttributes::new(AttributeTable::new(PATHED).unwrap(), &[]);

        let err = cache.set(&session, Attr::Range, 4.0, None, &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::Command { .. }));
        assert!(session.writes().is_empty());
    }
}
