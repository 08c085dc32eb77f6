//! Declarative instrument attributes
//!
//! Each driver describes its settings once, as a static table of
//! [`AttributeSpec`]s: how to query and set the attribute, which values the
//! instrument admits, which other cached attributes a write makes stale, and
//! whether the attribute exists once per channel.
//!
//! The table is checked when the driver is built ([`AttributeTable::new`]) so a
//! malformed table fails fast instead of corrupting the cache at runtime.
//!
//! # Example
//!
//! ```
//! use rust_ivi::attribute::{AttributeSpec, AttributeTable, Domain, Initial, ValueKind};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Attr {
//!     Scale,
//!     Range,
//! }
//!
//! static TABLE: &[AttributeSpec<Attr>] = &[
//!     AttributeSpec {
//!         derived: Some(rust_ivi::attribute::Derived { partner: Attr::Range, factor: 10.0 }),
//!         ..AttributeSpec::float(Attr::Scale, "scale", "timebase:scale", Initial::Float(1e-4))
//!     },
//!     AttributeSpec {
//!         derived: Some(rust_ivi::attribute::Derived { partner: Attr::Scale, factor: 0.1 }),
//!         ..AttributeSpec::float(Attr::Range, "range", "timebase:range", Initial::Float(1e-3))
//!     },
//! ];
//!
//! let table = AttributeTable::new(TABLE).unwrap();
//! assert_eq!(table.spec(Attr::Scale).unwrap().name, "scale");
//! ```

pub mod cache;
pub mod domain;

pub use cache::{Admitted, CacheEntry, CachedAttributes};
pub use domain::{Choice, Domain, Substitution};

use crate::error::{DriverError, DriverResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Identifier of an attribute within one driver's table
pub trait AttributeId: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> AttributeId for T where T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Floating point quantity (volts, seconds, ...)
    Float(f64),
    /// Integer quantity
    Int(i64),
    /// On/off setting
    Bool(bool),
    /// Enumerated or free text setting
    Text(String),
}

impl Value {
    /// Numeric view of the value (integers widen to floats)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view of the value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view of the value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Float(_) => ValueKind::Float,
            Value::Int(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
            Value::Text(_) => ValueKind::Text,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", if *v { "ON" } else { "OFF" }),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Kind of value an attribute holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// `Value::Float`
    Float,
    /// `Value::Int`
    Int,
    /// `Value::Bool`
    Bool,
    /// `Value::Text`
    Text,
}

impl ValueKind {
    /// Convert `value` to this kind where the conversion is lossless
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (ValueKind::Float, Value::Int(v)) => Some(Value::Float(v as f64)),
            (ValueKind::Int, Value::Float(v)) => integral(v).map(Value::Int),
            (kind, value) if value.kind() == kind => Some(value),
            _ => None,
        }
    }

    /// Parse an instrument reply into a value of this kind
    pub fn parse(self, reply: &str) -> Option<Value> {
        let reply = reply.trim().trim_matches('"');
        match self {
            ValueKind::Float => reply.parse().ok().map(Value::Float),
            ValueKind::Int => reply
                .parse()
                .ok()
                .or_else(|| reply.parse::<f64>().ok().and_then(integral))
                .map(Value::Int),
            ValueKind::Bool => match reply.to_ascii_uppercase().as_str() {
                "1" | "ON" => Some(Value::Bool(true)),
                "0" | "OFF" => Some(Value::Bool(false)),
                _ => None,
            },
            ValueKind::Text => Some(Value::Text(reply.to_string())),
        }
    }
}

/// `v` as an integer when it is integral and fits in an `i64`
fn integral(v: f64) -> Option<i64> {
    // 2^63; `i64::MAX as f64` rounds up to this and would saturate
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (v.fract() == 0.0 && (-LIMIT..LIMIT).contains(&v)).then(|| v as i64)
}

/// Value a cache entry is seeded with at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initial {
    /// Seed a float
    Float(f64),
    /// Seed an integer
    Int(i64),
    /// Seed a boolean
    Bool(bool),
    /// Seed text
    Text(&'static str),
}

impl Initial {
    /// Materialize the seed as a value
    pub fn value(self) -> Value {
        match self {
            Initial::Float(v) => Value::Float(v),
            Initial::Int(v) => Value::Int(v),
            Initial::Bool(v) => Value::Bool(v),
            Initial::Text(v) => Value::Text(v.to_string()),
        }
    }
}

/// Second unit of the same physical quantity (`partner = value * factor`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived<A> {
    /// The other member of the pair
    pub partner: A,
    /// Multiplier from this attribute to the partner
    pub factor: f64,
}

/// Static description of one attribute
///
/// Templates are rendered with `strfmt`: `{value}` is the wire form of the
/// value being written, `{channel}` the channel name for indexed attributes,
/// and drivers may supply further placeholders of their own.
#[derive(Debug, Clone, Copy)]
pub struct AttributeSpec<A: 'static> {
    /// Identifier
    pub id: A,
    /// Name used in logs and errors
    pub name: &'static str,
    /// Kind of the cached value
    pub kind: ValueKind,
    /// Query template; `None` means the cached value is all there is
    pub query: Option<&'static str>,
    /// Write template; `None` means read-only
    pub command: Option<&'static str>,
    /// Admitted values
    pub domain: Domain,
    /// Attributes made stale by writing this one
    pub invalidates: &'static [A],
    /// One entry per channel instead of a single entry
    pub indexed: bool,
    /// Other unit of the same quantity, refreshed together on reads
    pub derived: Option<Derived<A>>,
    /// Seed value
    pub initial: Initial,
}

impl<A: 'static> AttributeSpec<A> {
    /// Scalar float attribute with `<stem>?` / `<stem> {value}` templates
    pub const fn float(id: A, name: &'static str, stem: &'static str, initial: Initial) -> Self {
        Self {
            id,
            name,
            kind: ValueKind::Float,
            query: Some(stem),
            command: Some(stem),
            domain: Domain::Any,
            invalidates: &[],
            indexed: false,
            derived: None,
            initial,
        }
    }
}

/// Query text for an attribute (`stem` + `?` unless the template already ends in one)
pub(crate) fn query_template(template: &str) -> String {
    if template.trim_end().ends_with('?') {
        template.to_string()
    } else {
        format!("{}?", template)
    }
}

/// Command text for an attribute (`stem {value}` unless the template carries `{value}`)
pub(crate) fn command_template(template: &str) -> String {
    if template.contains("{value}") {
        template.to_string()
    } else {
        format!("{} {{value}}", template)
    }
}

/// A validated attribute table
#[derive(Debug)]
pub struct AttributeTable<A: 'static> {
    specs: &'static [AttributeSpec<A>],
    positions: HashMap<A, usize>,
}

impl<A: AttributeId> AttributeTable<A> {
    /// Validate `specs` and index it by id.
    ///
    /// Rejects duplicate ids, dangling or self invalidation targets, cycles in
    /// the invalidation graph, derived pairs that do not point back at each
    /// other with reciprocal factors, empty domains and seeds of the wrong kind.
    pub fn new(specs: &'static [AttributeSpec<A>]) -> DriverResult<Self> {
        let mut positions = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if positions.insert(spec.id, i).is_some() {
                return Err(malformed(format!("duplicate attribute '{}'", spec.name)));
            }
        }
        let table = Self { specs, positions };

        for spec in specs {
            table.check_spec(spec)?;
        }
        table.check_acyclic()?;
        Ok(table)
    }

    /// Look up the attribute entry for `id`
    pub fn spec(&self, id: A) -> DriverResult<&'static AttributeSpec<A>> {
        let specs = self.specs;
        self.positions
            .get(&id)
            .map(|i| &specs[*i])
            .ok_or_else(|| malformed(format!("unknown attribute {:?}", id)))
    }

    /// All specs in declaration order
    pub fn specs(&self) -> &'static [AttributeSpec<A>] {
        self.specs
    }

    fn check_spec(&self, spec: &AttributeSpec<A>) -> DriverResult<()> {
        if spec.initial.value().kind() != spec.kind {
            return Err(malformed(format!(
                "'{}' is seeded with {:?}, expected {:?}",
                spec.name, spec.initial, spec.kind
            )));
        }

        match spec.domain {
            Domain::Any => {}
            Domain::Ladder(rungs) => {
                if spec.kind != ValueKind::Float {
                    return Err(malformed(format!("ladder on non-float '{}'", spec.name)));
                }
                if rungs.is_empty() || rungs.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(malformed(format!(
                        "ladder of '{}' must be non-empty and strictly ascending",
                        spec.name
                    )));
                }
                if !matches!(spec.domain.admit(spec.name, spec.initial.value()), Ok((_, None))) {
                    return Err(malformed(format!(
                        "seed of '{}' is not a rung of its ladder",
                        spec.name
                    )));
                }
            }
            Domain::Closed(choices) => {
                if spec.kind != ValueKind::Text || choices.is_empty() {
                    return Err(malformed(format!(
                        "closed set of '{}' must be non-empty text",
                        spec.name
                    )));
                }
                if spec.domain.admit(spec.name, spec.initial.value()).is_err() {
                    return Err(malformed(format!(
                        "seed of '{}' is not an admitted choice",
                        spec.name
                    )));
                }
            }
        }

        for target in spec.invalidates {
            if *target == spec.id {
                return Err(malformed(format!("'{}' invalidates itself", spec.name)));
            }
            self.spec(*target)?;
        }

        if let Some(derived) = spec.derived {
            let partner = self.spec(derived.partner)?;
            let reciprocal = partner
                .derived
                .filter(|back| back.partner == spec.id)
                .map(|back| (back.factor * derived.factor - 1.0).abs() < 1e-9)
                .unwrap_or(false);
            if !reciprocal || partner.indexed != spec.indexed || derived.partner == spec.id {
                return Err(malformed(format!(
                    "'{}' and '{}' are not a reciprocal derived pair",
                    spec.name, partner.name
                )));
            }
        }
        Ok(())
    }

    /// Depth-first search for a cycle in the invalidation graph
    fn check_acyclic(&self) -> DriverResult<()> {
        fn visit<A: AttributeId>(
            table: &AttributeTable<A>,
            id: A,
            path: &mut Vec<A>,
            done: &mut HashSet<A>,
        ) -> DriverResult<()> {
            if done.contains(&id) {
                return Ok(());
            }
            if path.contains(&id) {
                return Err(malformed(format!("invalidation cycle through {:?}", id)));
            }
            path.push(id);
            for target in table.spec(id)?.invalidates {
                visit(table, *target, path, done)?;
            }
            path.pop();
            done.insert(id);
            Ok(())
        }

        let mut done = HashSet::new();
        for spec in self.specs {
            visit(self, spec.id, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }
}

fn malformed(reason: String) -> DriverError {
    DriverError::InvalidAttributeTable(reason)
}
