//! Input validation applied before a value crosses into native code

use crate::ffi::CTypeKind;
use crate::value::{Value, ValueType};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::trace;

/// Structural description of a native-shaped value: its type kind, its
/// exact C spelling and whether a null pointer is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckMapping {
    pub kind: CTypeKind,
    pub cname: String,
    pub nullable: bool,
}

impl CheckMapping {
    pub fn new(kind: CTypeKind, cname: impl Into<String>, nullable: bool) -> Self {
        CheckMapping {
            kind,
            cname: cname.into(),
            nullable,
        }
    }

    /// A nullable mapping also accepts `None` and the untyped null `void *`.
    /// A null pointer of any other type must have the mapping's own spelling.
    pub fn matches(&self, value: &Value) -> bool {
        match value {
            Value::None => self.nullable,
            Value::Data(data) => {
                (data.kind() == self.kind && data.cname() == self.cname)
                    || (self.nullable && data.is_null() && data.cname() == "void *")
            }
            _ => false,
        }
    }
}

impl fmt::Display for CheckMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{} '{}' or null", self.kind, self.cname)
        } else {
            write!(f, "{} '{}'", self.kind, self.cname)
        }
    }
}

/// What a single input must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum InputRule {
    /// The value's type must be one of these.
    Types(Vec<ValueType>),
    /// The value must equal one of these, compared numerically across
    /// `Bool`, `Int` and `Float`.
    AllowedValues(Vec<Value>),
    NativeShape(CheckMapping),
    /// Text that can be handed to a native wide-string API unchanged.
    Utf8Text,
}

impl InputRule {
    /// An opaque native handle: a non-null `void *`.
    pub fn handle() -> Self {
        InputRule::NativeShape(CheckMapping::new(CTypeKind::Pointer, "void *", false))
    }

    pub fn types(types: &[ValueType]) -> Self {
        InputRule::Types(types.to_vec())
    }

    pub fn allowed_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        InputRule::AllowedValues(values.into_iter().map(Into::into).collect())
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            InputRule::Types(types) => types.contains(&value.value_type()),
            InputRule::AllowedValues(allowed) => allowed.iter().any(|a| a.loosely_eq(value)),
            InputRule::NativeShape(mapping) => mapping.matches(value),
            InputRule::Utf8Text => match value {
                Value::Text(_) => true,
                Value::WideText(units) => String::from_utf16(units).is_ok(),
                _ => false,
            },
        }
    }

    fn failure_message(&self, name: &str, value: &Value) -> String {
        match self {
            InputRule::Types(types) => format!(
                "Expected type(s) {} for {}. Got {} instead.",
                tuple(types.iter()),
                name,
                value.value_type()
            ),
            InputRule::AllowedValues(allowed) => format!(
                "Expected value for {} to be in {}. Got {} instead.",
                name,
                tuple(allowed.iter()),
                value
            ),
            InputRule::NativeShape(mapping) => {
                format!("Expected {} to be {}. Got {} instead.", name, mapping, value)
            }
            InputRule::Utf8Text => {
                format!("Expected unicode text for {}. Got {} instead.", name, value)
            }
        }
    }
}

impl fmt::Display for InputRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRule::Types(types) => write!(f, "types {}", tuple(types.iter())),
            InputRule::AllowedValues(values) => write!(f, "values {}", tuple(values.iter())),
            InputRule::NativeShape(mapping) => write!(f, "{}", mapping),
            InputRule::Utf8Text => f.write_str("unicode text"),
        }
    }
}

/// Renders items the way a tuple literal reads: `(2,)`, `(1, 2)`.
fn tuple<T: fmt::Display>(items: impl Iterator<Item = T>) -> String {
    let rendered: Vec<String> = items.map(|item| item.to_string()).collect();
    match rendered.len() {
        1 => format!("({},)", rendered[0]),
        _ => format!("({})", rendered.join(", ")),
    }
}

/// Raised when an input fails its rule. The native call is never made.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct InputError {
    pub name: String,
    /// Display form of the rejected value
    pub value: String,
    pub value_type: ValueType,
    pub rule: InputRule,
    pub message: String,
}

impl InputError {
    pub fn allowed_values(&self) -> Option<&[Value]> {
        match &self.rule {
            InputRule::AllowedValues(values) => Some(values),
            _ => None,
        }
    }

    pub fn allowed_types(&self) -> Option<&[ValueType]> {
        match &self.rule {
            InputRule::Types(types) => Some(types),
            _ => None,
        }
    }
}

/// Checks `value`, named `name` in error messages, against `rule`.
pub fn input_check(name: &str, value: &Value, rule: &InputRule) -> Result<(), InputError> {
    let passed = rule.accepts(value);
    trace!(input = name, value = %value, rule = %rule, passed, "input check");

    if passed {
        return Ok(());
    }

    Err(InputError {
        name: name.to_string(),
        value: value.to_string(),
        value_type: value.value_type(),
        rule: rule.clone(),
        message: rule.failure_message(name, value),
    })
}

/// Saved contents of a `MappingTable`
#[derive(Debug, Clone, PartialEq)]
pub struct MappingSnapshot(IndexMap<String, CheckMapping>);

/// Named native-shape mappings
pub struct MappingTable {
    mappings: RwLock<IndexMap<String, CheckMapping>>,
}

impl MappingTable {
    /// A table holding the built-in mappings.
    pub fn new() -> Self {
        let table = Self::empty();
        table.register("handle", CheckMapping::new(CTypeKind::Pointer, "void *", false));
        table.register(
            "overlapped",
            CheckMapping::new(CTypeKind::Array, "OVERLAPPED[1]", true),
        );
        table.register(
            "security_attributes",
            CheckMapping::new(CTypeKind::Pointer, "SECURITY_ATTRIBUTES *", true),
        );
        table
    }

    pub fn empty() -> Self {
        MappingTable {
            mappings: RwLock::new(IndexMap::new()),
        }
    }

    /// The process-wide table used by wrapped operations.
    pub fn global() -> &'static MappingTable {
        static GLOBAL: OnceLock<MappingTable> = OnceLock::new();
        GLOBAL.get_or_init(MappingTable::new)
    }

    /// Adds or replaces a mapping, returning the one it replaced.
    pub fn register(&self, name: &str, mapping: CheckMapping) -> Option<CheckMapping> {
        self.mappings.write().insert(name.to_string(), mapping)
    }

    pub fn get(&self, name: &str) -> Option<CheckMapping> {
        self.mappings.read().get(name).cloned()
    }

    pub fn rule(&self, name: &str) -> Option<InputRule> {
        self.get(name).map(InputRule::NativeShape)
    }

    pub fn names(&self) -> Vec<String> {
        self.mappings.read().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot(self.mappings.read().clone())
    }

    pub fn restore(&self, snapshot: MappingSnapshot) {
        *self.mappings.write() = snapshot.0;
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new()
    }
}
