//! Typed property lookup for modules and session policy
//!
//! The `[properties]` table of the configuration file is flattened into
//! dotted keys (`module.x11.xres`, `session.timeout`) and served through the
//! [`ConfigAccessor`] trait. Keys are case-insensitive. A value set for a
//! specific session takes precedence over the global value.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Number(i64),
    /// Free-form text
    String(String),
}

/// Read-only property access handed to modules and policy code
pub trait ConfigAccessor: Send + Sync {
    /// Boolean property for a session
    fn get_bool(&self, session_id: u32, key: &str) -> Option<bool>;

    /// Integer property for a session
    fn get_number(&self, session_id: u32, key: &str) -> Option<i64>;

    /// String property for a session
    fn get_string(&self, session_id: u32, key: &str) -> Option<String>;
}

/// Global properties plus per-session overrides
#[derive(Debug, Default)]
pub struct PropertyStore {
    global: BTreeMap<String, PropertyValue>,
    sessions: RwLock<HashMap<u32, BTreeMap<String, PropertyValue>>>,
}

fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

impl PropertyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a TOML table into dotted keys
    pub fn from_table(table: &toml::Table) -> Self {
        let mut store = Self::new();
        for (key, value) in table {
            store.insert_value(key, value);
        }
        store
    }

    fn insert_value(&mut self, key: &str, value: &toml::Value) {
        match value {
            toml::Value::Table(table) => {
                for (child, value) in table {
                    self.insert_value(&format!("{}.{}", key, child), value);
                }
            }
            toml::Value::Boolean(b) => self.set(key, PropertyValue::Bool(*b)),
            toml::Value::Integer(i) => self.set(key, PropertyValue::Number(*i)),
            toml::Value::String(s) => self.set(key, PropertyValue::String(s.clone())),
            toml::Value::Float(f) => self.set(key, PropertyValue::Number(f.round() as i64)),
            other => warn!("Ignoring property {} with unsupported type {}", key, other.type_str()),
        }
    }

    /// Set a global property
    pub fn set(&mut self, key: &str, value: PropertyValue) {
        self.global.insert(normalize(key), value);
    }

    /// Set a property for one session only
    pub fn set_session_override(&self, session_id: u32, key: &str, value: PropertyValue) {
        self.sessions
            .write()
            .entry(session_id)
            .or_default()
            .insert(normalize(key), value);
    }

    /// Drop all overrides of a session
    pub fn clear_session(&self, session_id: u32) {
        self.sessions.write().remove(&session_id);
    }

    /// Number of global properties
    pub fn len(&self) -> usize {
        self.global.len()
    }

    /// True when no global property is set
    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    fn lookup(&self, session_id: u32, key: &str) -> Option<PropertyValue> {
        let key = normalize(key);
        if let Some(value) = self
            .sessions
            .read()
            .get(&session_id)
            .and_then(|overrides| overrides.get(&key))
        {
            return Some(value.clone());
        }
        self.global.get(&key).cloned()
    }
}

impl ConfigAccessor for PropertyStore {
    fn get_bool(&self, session_id: u32, key: &str) -> Option<bool> {
        match self.lookup(session_id, key)? {
            PropertyValue::Bool(b) => Some(b),
            PropertyValue::Number(n) => Some(n != 0),
            PropertyValue::String(s) => s.parse().ok(),
        }
    }

    fn get_number(&self, session_id: u32, key: &str) -> Option<i64> {
        match self.lookup(session_id, key)? {
            PropertyValue::Number(n) => Some(n),
            PropertyValue::String(s) => s.trim().parse().ok(),
            PropertyValue::Bool(_) => None,
        }
    }

    fn get_string(&self, session_id: u32, key: &str) -> Option<String> {
        match self.lookup(session_id, key)? {
            PropertyValue::String(s) => Some(s),
            PropertyValue::Number(n) => Some(n.to_string()),
            PropertyValue::Bool(b) => Some(b.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(source: &str) -> PropertyStore {
        let table: toml::Table = toml::from_str(source).unwrap();
        PropertyStore::from_table(&table)
    }

    #[test]
    fn test_nested_tables_flatten_to_dotted_keys() {
        let props = store(
            r#"
            [session]
            timeout = 5

            [module.X11]
            xres = 1920
            minXRes = 640
            "#,
        );

        assert_eq!(props.get_number(1, "session.timeout"), Some(5));
        assert_eq!(props.get_number(1, "module.X11.xres"), Some(1920));
        assert_eq!(props.get_number(1, "module.x11.minxres"), Some(640));
        assert_eq!(props.get_number(1, "module.X11.yres"), None);
    }

    #[test]
    fn test_session_override_wins() {
        let props = store("[session]\ntimeout = 5\n");
        props.set_session_override(7, "session.timeout", PropertyValue::Number(-1));

        assert_eq!(props.get_number(7, "session.timeout"), Some(-1));
        assert_eq!(props.get_number(8, "session.timeout"), Some(5));

        props.clear_session(7);
        assert_eq!(props.get_number(7, "session.timeout"), Some(5));
    }

    #[test]
    fn test_type_coercion() {
        let props = store("flag = true\nname = \"42\"\n");

        assert_eq!(props.get_bool(0, "flag"), Some(true));
        assert_eq!(props.get_number(0, "flag"), None);
        assert_eq!(props.get_number(0, "name"), Some(42));
        assert_eq!(props.get_string(0, "flag"), Some("true".to_string()));
    }
}
