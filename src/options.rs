//! Compiler option bundle carried by each record.
//!
//! The schema belongs to the compiler front-end; numeric enumerations
//! (output kind, optimization level, severities, language version, checksum
//! algorithm) are small integers this crate transports without interpreting.

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered string-keyed map encoded as a sequence of `[key, value]` pairs.
///
/// Keys are not required to be unique on the wire; decoding keeps the first
/// position of a key and the last value written for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins; the key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
        for entry in &self.entries {
            seq.serialize_element(entry)?;
        }
        seq.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor<V>(std::marker::PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a sequence of [key, value] pairs")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = seq.next_element::<(String, V)>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_seq(PairsVisitor(std::marker::PhantomData))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationOptions {
    pub output_kind: u8,
    pub optimization_level: u8,
    pub platform: u8,
    pub module_name: Option<String>,
    pub main_type_name: Option<String>,
    pub script_class_name: Option<String>,
    pub allow_unsafe: bool,
    pub check_overflow: bool,
    pub concurrent_build: bool,
    pub deterministic: bool,
    pub nullable_context: u8,
    pub warning_level: u8,
    pub general_diagnostic_option: u8,
    /// Per-diagnostic severity overrides (id → severity).
    pub specific_diagnostic_options: OrderedMap<u8>,
    pub crypto_key_container: Option<String>,
    pub crypto_key_file: Option<String>,
    pub delay_sign: Option<bool>,
    pub public_sign: bool,
    pub usings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub language_version: u16,
    pub documentation_mode: u8,
    pub source_kind: u8,
    pub preprocessor_symbols: Vec<String>,
    /// Feature flags (`/features:name=value`).
    pub features: OrderedMap<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitOptions {
    pub debug_information_format: u8,
    pub checksum_algorithm: u8,
    pub emit_metadata_only: bool,
    pub include_private_members: bool,
    pub high_entropy_virtual_address_space: bool,
    pub file_alignment: u32,
    pub base_address: u64,
    pub pdb_file_path: Option<String>,
    pub output_name_override: Option<String>,
    pub subsystem_version: Option<String>,
    pub runtime_metadata_version: Option<String>,
    pub default_source_file_encoding: Option<String>,
    pub instrumentation_kinds: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsBundle {
    pub compilation: CompilationOptions,
    pub parse: ParseOptions,
    pub emit: EmitOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_last_write_wins() {
        let map: OrderedMap<u8> =
            serde_json::from_str(r#"[["CS1591", 0], ["CS0618", 2], ["CS1591", 3]]"#)
                .expect("decode");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("CS1591"), Some(&3));
        let keys: Vec<_> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["CS1591", "CS0618"]);
    }

    #[test]
    fn map_preserves_insertion_order_on_the_wire() {
        let map: OrderedMap<String> = [("b", "1".to_string()), ("a", "2".to_string())]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&map).expect("encode");
        assert_eq!(json, r#"[["b","1"],["a","2"]]"#);
    }

    #[test]
    fn missing_option_fields_default() {
        let bundle: OptionsBundle =
            serde_json::from_str(r#"{"parse":{"language_version":1100}}"#).expect("decode");
        assert_eq!(bundle.parse.language_version, 1100);
        assert_eq!(bundle.compilation, CompilationOptions::default());
    }
}
