//! Localized labels with `%placeholder%` substitution.
//!
//! Labels are grouped per template: `template -> key -> lang -> text`.
//! A [`LabelGetter`] is bound to one table and a default language and is
//! exposed to templates as the `__` function:
//!
//! ```text
//! {{ __("hello", {"username": username}) }}
//! {{ __("goToOA", "fr") }}
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Labels of a single template: `key -> lang -> text`
pub type LabelTable = HashMap<String, HashMap<String, String>>;

/// Errors raised while loading translation files
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Failed to read translations file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid translations file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Label tables for every template, keyed by template name
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, LabelTable>")]
pub struct Translations {
    labels: HashMap<String, Arc<LabelTable>>,
}

impl From<HashMap<String, LabelTable>> for Translations {
    fn from(labels: HashMap<String, LabelTable>) -> Self {
        Self::new(labels)
    }
}

impl Translations {
    pub fn new(labels: HashMap<String, LabelTable>) -> Self {
        Self {
            labels: labels
                .into_iter()
                .map(|(template, table)| (template, Arc::new(table)))
                .collect(),
        }
    }

    /// Load translations from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| LabelError::Read {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| LabelError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Label table of a template (empty when the template has no labels)
    pub fn table(&self, template: &str) -> Arc<LabelTable> {
        self.labels.get(template).cloned().unwrap_or_default()
    }

    /// Build a getter for a template bound to a default language
    pub fn getter(&self, template: &str, lang: &str) -> LabelGetter {
        LabelGetter::new(self.table(template), lang)
    }

    /// Languages known by at least one label of a template, sorted
    pub fn languages(&self, template: &str) -> Vec<String> {
        let Some(table) = self.labels.get(template) else {
            return Vec::new();
        };

        table
            .values()
            .flat_map(|by_lang| by_lang.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

type LabelFn = dyn Fn(&str, &Map<String, Value>, Option<&str>) -> String + Send + Sync;

/// Resolves label keys to localized text.
///
/// Cheap to clone; every clone shares the same table.
#[derive(Clone)]
pub struct LabelGetter {
    inner: Arc<LabelFn>,
}

impl LabelGetter {
    /// Getter over a label table, falling back to `default_lang`
    pub fn new(labels: Arc<LabelTable>, default_lang: impl Into<String>) -> Self {
        let default_lang = default_lang.into();

        Self::from_fn(move |key, values, lang| {
            let lang = lang.filter(|l| !l.is_empty()).unwrap_or(default_lang.as_str());
            resolve(&labels, key, values, lang)
        })
    }

    /// Getter backed by an arbitrary function, used to override label lookup
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>, Option<&str>) -> String + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Resolve `key` with substitutions, optionally in another language
    pub fn get(&self, key: &str, values: &Map<String, Value>, lang: Option<&str>) -> String {
        (self.inner)(key, values, lang)
    }

    /// Resolve `key` using the loose calling convention of templates.
    ///
    /// A string in the substitutions position is a language override.
    pub fn call(&self, key: &str, values: Option<&Value>, lang: Option<&str>) -> String {
        match (values, lang) {
            (Some(Value::String(lang)), None) => self.get(key, &Map::new(), Some(lang)),
            (Some(Value::Object(values)), lang) => self.get(key, values, lang),
            (_, lang) => self.get(key, &Map::new(), lang),
        }
    }

    /// Expose the getter as a template function
    pub(crate) fn to_template_value(&self) -> minijinja::Value {
        let getter = self.clone();

        minijinja::Value::from_function(
            move |key: String, values: Option<minijinja::Value>, lang: Option<String>| -> String {
                let values = values.and_then(|v| serde_json::to_value(&v).ok());
                getter.call(&key, values.as_ref(), lang.as_deref())
            },
        )
    }
}

impl fmt::Debug for LabelGetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelGetter").finish_non_exhaustive()
    }
}

/// Look up `key` in `labels` for `lang` and substitute every `%name%`.
///
/// Unknown keys resolve to the key itself.
pub fn resolve(labels: &LabelTable, key: &str, values: &Map<String, Value>, lang: &str) -> String {
    let mut label = labels
        .get(key)
        .and_then(|by_lang| by_lang.get(lang))
        .map(String::as_str)
        .unwrap_or(key)
        .to_string();

    for (name, value) in values {
        let placeholder = format!("%{}%", name);
        if label.contains(&placeholder) {
            label = label.replace(&placeholder, &display_value(value));
        }
    }

    label
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hello_table() -> Arc<LabelTable> {
        let translations: Translations = serde_json::from_value(json!({
            "helloWorld-i18n": {
                "hello": { "fr": "Salut %username%", "en": "Hello %username%" },
                "goToOA": { "fr": "Aller sur OpenAgenda", "en": "Go to OpenAgenda" }
            }
        }))
        .unwrap();

        translations.table("helloWorld-i18n")
    }

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_key_falls_back_to_key() {
        let getter = LabelGetter::new(Arc::new(LabelTable::new()), "en");
        assert_eq!(getter.get("goToOA", &Map::new(), None), "goToOA");
    }

    #[test]
    fn test_missing_language_falls_back_to_key() {
        let getter = LabelGetter::new(hello_table(), "de");
        assert_eq!(getter.get("goToOA", &Map::new(), None), "goToOA");
    }

    #[test]
    fn test_substitutes_every_occurrence() {
        let mut table = LabelTable::new();
        table.insert(
            "greet".to_string(),
            HashMap::from([("en".to_string(), "Hello %username%, %username%!".to_string())]),
        );
        let getter = LabelGetter::new(Arc::new(table), "en");

        let label = getter.get("greet", &values(json!({"username": "Kim"})), None);
        assert_eq!(label, "Hello Kim, Kim!");
    }

    #[test]
    fn test_default_and_override_language() {
        let getter = LabelGetter::new(hello_table(), "en");
        let vars = values(json!({"username": "bertho"}));

        assert_eq!(getter.get("hello", &vars, None), "Hello bertho");
        assert_eq!(getter.get("hello", &vars, Some("fr")), "Salut bertho");
        assert_eq!(getter.get("hello", &vars, Some("")), "Hello bertho");
    }

    #[test]
    fn test_string_in_values_position_is_language() {
        let getter = LabelGetter::new(hello_table(), "en");

        assert_eq!(
            getter.call("goToOA", Some(&json!("fr")), None),
            "Aller sur OpenAgenda"
        );
        assert_eq!(getter.call("goToOA", None, None), "Go to OpenAgenda");
    }

    #[test]
    fn test_non_string_values_are_displayed() {
        let mut table = LabelTable::new();
        table.insert(
            "count".to_string(),
            HashMap::from([("en".to_string(), "%n% events, public: %public%%none%".to_string())]),
        );

        let label = resolve(
            &table,
            "count",
            &values(json!({"n": 3, "public": true, "none": null})),
            "en",
        );
        assert_eq!(label, "3 events, public: true");
    }

    #[test]
    fn test_languages_are_sorted_and_unique() {
        let translations: Translations = serde_json::from_value(json!({
            "t": {
                "a": { "fr": "a", "en": "a" },
                "b": { "en": "b", "de": "b" }
            }
        }))
        .unwrap();

        assert_eq!(translations.languages("t"), vec!["de", "en", "fr"]);
        assert!(translations.languages("unknown").is_empty());
    }

    #[test]
    fn test_custom_getter() {
        let getter = LabelGetter::from_fn(|key, _, lang| format!("{}:{}", lang.unwrap_or("-"), key));
        assert_eq!(getter.get("k", &Map::new(), Some("fr")), "fr:k");
    }
}
