//! Typed, read-only access to a notifier's persisted settings.
//!
//! Channel factories are the only place settings are read. Each factory
//! turns the generic map into typed fields once, at construction time.

use crate::notification::NotifyError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The raw settings map of a notifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Map<String, Value>);

impl Settings {
    /// Wraps an already parsed settings map.
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Returns the raw JSON value at `key`, without any type check.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether `key` holds a non-null, non-empty value.
    pub fn is_set(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Returns the string at `key`. Missing, null and blank values are `None`.
    pub fn get_string(&self, key: &str) -> Result<Option<String>, NotifyError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(NotifyError::validation(format!(
                "setting `{}` must be a string, got {}",
                key, other
            ))),
        }
    }

    /// Like `get_string`, but an unset value is a validation error.
    pub fn require_string(&self, key: &str) -> Result<String, NotifyError> {
        self.get_string(key)?.ok_or_else(|| {
            NotifyError::validation(format!("could not find `{}` property in settings", key))
        })
    }

    /// Returns the boolean at `key`, or `default` when unset.
    ///
    /// The strings `"true"` and `"false"` are accepted as well.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, NotifyError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(default),
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(NotifyError::validation(format!(
                    "setting `{}` must be a boolean, got {:?}",
                    key, s
                ))),
            },
            Some(other) => Err(NotifyError::validation(format!(
                "setting `{}` must be a boolean, got {}",
                key, other
            ))),
        }
    }

    /// Returns the absolute http(s) URL at `key`.
    pub fn get_url(&self, key: &str) -> Result<Option<String>, NotifyError> {
        let Some(raw) = self.get_string(key)? else {
            return Ok(None);
        };
        let url = reqwest::Url::parse(raw.trim()).map_err(|e| {
            NotifyError::validation(format!("setting `{}` is not a valid url: {}", key, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(Some(url.to_string())),
            scheme => Err(NotifyError::validation(format!(
                "setting `{}` must be an http(s) url, got scheme `{}`",
                key, scheme
            ))),
        }
    }

    /// Like `get_url`, but an unset value is a validation error.
    pub fn require_url(&self, key: &str) -> Result<String, NotifyError> {
        self.get_url(key)?.ok_or_else(|| {
            NotifyError::validation(format!("could not find `{}` property in settings", key))
        })
    }
}

impl From<Map<String, Value>> for Settings {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The type of a recognized setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Bool,
    Url,
}

/// Describes one setting a channel recognizes.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub kind: OptionKind,
    pub default: Option<Value>,
    pub required: bool,
}

impl OptionSpec {
    /// An option that must be set for the notifier to build.
    pub fn required(key: &'static str, kind: OptionKind) -> Self {
        Self {
            key,
            kind,
            default: None,
            required: true,
        }
    }

    /// An option that may be left unset.
    ///
    /// # Arguments
    ///
    /// * `key` - The settings key, as written in config.
    /// * `kind` - The type the value must have when it is set.
    /// * `default` - The value the channel assumes when unset, for display only.
    pub fn optional(key: &'static str, kind: OptionKind, default: Option<Value>) -> Self {
        Self {
            key,
            kind,
            default,
            required: false,
        }
    }

    /// Checks presence and type of this option in `settings`.
    pub fn check(&self, settings: &Settings) -> Result<(), NotifyError> {
        if !settings.is_set(self.key) {
            if self.required {
                return Err(NotifyError::validation(format!(
                    "missing required setting `{}`",
                    self.key
                )));
            }
            return Ok(());
        }

        match self.kind {
            OptionKind::String => settings.get_string(self.key).map(|_| ()),
            OptionKind::Bool => settings.get_bool(self.key, false).map(|_| ()),
            OptionKind::Url => settings.get_url(self.key).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: Value) -> Settings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_get_string() {
        let s = settings(json!({"key": "abc", "blank": "  ", "num": 3}));

        assert_eq!(s.get_string("key").unwrap(), Some("abc".to_string()));
        assert_eq!(s.get_string("blank").unwrap(), None);
        assert_eq!(s.get_string("missing").unwrap(), None);
        assert!(s.get_string("num").is_err());
        assert!(matches!(
            s.require_string("missing"),
            Err(NotifyError::Validation { .. })
        ));
    }

    #[test]
    fn test_get_bool_defaults_and_strings() {
        let s = settings(json!({"on": true, "off": "false", "bad": "maybe", "null": null}));

        assert!(s.get_bool("on", false).unwrap());
        assert!(!s.get_bool("off", true).unwrap());
        assert!(s.get_bool("missing", true).unwrap());
        assert!(!s.get_bool("null", false).unwrap());
        assert!(s.get_bool("bad", true).is_err());
    }

    #[test]
    fn test_get_url() {
        let s = settings(json!({
            "good": "https://hooks.example.com/abc",
            "ftp": "ftp://example.com",
            "junk": "not a url"
        }));

        assert_eq!(
            s.get_url("good").unwrap(),
            Some("https://hooks.example.com/abc".to_string())
        );
        assert!(s.get_url("ftp").is_err());
        assert!(s.get_url("junk").is_err());
        assert_eq!(s.get_url("missing").unwrap(), None);
    }

    #[test]
    fn test_option_spec_check() {
        let s = settings(json!({"url": "https://x.example", "flag": 1}));

        assert!(OptionSpec::required("url", OptionKind::Url).check(&s).is_ok());
        assert!(OptionSpec::required("key", OptionKind::String).check(&s).is_err());
        assert!(OptionSpec::optional("key", OptionKind::String, None).check(&s).is_ok());
        assert!(OptionSpec::optional("flag", OptionKind::Bool, Some(json!(true)))
            .check(&s)
            .is_err());
    }
}
