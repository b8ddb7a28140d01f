//! Service configuration model and load-time validation.
//!
//! The raw, serde-facing model ([`GatewayConfig`], [`ServiceDefinition`]) is
//! what the configuration file deserializes into: every field is optional and
//! a service inherits any field it leaves unset from the `defaults` block.
//! [`ServiceRegistry::from_config`] resolves and validates that model into
//! immutable [`ServiceConfig`]s, which are then shared read-only (behind
//! [`Arc`]) by every concurrent dispatch.
//!
//! A service that defines its own `status_map` replaces the default table
//! entirely; the two are never merged.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mapping::JsonField;
use crate::{CodeVocabulary, ConfigError, FieldName, ReturnCode, ServiceName};

/// Per-call timeout used when neither the service nor the defaults set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum buffer size used when neither the service nor the defaults set one.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Status-table key that matches every status without an exact entry.
pub const WILDCARD: &str = "*";

// ---------------------------------------------------------------------------
// Error mode
// ---------------------------------------------------------------------------

/// Convention by which a backend reports application-level success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// The HTTP status alone decides, via the status table.
    Http,
    /// Code and message live in two fields of a JSON body.
    Json,
    /// The body is a structured record with reserved code/message fields.
    #[serde(alias = "json2ubf")]
    Json2Struct,
    /// The body is a view record with configured code/message fields.
    Json2View,
    /// A two-group regular expression over the raw body.
    Text,
}

impl std::fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Http => "http",
            Self::Json => "json",
            Self::Json2Struct => "json2struct",
            Self::Json2View => "json2view",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// An [`ErrorMode`] together with the settings that mode needs.
#[derive(Debug, Clone)]
pub enum ErrorPolicy {
    /// See [`ErrorMode::Http`].
    Http,
    /// See [`ErrorMode::Json`].
    Json {
        /// Where the code lives in the body.
        code_field: JsonField,
        /// Where the message lives in the body.
        message_field: JsonField,
        /// Treat an empty message as a malformed response.
        message_required: bool,
    },
    /// See [`ErrorMode::Json2Struct`]. Field names are fixed.
    Json2Struct,
    /// See [`ErrorMode::Json2View`].
    Json2View {
        /// View field holding the code.
        code_field: FieldName,
        /// View field holding the message.
        message_field: FieldName,
    },
    /// See [`ErrorMode::Text`].
    Text {
        /// Pattern with the code in group 1 and the message in group 2.
        pattern: Regex,
    },
}

impl ErrorPolicy {
    /// The mode this policy implements.
    pub fn mode(&self) -> ErrorMode {
        match self {
            Self::Http => ErrorMode::Http,
            Self::Json { .. } => ErrorMode::Json,
            Self::Json2Struct => ErrorMode::Json2Struct,
            Self::Json2View { .. } => ErrorMode::Json2View,
            Self::Text { .. } => ErrorMode::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Status table
// ---------------------------------------------------------------------------

/// Maps HTTP statuses to return codes; always has a wildcard entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTable {
    exact: BTreeMap<u16, ReturnCode>,
    wildcard: ReturnCode,
}

impl StatusTable {
    /// Creates a table whose every status maps to `wildcard`.
    pub fn new(wildcard: ReturnCode) -> Self {
        Self {
            exact: BTreeMap::new(),
            wildcard,
        }
    }

    /// Adds an exact entry.
    #[must_use]
    pub fn with(mut self, status: u16, code: ReturnCode) -> Self {
        self.exact.insert(status, code);
        self
    }

    /// Returns the exact entry for `status`, if any.
    pub fn exact(&self, status: u16) -> Option<ReturnCode> {
        self.exact.get(&status).copied()
    }

    /// Returns the exact entry for `status`, else the wildcard entry.
    pub fn lookup(&self, status: u16) -> ReturnCode {
        match self.exact(status) {
            Some(code) => {
                tracing::debug!(status, %code, "Exact status match");
                code
            }
            None => {
                tracing::debug!(status, code = %self.wildcard, "Matched wildcard status entry");
                self.wildcard
            }
        }
    }

    fn from_map(service: &str, map: &BTreeMap<String, i64>) -> Result<Self, ConfigError> {
        let wildcard = map.get(WILDCARD).ok_or_else(|| ConfigError::InvalidField {
            service: service.to_string(),
            field: "status_map",
            message: format!("the '{WILDCARD}' entry is mandatory"),
        })?;
        let mut table = Self::new(ReturnCode::new(*wildcard));
        for (key, code) in map.iter().filter(|(k, _)| k.as_str() != WILDCARD) {
            let status = key.parse::<u16>().map_err(|_| ConfigError::InvalidField {
                service: service.to_string(),
                field: "status_map",
                message: format!("'{key}' is neither an HTTP status nor '{WILDCARD}'"),
            })?;
            table.exact.insert(status, ReturnCode::new(*code));
        }
        Ok(table)
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::new(ReturnCode::SERVICE_FAILURE).with(200, ReturnCode::SUCCESS)
    }
}

// ---------------------------------------------------------------------------
// Resolved service configuration
// ---------------------------------------------------------------------------

/// Everything the dispatcher needs to serve calls for one service.
///
/// Immutable once built; shared across dispatches behind an [`Arc`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service name as advertised on the bus.
    pub name: ServiceName,
    /// Backend endpoint receiving the POST.
    pub url: String,
    /// Upper bound on the whole exchange.
    pub timeout: Duration,
    /// Skip TLS certificate verification.
    pub ssl_insecure: bool,
    /// Error-reporting convention and its settings.
    pub error_policy: ErrorPolicy,
    /// Materialize the response body into the reply even when the call fails.
    pub parse_on_error: bool,
    /// HTTP status → return code mapping.
    pub status_table: StatusTable,
    /// Sentinels used by the outcome normalizer.
    pub codes: CodeVocabulary,
    /// Largest payload the bus buffer may hold.
    pub max_message_size: usize,
}

impl ServiceConfig {
    /// Creates an HTTP-mode service with default settings.
    pub fn new(name: ServiceName, url: impl Into<String>) -> Self {
        Self {
            name,
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
            ssl_insecure: false,
            error_policy: ErrorPolicy::Http,
            parse_on_error: false,
            status_table: StatusTable::default(),
            codes: CodeVocabulary::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// The configured error mode.
    pub fn error_mode(&self) -> ErrorMode {
        self.error_policy.mode()
    }
}

// ---------------------------------------------------------------------------
// Raw configuration model
// ---------------------------------------------------------------------------

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Values inherited by every service.
    #[serde(default)]
    pub defaults: ServiceDefinition,
    /// Service blocks keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDefinition>,
}

/// One service block (or the defaults block) as written in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDefinition {
    /// Backend endpoint.
    pub url: Option<String>,
    /// Timeout in whole seconds.
    pub timeout_secs: Option<u64>,
    /// Skip certificate verification.
    pub ssl_insecure: Option<bool>,
    /// Error mode.
    pub errors: Option<ErrorMode>,
    /// JSON mode: key or JSON pointer of the code.
    pub json_code_field: Option<String>,
    /// JSON mode: key or JSON pointer of the message.
    pub json_message_field: Option<String>,
    /// JSON mode: fail when the message is empty.
    pub json_message_required: Option<bool>,
    /// JSON2VIEW mode: code field.
    pub view_code_field: Option<String>,
    /// JSON2VIEW mode: message field.
    pub view_message_field: Option<String>,
    /// TEXT mode: two-group regular expression.
    pub text_pattern: Option<String>,
    /// Materialize the body into the reply on failure.
    pub parse_on_error: Option<bool>,
    /// Largest payload in bytes.
    pub max_message_size: Option<usize>,
    /// HTTP status → return code; must contain `"*"`.
    pub status_map: Option<BTreeMap<String, i64>>,
    /// Outcome sentinels.
    pub codes: Option<CodeDefinition>,
}

/// Overrides for the outcome sentinels.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeDefinition {
    /// "No error" code.
    pub success: Option<i64>,
    /// Code surfaced as a soft timeout.
    pub timeout: Option<i64>,
    /// Code surfaced as soft not-found.
    pub not_found: Option<i64>,
}

impl ServiceDefinition {
    fn resolve(&self, name: &str, defaults: &ServiceDefinition) -> Result<ServiceConfig, ConfigError> {
        let service_name = ServiceName::new(name).ok_or(ConfigError::EmptyServiceName)?;
        let missing = |field| ConfigError::MissingField {
            service: name.to_string(),
            field,
        };
        let invalid = |field, message: String| ConfigError::InvalidField {
            service: name.to_string(),
            field,
            message,
        };

        let url = self.url.clone().or_else(|| defaults.url.clone()).ok_or_else(|| missing("url"))?;

        let timeout = match self.timeout_secs.or(defaults.timeout_secs) {
            Some(0) => return Err(invalid("timeout_secs", "must be at least one second".into())),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        let mode = self.errors.or(defaults.errors).unwrap_or(ErrorMode::Http);
        let error_policy = match mode {
            ErrorMode::Http => ErrorPolicy::Http,
            ErrorMode::Json2Struct => ErrorPolicy::Json2Struct,
            ErrorMode::Json => {
                let field = |own: &Option<String>, inherited: &Option<String>, fallback: &str| {
                    JsonField::parse(own.as_deref().or(inherited.as_deref()).unwrap_or(fallback))
                };
                ErrorPolicy::Json {
                    code_field: field(&self.json_code_field, &defaults.json_code_field, "code"),
                    message_field: field(&self.json_message_field, &defaults.json_message_field, "message"),
                    message_required: self
                        .json_message_required
                        .or(defaults.json_message_required)
                        .unwrap_or(false),
                }
            }
            ErrorMode::Json2View => {
                let field = |own: &Option<String>, inherited: &Option<String>, key| {
                    own.clone()
                        .or_else(|| inherited.clone())
                        .and_then(FieldName::new)
                        .ok_or_else(|| missing(key))
                };
                ErrorPolicy::Json2View {
                    code_field: field(&self.view_code_field, &defaults.view_code_field, "view_code_field")?,
                    message_field: field(
                        &self.view_message_field,
                        &defaults.view_message_field,
                        "view_message_field",
                    )?,
                }
            }
            ErrorMode::Text => {
                let source = self
                    .text_pattern
                    .as_deref()
                    .or(defaults.text_pattern.as_deref())
                    .ok_or_else(|| missing("text_pattern"))?;
                let pattern = Regex::new(source).map_err(|e| invalid("text_pattern", e.to_string()))?;
                // captures_len counts the implicit whole-match group.
                if pattern.captures_len() < 3 {
                    return Err(invalid(
                        "text_pattern",
                        format!("'{source}' must have two capture groups (code, message)"),
                    ));
                }
                ErrorPolicy::Text { pattern }
            }
        };

        let status_table = match self.status_map.as_ref().or(defaults.status_map.as_ref()) {
            Some(map) => StatusTable::from_map(name, map)?,
            None => StatusTable::default(),
        };

        let own_codes = self.codes.unwrap_or_default();
        let default_codes = defaults.codes.unwrap_or_default();
        let base = CodeVocabulary::default();
        let pick = |own: Option<i64>, inherited: Option<i64>, fallback: ReturnCode| {
            own.or(inherited).map(ReturnCode::new).unwrap_or(fallback)
        };
        let codes = CodeVocabulary::new(
            pick(own_codes.success, default_codes.success, base.success()),
            pick(own_codes.timeout, default_codes.timeout, base.timeout()),
            pick(own_codes.not_found, default_codes.not_found, base.not_found()),
        )
        .ok_or_else(|| invalid("codes", "success, timeout and not_found must differ".into()))?;

        let max_message_size = match self.max_message_size.or(defaults.max_message_size) {
            Some(0) => return Err(invalid("max_message_size", "must be positive".into())),
            Some(size) => size,
            None => DEFAULT_MAX_MESSAGE_SIZE,
        };

        Ok(ServiceConfig {
            name: service_name,
            url,
            timeout,
            ssl_insecure: self.ssl_insecure.or(defaults.ssl_insecure).unwrap_or(false),
            error_policy,
            parse_on_error: self.parse_on_error.or(defaults.parse_on_error).unwrap_or(false),
            status_table,
            codes,
            max_message_size,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Read-only lookup of resolved service configurations by name.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<ServiceName, Arc<ServiceConfig>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves and validates every service block.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered; a gateway never starts
    /// with a partially valid configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (name, definition) in &config.services {
            registry.insert(definition.resolve(name, &config.defaults)?);
        }
        Ok(registry)
    }

    /// Adds or replaces a service.
    pub fn insert(&mut self, service: ServiceConfig) {
        self.services.insert(service.name.clone(), Arc::new(service));
    }

    /// Looks up a service by name.
    pub fn lookup(&self, name: &ServiceName) -> Option<Arc<ServiceConfig>> {
        self.services.get(name).cloned()
    }

    /// Service names in sorted order.
    pub fn names(&self) -> Vec<&ServiceName> {
        let mut names: Vec<_> = self.services.keys().collect();
        names.sort();
        names
    }

    /// Number of configured services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no service is configured.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(url: &str) -> ServiceDefinition {
        ServiceDefinition {
            url: Some(url.to_string()),
            ..ServiceDefinition::default()
        }
    }

    fn resolve(definition: ServiceDefinition) -> Result<ServiceConfig, ConfigError> {
        definition.resolve("SVC", &ServiceDefinition::default())
    }

    #[test]
    fn test_service_inherits_defaults() {
        let defaults = ServiceDefinition {
            url: Some("http://default".into()),
            timeout_secs: Some(5),
            errors: Some(ErrorMode::Json),
            parse_on_error: Some(true),
            ..ServiceDefinition::default()
        };
        let service = ServiceDefinition::default().resolve("SVC", &defaults).unwrap();
        assert_eq!(service.url, "http://default");
        assert_eq!(service.timeout, Duration::from_secs(5));
        assert_eq!(service.error_mode(), ErrorMode::Json);
        assert!(service.parse_on_error);
        assert_eq!(service.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_service_status_table_replaces_default_table() {
        let defaults = ServiceDefinition {
            status_map: Some(BTreeMap::from([("404".into(), 6), ("*".into(), 11)])),
            ..ServiceDefinition::default()
        };
        let own = ServiceDefinition {
            status_map: Some(BTreeMap::from([("*".into(), 13)])),
            ..definition("http://x")
        };
        let service = own.resolve("SVC", &defaults).unwrap();
        assert_eq!(service.status_table.lookup(404), ReturnCode::TIMEOUT);

        let inherited = definition("http://x").resolve("SVC", &defaults).unwrap();
        assert_eq!(inherited.status_table.lookup(404), ReturnCode::NOT_FOUND);
        assert_eq!(inherited.status_table.lookup(500), ReturnCode::SERVICE_FAILURE);
    }

    #[test]
    fn test_status_table_requires_wildcard_and_numeric_keys() {
        let no_wildcard = ServiceDefinition {
            status_map: Some(BTreeMap::from([("500".into(), 11)])),
            ..definition("http://x")
        };
        assert!(matches!(
            resolve(no_wildcard),
            Err(ConfigError::InvalidField { field: "status_map", .. })
        ));

        let bad_key = ServiceDefinition {
            status_map: Some(BTreeMap::from([("5xx".into(), 11), ("*".into(), 11)])),
            ..definition("http://x")
        };
        assert!(matches!(
            resolve(bad_key),
            Err(ConfigError::InvalidField { field: "status_map", .. })
        ));
    }

    #[test]
    fn test_missing_url_is_rejected() {
        assert!(matches!(
            resolve(ServiceDefinition::default()),
            Err(ConfigError::MissingField { field: "url", .. })
        ));
    }

    #[test]
    fn test_text_mode_needs_two_capture_groups() {
        let one_group = ServiceDefinition {
            errors: Some(ErrorMode::Text),
            text_pattern: Some(r"^(\d+)$".into()),
            ..definition("http://x")
        };
        assert!(matches!(
            resolve(one_group),
            Err(ConfigError::InvalidField { field: "text_pattern", .. })
        ));

        let broken = ServiceDefinition {
            errors: Some(ErrorMode::Text),
            text_pattern: Some(r"^(\d+".into()),
            ..definition("http://x")
        };
        assert!(resolve(broken).is_err());

        let missing = ServiceDefinition {
            errors: Some(ErrorMode::Text),
            ..definition("http://x")
        };
        assert!(matches!(
            resolve(missing),
            Err(ConfigError::MissingField { field: "text_pattern", .. })
        ));

        let good = ServiceDefinition {
            errors: Some(ErrorMode::Text),
            text_pattern: Some(r"^(\d+):(.*)$".into()),
            ..definition("http://x")
        };
        assert_eq!(resolve(good).unwrap().error_mode(), ErrorMode::Text);
    }

    #[test]
    fn test_json2view_needs_field_names() {
        let missing = ServiceDefinition {
            errors: Some(ErrorMode::Json2View),
            view_code_field: Some("rsp_code".into()),
            ..definition("http://x")
        };
        assert!(matches!(
            resolve(missing),
            Err(ConfigError::MissingField { field: "view_message_field", .. })
        ));
    }

    #[test]
    fn test_code_vocabulary_override_and_collision() {
        let custom = ServiceDefinition {
            codes: Some(CodeDefinition {
                not_found: Some(4),
                ..CodeDefinition::default()
            }),
            ..definition("http://x")
        };
        assert_eq!(resolve(custom).unwrap().codes.not_found(), ReturnCode::new(4));

        let colliding = ServiceDefinition {
            codes: Some(CodeDefinition {
                timeout: Some(0),
                ..CodeDefinition::default()
            }),
            ..definition("http://x")
        };
        assert!(matches!(
            resolve(colliding),
            Err(ConfigError::InvalidField { field: "codes", .. })
        ));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let zero = ServiceDefinition {
            timeout_secs: Some(0),
            ..definition("http://x")
        };
        assert!(matches!(
            resolve(zero),
            Err(ConfigError::InvalidField { field: "timeout_secs", .. })
        ));
    }

    #[test]
    fn test_error_mode_accepts_legacy_alias() {
        let mode: ErrorMode = serde_json::from_str(r#""json2ubf""#).unwrap();
        assert_eq!(mode, ErrorMode::Json2Struct);
    }

    #[test]
    fn test_registry_lookup() {
        let config = GatewayConfig {
            defaults: ServiceDefinition::default(),
            services: BTreeMap::from([
                ("B".to_string(), definition("http://b")),
                ("A".to_string(), definition("http://a")),
            ]),
        };
        let registry = ServiceRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        let names: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["A", "B"]);
        let a = registry.lookup(&ServiceName::new("A").unwrap()).unwrap();
        assert_eq!(a.url, "http://a");
        assert!(registry.lookup(&ServiceName::new("C").unwrap()).is_none());
    }
}
