//! Entity validation against per-type schemas
//!
//! Attribute maps are open, so each declared [`EntityType`] carries a schema
//! checked at the boundary: required fields, field types, string formats,
//! numeric ranges and business rules. Validation outcomes are data: the
//! validator never fails on bad input, it reports.
//!
//! | Check          | Outcome  | Invalidates |
//! |----------------|----------|-------------|
//! | required field | error    | yes         |
//! | field type     | error    | yes         |
//! | format         | error    | yes         |
//! | range          | warning  | no          |
//! | business rule  | error    | yes         |

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::debug;

use crate::error::{Error, Result};

use super::entity::{Entity, EntityType, parse_timestamp};

/// Schema tables keyed by entity type
pub type ValidationRules = BTreeMap<EntityType, EntitySchema>;

/// Expected JSON type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// String holding an RFC 3339 timestamp or `YYYY-MM-DD` date
    Date,
}

/// String formats checked with configurable regexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    Email,
    Url,
    Money,
    Date,
    Phone,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Url => "url",
            Self::Money => "money",
            Self::Date => "date",
            Self::Phone => "phone",
        }
    }
}

/// Inclusive numeric bounds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Cross-field business rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum BusinessRule {
    /// `field` must be a positive number whenever `when_field == equals`
    PositiveWhen {
        field: String,
        when_field: String,
        equals: Value,
    },
    /// `end_field` must not be earlier than `start_field`
    DateOrder {
        start_field: String,
        end_field: String,
    },
    /// `field` must be present whenever `when_field == equals`
    RequiredWhen {
        field: String,
        when_field: String,
        equals: Value,
    },
}

/// Schema for one entity type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySchema {
    pub required_fields: Vec<String>,
    pub field_types: BTreeMap<String, FieldType>,
    pub formats: BTreeMap<String, FormatKind>,
    pub ranges: BTreeMap<String, NumericRange>,
    pub business_rules: Vec<BusinessRule>,
}

impl EntitySchema {
    pub fn required(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn typed(mut self, field: &str, field_type: FieldType) -> Self {
        self.field_types.insert(field.to_string(), field_type);
        self
    }

    pub fn format(mut self, field: &str, kind: FormatKind) -> Self {
        self.formats.insert(field.to_string(), kind);
        self
    }

    pub fn range(mut self, field: &str, range: NumericRange) -> Self {
        self.ranges.insert(field.to_string(), range);
        self
    }

    pub fn rule(mut self, rule: BusinessRule) -> Self {
        self.business_rules.push(rule);
        self
    }
}

/// Validation configuration: schema tables plus format regexes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub rules: ValidationRules,
    pub format_patterns: BTreeMap<FormatKind, String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            format_patterns: default_format_patterns(),
        }
    }
}

/// Built-in regexes for each [`FormatKind`]
pub fn default_format_patterns() -> BTreeMap<FormatKind, String> {
    [
        (FormatKind::Email, r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$"),
        (
            FormatKind::Url,
            r"^https?://[A-Za-z0-9.-]+\.[A-Za-z]{2,}(:\d+)?(/\S*)?$",
        ),
        (FormatKind::Money, r"^[$€£]?-?(\d{1,3}(,\d{3})+|\d+)(\.\d{1,2})?$"),
        (
            FormatKind::Date,
            r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?$",
        ),
        (FormatKind::Phone, r"^\+?[0-9][0-9 ().-]{6,}[0-9]$"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, pattern.to_string()))
    .collect()
}

/// Built-in schema tables
pub fn default_rules() -> ValidationRules {
    let mut rules = ValidationRules::new();

    rules.insert(
        EntityType::Customer,
        EntitySchema::default()
            .required(&["name"])
            .typed("arr", FieldType::Number)
            .typed("employee_count", FieldType::Integer)
            .typed("health_score", FieldType::Number)
            .format("email", FormatKind::Email)
            .format("website", FormatKind::Url)
            .format("phone", FormatKind::Phone)
            .range("arr", NumericRange::at_least(0.0))
            .range("employee_count", NumericRange::at_least(0.0))
            .range("health_score", NumericRange::between(0.0, 100.0))
            .rule(BusinessRule::PositiveWhen {
                field: "arr".into(),
                when_field: "status".into(),
                equals: Value::String("active".into()),
            }),
    );

    rules.insert(
        EntityType::Subscription,
        EntitySchema::default()
            .required(&["customer_id", "start_date"])
            .typed("mrr", FieldType::Number)
            .typed("seats", FieldType::Integer)
            .typed("start_date", FieldType::Date)
            .typed("end_date", FieldType::Date)
            .range("mrr", NumericRange::at_least(0.0))
            .range("seats", NumericRange::at_least(1.0))
            .rule(BusinessRule::DateOrder {
                start_field: "start_date".into(),
                end_field: "end_date".into(),
            }),
    );

    rules.insert(
        EntityType::Person,
        EntitySchema::default()
            .required(&["name"])
            .format("email", FormatKind::Email)
            .format("phone", FormatKind::Phone),
    );

    rules.insert(
        EntityType::Team,
        EntitySchema::default()
            .required(&["name"])
            .typed("size", FieldType::Integer)
            .range("size", NumericRange::at_least(1.0)),
    );

    rules.insert(
        EntityType::Project,
        EntitySchema::default()
            .required(&["name"])
            .typed("budget", FieldType::Number)
            .typed("progress", FieldType::Number)
            .typed("start_date", FieldType::Date)
            .typed("end_date", FieldType::Date)
            .range("progress", NumericRange::between(0.0, 100.0))
            .rule(BusinessRule::DateOrder {
                start_field: "start_date".into(),
                end_field: "end_date".into(),
            }),
    );

    rules.insert(
        EntityType::Risk,
        EntitySchema::default()
            .required(&["title"])
            .typed("probability", FieldType::Number)
            .typed("severity", FieldType::Integer)
            .range("probability", NumericRange::between(0.0, 1.0))
            .range("severity", NumericRange::between(1.0, 5.0))
            .rule(BusinessRule::RequiredWhen {
                field: "owner_id".into(),
                when_field: "status".into(),
                equals: Value::String("open".into()),
            }),
    );

    rules
}

/// Kind of validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingRequired,
    InvalidType,
    InvalidFormat,
    OutOfRange,
    BusinessRule,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRequired => "missing_required",
            Self::InvalidType => "invalid_type",
            Self::InvalidFormat => "invalid_format",
            Self::OutOfRange => "out_of_range",
            Self::BusinessRule => "business_rule",
        }
    }
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub kind: IssueKind,
    pub message: String,
    /// Corrected value when the problem is mechanically fixable
    pub suggested_fix: Option<Value>,
}

impl ValidationIssue {
    fn new(field: &str, kind: IssueKind, message: String) -> Self {
        Self {
            field: field.to_string(),
            kind,
            message,
            suggested_fix: None,
        }
    }

    fn with_fix(mut self, fix: Option<Value>) -> Self {
        self.suggested_fix = fix;
        self
    }
}

/// Result of validating one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub entity_id: String,
    /// True iff `errors` is empty
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// First error on the given field, if any
    pub fn error_for(&self, field: &str) -> Option<&ValidationIssue> {
        self.errors.iter().find(|e| e.field == field)
    }
}

/// Validates entities against schema tables
#[derive(Debug, Clone)]
pub struct EntityValidator {
    rules: ValidationRules,
    patterns: BTreeMap<FormatKind, Regex>,
}

impl EntityValidator {
    /// Create a validator with the built-in tables
    pub fn new() -> Result<Self> {
        Self::with_config(ValidationConfig::default())
    }

    /// Create a validator from configuration
    ///
    /// Fails when a configured format pattern is not a valid regex.
    pub fn with_config(config: ValidationConfig) -> Result<Self> {
        let mut patterns = BTreeMap::new();
        for (kind, pattern) in &config.format_patterns {
            let regex = Regex::new(pattern).map_err(|e| Error::InvalidPattern {
                field: kind.as_str().to_string(),
                reason: e.to_string(),
            })?;
            patterns.insert(*kind, regex);
        }

        Ok(Self {
            rules: config.rules,
            patterns,
        })
    }

    /// Validate one entity
    ///
    /// When `custom_rules` has a schema for the entity's type it replaces
    /// the configured schema for this call only. Entities of a type with no
    /// schema are valid.
    pub fn validate_entity(&self, entity: &Entity, custom_rules: Option<&ValidationRules>) -> ValidationResult {
        let schema = custom_rules
            .and_then(|rules| rules.get(&entity.entity_type))
            .or_else(|| self.rules.get(&entity.entity_type));

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if let Some(schema) = schema {
            self.check_required(entity, schema, &mut errors);
            let type_failures = self.check_types(entity, schema, &mut errors);
            self.check_formats(entity, schema, &type_failures, &mut errors);
            self.check_ranges(entity, schema, &type_failures, &mut warnings);
            self.check_business_rules(entity, schema, &mut errors);
        }

        debug!(
            entity_id = %entity.id,
            entity_type = %entity.entity_type,
            errors = errors.len(),
            warnings = warnings.len(),
            "Validated entity"
        );

        ValidationResult {
            entity_id: entity.id.clone(),
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Validate several entities, results in input order
    pub fn validate_batch(&self, entities: &[Entity]) -> Vec<ValidationResult> {
        entities
            .iter()
            .map(|entity| self.validate_entity(entity, None))
            .collect()
    }

    fn check_required(&self, entity: &Entity, schema: &EntitySchema, errors: &mut Vec<ValidationIssue>) {
        for field in &schema.required_fields {
            if !is_present(entity.attribute(field)) {
                errors.push(ValidationIssue::new(
                    field,
                    IssueKind::MissingRequired,
                    format!("required field '{}' is missing", field),
                ));
            }
        }
    }

    /// Returns the fields that failed their type check
    fn check_types(
        &self,
        entity: &Entity,
        schema: &EntitySchema,
        errors: &mut Vec<ValidationIssue>,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        for (field, field_type) in &schema.field_types {
            let Some(value) = entity.attribute(field) else {
                continue;
            };
            if matches_type(value, *field_type) {
                continue;
            }
            failed.push(field.clone());
            errors.push(
                ValidationIssue::new(
                    field,
                    IssueKind::InvalidType,
                    format!("field '{}' should be {:?}, got {}", field, field_type, value),
                )
                .with_fix(coerce(value, *field_type)),
            );
        }
        failed
    }

    fn check_formats(
        &self,
        entity: &Entity,
        schema: &EntitySchema,
        skip: &[String],
        errors: &mut Vec<ValidationIssue>,
    ) {
        for (field, kind) in &schema.formats {
            if skip.contains(field) {
                continue;
            }
            let Some(Value::String(raw)) = entity.attribute(field) else {
                continue;
            };
            let Some(regex) = self.patterns.get(kind) else {
                continue;
            };
            if regex.is_match(raw) {
                continue;
            }

            let fix = match kind {
                FormatKind::Email => Some(raw.trim().to_lowercase()),
                FormatKind::Url if !raw.contains("://") => Some(format!("https://{}", raw.trim())),
                _ => None,
            }
            .filter(|candidate| regex.is_match(candidate))
            .map(Value::String);

            errors.push(
                ValidationIssue::new(
                    field,
                    IssueKind::InvalidFormat,
                    format!("field '{}' is not a valid {}: '{}'", field, kind.as_str(), raw),
                )
                .with_fix(fix),
            );
        }
    }

    fn check_ranges(
        &self,
        entity: &Entity,
        schema: &EntitySchema,
        skip: &[String],
        warnings: &mut Vec<ValidationIssue>,
    ) {
        for (field, range) in &schema.ranges {
            if skip.contains(field) {
                continue;
            }
            let Some(value) = entity.attribute(field).and_then(Value::as_f64) else {
                continue;
            };
            if !range.contains(value) {
                warnings.push(ValidationIssue::new(
                    field,
                    IssueKind::OutOfRange,
                    format!(
                        "field '{}' value {} outside [{}, {}]",
                        field,
                        value,
                        range.min.map_or("-inf".to_string(), |m| m.to_string()),
                        range.max.map_or("inf".to_string(), |m| m.to_string()),
                    ),
                ));
            }
        }
    }

    fn check_business_rules(&self, entity: &Entity, schema: &EntitySchema, errors: &mut Vec<ValidationIssue>) {
        for rule in &schema.business_rules {
            match rule {
                BusinessRule::PositiveWhen {
                    field,
                    when_field,
                    equals,
                } => {
                    if entity.attribute(when_field) != Some(equals) {
                        continue;
                    }
                    let positive = entity.attribute(field).and_then(numeric).is_some_and(|v| v > 0.0);
                    if !positive {
                        errors.push(ValidationIssue::new(
                            field,
                            IssueKind::BusinessRule,
                            format!("'{}' must be positive when {} is {}", field, when_field, equals),
                        ));
                    }
                }
                BusinessRule::DateOrder { start_field, end_field } => {
                    let start = entity.attribute_time(start_field);
                    let end = entity.attribute_time(end_field);
                    if let (Some(start), Some(end)) = (start, end) {
                        if end < start {
                            errors.push(ValidationIssue::new(
                                end_field,
                                IssueKind::BusinessRule,
                                format!("'{}' is earlier than '{}'", end_field, start_field),
                            ));
                        }
                    }
                }
                BusinessRule::RequiredWhen {
                    field,
                    when_field,
                    equals,
                } => {
                    if entity.attribute(when_field) == Some(equals) && !is_present(entity.attribute(field)) {
                        errors.push(ValidationIssue::new(
                            field,
                            IssueKind::BusinessRule,
                            format!("'{}' is required when {} is {}", field, when_field, equals),
                        ));
                    }
                }
            }
        }
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn matches_type(value: &Value, field_type: FieldType) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Date => value.as_str().and_then(parse_timestamp).is_some(),
    }
}

/// Parse a number out of a string carrying currency or thousands symbols
fn parse_numeric_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | '_' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric_text(s),
        _ => None,
    }
}

/// Coerced value for a type mismatch, if one exists
fn coerce(value: &Value, field_type: FieldType) -> Option<Value> {
    match (field_type, value) {
        (FieldType::Number, Value::String(s)) => {
            parse_numeric_text(s).and_then(Number::from_f64).map(Value::Number)
        }
        (FieldType::Integer, Value::String(s)) => parse_numeric_text(s)
            .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| Value::from(v as i64)),
        (FieldType::Integer, Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| Value::from(v as i64)),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> EntityValidator {
        EntityValidator::new().unwrap()
    }

    fn customer() -> Entity {
        Entity::new("cust_001", EntityType::Customer)
            .with_attribute("name", "Acme")
            .with_attribute("status", "active")
            .with_attribute("arr", 120000)
    }

    #[test]
    fn test_valid_customer() {
        let result = validator().validate_entity(&customer(), None);
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_required() {
        let entity = Entity::new("c", EntityType::Customer).with_attribute("name", "  ");
        let result = validator().validate_entity(&entity, None);
        assert!(!result.is_valid);
        assert_eq!(result.error_for("name").unwrap().kind, IssueKind::MissingRequired);
    }

    #[test]
    fn test_invalid_type_with_currency_fix() {
        let entity = customer().with_attribute("arr", "$1,200.50");
        let result = validator().validate_entity(&entity, None);

        let issue = result.error_for("arr").unwrap();
        assert_eq!(issue.kind, IssueKind::InvalidType);
        assert_eq!(issue.suggested_fix, Some(json!(1200.5)));
        // the entity itself is untouched
        assert_eq!(entity.attributes["arr"], json!("$1,200.50"));
    }

    #[test]
    fn test_string_wrapped_integer_fix() {
        let entity = customer().with_attribute("employee_count", "250");
        let result = validator().validate_entity(&entity, None);
        let issue = result.error_for("employee_count").unwrap();
        assert_eq!(issue.suggested_fix, Some(json!(250)));
    }

    #[test]
    fn test_uncoercible_type_has_no_fix() {
        let entity = customer().with_attribute("employee_count", "many");
        let result = validator().validate_entity(&entity, None);
        assert!(result.error_for("employee_count").unwrap().suggested_fix.is_none());
    }

    #[test]
    fn test_email_format_fix() {
        let entity = customer().with_attribute("email", "  Info@TechCorp.com ");
        let result = validator().validate_entity(&entity, None);
        let issue = result.error_for("email").unwrap();
        assert_eq!(issue.kind, IssueKind::InvalidFormat);
        assert_eq!(issue.suggested_fix, Some(json!("info@techcorp.com")));
    }

    #[test]
    fn test_url_format_fix_and_unfixable() {
        let entity = customer().with_attribute("website", "techcorp.com");
        let result = validator().validate_entity(&entity, None);
        assert_eq!(
            result.error_for("website").unwrap().suggested_fix,
            Some(json!("https://techcorp.com"))
        );

        let entity = customer().with_attribute("phone", "call me");
        let result = validator().validate_entity(&entity, None);
        let issue = result.error_for("phone").unwrap();
        assert_eq!(issue.kind, IssueKind::InvalidFormat);
        assert!(issue.suggested_fix.is_none());
    }

    #[test]
    fn test_range_violation_is_warning_only() {
        let entity = customer().with_attribute("health_score", 140);
        let result = validator().validate_entity(&entity, None);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, IssueKind::OutOfRange);
    }

    #[test]
    fn test_active_customer_needs_positive_arr() {
        let entity = customer().with_attribute("arr", 0);
        let result = validator().validate_entity(&entity, None);
        assert!(!result.is_valid);
        assert_eq!(result.error_for("arr").unwrap().kind, IssueKind::BusinessRule);

        let churned = entity.with_attribute("status", "churned");
        assert!(validator().validate_entity(&churned, None).is_valid);
    }

    #[test]
    fn test_subscription_date_order() {
        let entity = Entity::new("sub_1", EntityType::Subscription)
            .with_attribute("customer_id", "cust_001")
            .with_attribute("start_date", "2024-06-01")
            .with_attribute("end_date", "2024-01-01");
        let result = validator().validate_entity(&entity, None);
        assert!(!result.is_valid);
        assert_eq!(result.error_for("end_date").unwrap().kind, IssueKind::BusinessRule);
    }

    #[test]
    fn test_custom_rules_override_for_one_call() {
        let validator = validator();
        let entity = Entity::new("c", EntityType::Customer);

        let mut custom = ValidationRules::new();
        custom.insert(EntityType::Customer, EntitySchema::default());
        assert!(validator.validate_entity(&entity, Some(&custom)).is_valid);

        // built-in tables apply again on the next call
        assert!(!validator.validate_entity(&entity, None).is_valid);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let validator = validator();
        let entity = customer()
            .with_attribute("email", "BAD")
            .with_attribute("arr", "abc")
            .with_attribute("health_score", -5);
        let first = validator.validate_entity(&entity, None);
        for _ in 0..5 {
            assert_eq!(validator.validate_entity(&entity, None), first);
        }
    }

    #[test]
    fn test_type_without_schema_is_valid() {
        let entity = Entity::new("m", EntityType::Meeting);
        assert!(validator().validate_entity(&entity, None).is_valid);
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let mut config = ValidationConfig::default();
        config.format_patterns.insert(FormatKind::Email, "([".to_string());
        let err = EntityValidator::with_config(config).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn test_money_format() {
        let regex = Regex::new(&default_format_patterns()[&FormatKind::Money]).unwrap();
        assert!(regex.is_match("$1,200.50"));
        assert!(regex.is_match("1200"));
        assert!(!regex.is_match("12,00"));
    }
}
