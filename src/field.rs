//! # Fields
//!
//! A [`Field`] is the atomic, observable value holder inside an
//! [`Input`](crate::Input): labels, text, numbers, checkboxes, colours,
//! dates, dropdowns, variable references and images.
//!
//! Every setter is an idempotent no-op when the new value equals the current
//! one; observers only hear about real changes.

use crate::color::Color;
use crate::error::{BlockLoadError, StructureError};
use crate::observer::{ObserverId, ObserverList};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Closed set of field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Label,
    LabelSerializable,
    Input,
    Number,
    Angle,
    Checkbox,
    Colour,
    Date,
    Dropdown,
    Variable,
    Image,
}

impl FieldType {
    /// Parses the `type` of a field argument in a block definition.
    pub fn from_json_name(name: &str) -> Option<FieldType> {
        Some(match name {
            "field_label" => FieldType::Label,
            "field_label_serializable" => FieldType::LabelSerializable,
            "field_input" => FieldType::Input,
            "field_number" => FieldType::Number,
            "field_angle" => FieldType::Angle,
            "field_checkbox" => FieldType::Checkbox,
            "field_colour" => FieldType::Colour,
            "field_date" => FieldType::Date,
            "field_dropdown" => FieldType::Dropdown,
            "field_variable" => FieldType::Variable,
            "field_image" => FieldType::Image,
            _ => return None,
        })
    }

    pub fn json_name(&self) -> &'static str {
        match self {
            FieldType::Label => "field_label",
            FieldType::LabelSerializable => "field_label_serializable",
            FieldType::Input => "field_input",
            FieldType::Number => "field_number",
            FieldType::Angle => "field_angle",
            FieldType::Checkbox => "field_checkbox",
            FieldType::Colour => "field_colour",
            FieldType::Date => "field_date",
            FieldType::Dropdown => "field_dropdown",
            FieldType::Variable => "field_variable",
            FieldType::Image => "field_image",
        }
    }
}

/// A calendar date as stored by date fields (`yyyy-mm-dd`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl FieldDate {
    pub fn new(year: i32, month: u32, day: u32) -> Option<FieldDate> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
            return None;
        }
        Some(FieldDate { year, month, day })
    }

    /// Current UTC date.
    pub fn today() -> FieldDate {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        civil_from_days(secs.div_euclid(86_400))
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> FieldDate {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = (yoe + era * 400 + if month <= 2 { 1 } else { 0 }) as i32;
    FieldDate { year, month, day }
}

impl fmt::Display for FieldDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for FieldDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        if parts.len() != 3 {
            return Err(format!("date '{}' is not of the form yyyy-mm-dd", s));
        }
        let year = parts[0].parse::<i32>().map_err(|e| e.to_string())?;
        let month = parts[1].parse::<u32>().map_err(|e| e.to_string())?;
        let day = parts[2].parse::<u32>().map_err(|e| e.to_string())?;
        FieldDate::new(year, month, day).ok_or_else(|| format!("date '{}' does not exist", s))
    }
}

/// One entry of a dropdown: what is shown and what is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropdownOption {
    pub display: String,
    pub value: String,
}

/// Immutable option list, shared by every dropdown that uses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropdownOptions {
    options: Vec<DropdownOption>,
}

impl DropdownOptions {
    pub fn new(options: Vec<DropdownOption>) -> Result<Self, String> {
        if options.is_empty() {
            return Err("dropdown must have at least one option".to_string());
        }
        Ok(DropdownOptions { options })
    }

    /// Builds options from `(display, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, String> {
        Self::new(
            pairs
                .into_iter()
                .map(|(display, value)| DropdownOption {
                    display: display.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        )
    }

    pub fn options(&self) -> &[DropdownOption] {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.options.iter().position(|o| o.value == value)
    }

    fn from_json(json: &Value) -> Result<Self, String> {
        let entries = json
            .as_array()
            .ok_or_else(|| "dropdown 'options' must be an array".to_string())?;
        let mut options = Vec::with_capacity(entries.len());
        for entry in entries {
            let pair = entry
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| "dropdown option must be a [display, value] pair".to_string())?;
            let display = match &pair[0] {
                Value::String(s) => s.clone(),
                // Image options show their alt text when not rendered.
                Value::Object(image) => image
                    .get("alt")
                    .or_else(|| image.get("src"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                other => other.to_string(),
            };
            let value = pair[1]
                .as_str()
                .ok_or_else(|| "dropdown option value must be a string".to_string())?
                .to_string();
            options.push(DropdownOption { display, value });
        }
        DropdownOptions::new(options)
    }
}

/// Registry of dropdown option lists keyed by block type and field name.
///
/// Cloning the registry shares the underlying table; concurrent writers see
/// last-writer-wins semantics and readers never observe a partial list.
#[derive(Debug, Clone, Default)]
pub struct DropdownOptionsRegistry {
    table: Arc<RwLock<HashMap<(String, String), Arc<DropdownOptions>>>>,
}

impl DropdownOptionsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, block_type: &str, field_name: &str) -> Option<Arc<DropdownOptions>> {
        self.table
            .read()
            .get(&(block_type.to_string(), field_name.to_string()))
            .cloned()
    }

    /// Registers options for a block type's field, replacing any previous list.
    pub fn register(&self, block_type: &str, field_name: &str, options: Arc<DropdownOptions>) {
        self.table
            .write()
            .insert((block_type.to_string(), field_name.to_string()), options);
    }

    /// Returns the registered list, registering `options` first if none exists.
    pub fn get_or_register(
        &self,
        block_type: &str,
        field_name: &str,
        options: DropdownOptions,
    ) -> Arc<DropdownOptions> {
        let mut table = self.table.write();
        Arc::clone(
            table
                .entry((block_type.to_string(), field_name.to_string()))
                .or_insert_with(|| Arc::new(options)),
        )
    }
}

/// The typed value of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Label { text: String },
    LabelSerializable { text: String },
    Input { text: String },
    Number {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
        precision: Option<f64>,
    },
    Angle { degrees: f64 },
    Checkbox { checked: bool },
    Colour { colour: Color },
    Date { date: FieldDate },
    Dropdown {
        options: Arc<DropdownOptions>,
        selected: usize,
    },
    Variable { variable: String },
    Image {
        src: String,
        width: u32,
        height: u32,
        alt: String,
    },
}

/// Receives value changes of a single field.
pub trait FieldObserver: Send + Sync {
    fn on_value_changed(&self, field: &Field, old_value: &str, new_value: &str);
}

#[derive(Debug, Clone)]
pub struct Field {
    name: Option<String>,
    value: FieldValue,
    observers: ObserverList<dyn FieldObserver>,
}

impl Field {
    pub fn new(name: Option<&str>, value: FieldValue) -> Field {
        Field {
            name: name.map(str::to_string),
            value,
            observers: ObserverList::new(),
        }
    }

    pub fn label(text: &str) -> Field {
        Field::new(None, FieldValue::Label { text: text.to_string() })
    }

    pub fn text_input(name: &str, text: &str) -> Field {
        Field::new(Some(name), FieldValue::Input { text: text.to_string() })
    }

    pub fn number(name: &str, value: f64) -> Field {
        Field::new(
            Some(name),
            FieldValue::Number {
                value,
                min: None,
                max: None,
                precision: None,
            },
        )
    }

    pub fn checkbox(name: &str, checked: bool) -> Field {
        Field::new(Some(name), FieldValue::Checkbox { checked })
    }

    pub fn dropdown(name: &str, options: Arc<DropdownOptions>) -> Field {
        Field::new(Some(name), FieldValue::Dropdown { options, selected: 0 })
    }

    pub fn variable(name: &str, variable: &str) -> Field {
        Field::new(Some(name), FieldValue::Variable { variable: variable.to_string() })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn field_type(&self) -> FieldType {
        match self.value {
            FieldValue::Label { .. } => FieldType::Label,
            FieldValue::LabelSerializable { .. } => FieldType::LabelSerializable,
            FieldValue::Input { .. } => FieldType::Input,
            FieldValue::Number { .. } => FieldType::Number,
            FieldValue::Angle { .. } => FieldType::Angle,
            FieldValue::Checkbox { .. } => FieldType::Checkbox,
            FieldValue::Colour { .. } => FieldType::Colour,
            FieldValue::Date { .. } => FieldType::Date,
            FieldValue::Dropdown { .. } => FieldType::Dropdown,
            FieldValue::Variable { .. } => FieldType::Variable,
            FieldValue::Image { .. } => FieldType::Image,
        }
    }

    /// Whether the value is written out when the block is serialized.
    pub fn is_serializable(&self) -> bool {
        self.name.is_some() && !matches!(self.field_type(), FieldType::Label | FieldType::Image)
    }

    /// The value as text, as written to `<field>` elements.
    pub fn serialized_value(&self) -> String {
        match &self.value {
            FieldValue::Label { text }
            | FieldValue::LabelSerializable { text }
            | FieldValue::Input { text } => text.clone(),
            FieldValue::Number { value, .. } => format_number(*value),
            FieldValue::Angle { degrees } => format_number(*degrees),
            FieldValue::Checkbox { checked } => if *checked { "TRUE" } else { "FALSE" }.to_string(),
            FieldValue::Colour { colour } => colour.to_string(),
            FieldValue::Date { date } => date.to_string(),
            FieldValue::Dropdown { options, selected } => options
                .options()
                .get(*selected)
                .map(|option| option.value.clone())
                .unwrap_or_default(),
            FieldValue::Variable { variable } => variable.clone(),
            FieldValue::Image { src, .. } => src.clone(),
        }
    }

    /// Parses `text` into a value of this field's type without applying it.
    pub fn parse_value(&self, text: &str) -> Result<FieldValue, StructureError> {
        let invalid = |reason: String| StructureError::InvalidFieldValue {
            field: self.name.clone().unwrap_or_default(),
            value: text.to_string(),
            reason,
        };
        let mut value = self.value.clone();
        match &mut value {
            FieldValue::Label { text: t }
            | FieldValue::LabelSerializable { text: t }
            | FieldValue::Input { text: t } => *t = text.to_string(),
            FieldValue::Number { value, min, max, precision } => {
                let parsed = text
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| invalid(e.to_string()))?;
                if !parsed.is_finite() {
                    return Err(invalid("number must be finite".to_string()));
                }
                *value = constrain_number(parsed, *min, *max, *precision);
            }
            FieldValue::Angle { degrees } => {
                let parsed = text
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| invalid(e.to_string()))?;
                if !parsed.is_finite() {
                    return Err(invalid("angle must be finite".to_string()));
                }
                *degrees = parsed.rem_euclid(360.0);
            }
            FieldValue::Checkbox { checked } => {
                *checked = match text.trim().to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    other => return Err(invalid(format!("'{}' is not TRUE or FALSE", other))),
                }
            }
            FieldValue::Colour { colour } => *colour = text.trim().parse().map_err(invalid)?,
            FieldValue::Date { date } => *date = text.parse().map_err(invalid)?,
            FieldValue::Dropdown { options, selected } => {
                *selected = options
                    .index_of(text)
                    .ok_or_else(|| invalid("not one of the dropdown values".to_string()))?;
            }
            FieldValue::Variable { variable } => {
                if text.is_empty() {
                    return Err(invalid("variable name cannot be empty".to_string()));
                }
                *variable = text.to_string();
            }
            FieldValue::Image { src, .. } => *src = text.to_string(),
        }
        Ok(value)
    }

    /// Sets the value from its serialized text. Returns whether it changed.
    pub fn set_from_string(&mut self, text: &str) -> Result<bool, StructureError> {
        let value = self.parse_value(text)?;
        Ok(self.set_value(value))
    }

    /// Checks a typed value against this field and brings it within the
    /// field's own constraints.
    ///
    /// Number fields keep their min/max/precision whatever the value carries,
    /// angles are normalised to [0, 360) and dropdown selections must index an
    /// existing option.
    pub fn normalize_value(&self, value: FieldValue) -> Result<FieldValue, StructureError> {
        let invalid = |value: &FieldValue, reason: String| StructureError::InvalidFieldValue {
            field: self.name.clone().unwrap_or_default(),
            value: format!("{:?}", value),
            reason,
        };
        if std::mem::discriminant(&value) != std::mem::discriminant(&self.value) {
            let reason = format!("a {:?} field cannot take this value", self.field_type());
            return Err(invalid(&value, reason));
        }
        match (&self.value, value) {
            (FieldValue::Number { min, max, precision, .. }, FieldValue::Number { value, .. }) => {
                if !value.is_finite() {
                    let reason = "number must be finite".to_string();
                    return Err(invalid(&FieldValue::Number { value, min: *min, max: *max, precision: *precision }, reason));
                }
                Ok(FieldValue::Number {
                    value: constrain_number(value, *min, *max, *precision),
                    min: *min,
                    max: *max,
                    precision: *precision,
                })
            }
            (_, FieldValue::Angle { degrees }) => {
                if !degrees.is_finite() {
                    return Err(invalid(&FieldValue::Angle { degrees }, "angle must be finite".to_string()));
                }
                Ok(FieldValue::Angle {
                    degrees: degrees.rem_euclid(360.0),
                })
            }
            (_, value @ FieldValue::Dropdown { .. }) => match &value {
                FieldValue::Dropdown { options, selected } if *selected >= options.len() => {
                    let reason = format!("option {} of {} does not exist", selected, options.len());
                    Err(invalid(&value, reason))
                }
                _ => Ok(value),
            },
            (_, FieldValue::Variable { variable }) if variable.is_empty() => Err(invalid(
                &FieldValue::Variable { variable },
                "variable name cannot be empty".to_string(),
            )),
            (_, value) => Ok(value),
        }
    }

    /// Replaces the value. A value of another type, or one
    /// [`normalize_value`](Self::normalize_value) rejects, leaves the field
    /// unchanged and returns `false`.
    pub fn set_value(&mut self, value: FieldValue) -> bool {
        let value = match self.normalize_value(value) {
            Ok(value) => value,
            Err(_) => return false,
        };
        if value == self.value {
            return false;
        }
        let old = self.serialized_value();
        self.value = value;
        let new = self.serialized_value();
        for observer in self.observers.snapshot() {
            observer.on_value_changed(self, &old, &new);
        }
        true
    }

    pub fn set_text(&mut self, text: &str) -> bool {
        match &self.value {
            FieldValue::Label { .. } => self.set_value(FieldValue::Label { text: text.to_string() }),
            FieldValue::LabelSerializable { .. } => {
                self.set_value(FieldValue::LabelSerializable { text: text.to_string() })
            }
            FieldValue::Input { .. } => self.set_value(FieldValue::Input { text: text.to_string() }),
            _ => false,
        }
    }

    pub fn set_number(&mut self, number: f64) -> bool {
        match self.value {
            FieldValue::Number { min, max, precision, .. } if number.is_finite() => {
                self.set_value(FieldValue::Number {
                    value: constrain_number(number, min, max, precision),
                    min,
                    max,
                    precision,
                })
            }
            _ => false,
        }
    }

    pub fn set_checked(&mut self, checked: bool) -> bool {
        self.set_value(FieldValue::Checkbox { checked })
    }

    pub fn set_colour(&mut self, colour: Color) -> bool {
        self.set_value(FieldValue::Colour { colour })
    }

    pub fn set_date(&mut self, date: FieldDate) -> bool {
        self.set_value(FieldValue::Date { date })
    }

    pub fn set_variable(&mut self, variable: &str) -> bool {
        !variable.is_empty() && self.set_value(FieldValue::Variable { variable: variable.to_string() })
    }

    /// Selects the dropdown option with the given value.
    pub fn set_selected_value(&mut self, value: &str) -> bool {
        match &self.value {
            FieldValue::Dropdown { options, .. } => match options.index_of(value) {
                Some(selected) => {
                    let options = Arc::clone(options);
                    self.set_value(FieldValue::Dropdown { options, selected })
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Swaps the option list, keeping the selected value if it still exists.
    pub fn set_options(&mut self, options: Arc<DropdownOptions>) -> bool {
        match &self.value {
            FieldValue::Dropdown { options: current, selected } => {
                let selected = current
                    .options()
                    .get(*selected)
                    .and_then(|option| options.index_of(&option.value))
                    .unwrap_or(0);
                self.set_value(FieldValue::Dropdown { options, selected })
            }
            _ => false,
        }
    }

    pub fn register_observer(&mut self, observer: Arc<dyn FieldObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    pub fn unregister_observer(&mut self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    /// Builds a field from a definition argument such as
    /// `{"type": "field_input", "name": "TEXT", "text": "abc"}`.
    ///
    /// Dropdown option lists are shared through `registry`. Returns
    /// `UnknownFieldType` if the type is not a field type.
    pub fn from_json(
        json: &Value,
        block_type: &str,
        registry: &DropdownOptionsRegistry,
    ) -> Result<Field, BlockLoadError> {
        let type_name = json.get("type").and_then(Value::as_str).unwrap_or_default();
        let field_type = FieldType::from_json_name(type_name).ok_or_else(|| BlockLoadError::UnknownFieldType {
            block_type: block_type.to_string(),
            field_type: type_name.to_string(),
        })?;
        let name = json.get("name").and_then(Value::as_str);
        let str_of = |key: &str, default: &str| {
            json.get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        let num_of = |key: &str| json.get(key).and_then(Value::as_f64);
        let fail = |message: String| BlockLoadError::definition(block_type, message);

        if name.is_none() && !matches!(field_type, FieldType::Label | FieldType::Image) {
            return Err(fail(format!("{} argument requires a name", type_name)));
        }

        let value = match field_type {
            FieldType::Label => FieldValue::Label { text: str_of("text", "") },
            FieldType::LabelSerializable => FieldValue::LabelSerializable { text: str_of("text", "") },
            FieldType::Input => FieldValue::Input { text: str_of("text", "") },
            FieldType::Number => {
                let (min, max, precision) = (num_of("min"), num_of("max"), num_of("precision"));
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(fail(format!("field_number min {} is above max {}", lo, hi)));
                    }
                }
                FieldValue::Number {
                    value: constrain_number(num_of("value").unwrap_or(0.0), min, max, precision),
                    min,
                    max,
                    precision,
                }
            }
            FieldType::Angle => FieldValue::Angle {
                degrees: num_of("angle").unwrap_or(90.0).rem_euclid(360.0),
            },
            FieldType::Checkbox => FieldValue::Checkbox {
                checked: match json.get("checked") {
                    Some(Value::Bool(b)) => *b,
                    Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
                    _ => false,
                },
            },
            FieldType::Colour => FieldValue::Colour {
                colour: str_of("colour", "#ff0000").parse().map_err(fail)?,
            },
            FieldType::Date => FieldValue::Date {
                date: match json.get("date").and_then(Value::as_str) {
                    Some(text) => text.parse().map_err(fail)?,
                    None => FieldDate::today(),
                },
            },
            FieldType::Dropdown => {
                let options = DropdownOptions::from_json(json.get("options").unwrap_or(&Value::Null))
                    .map_err(fail)?;
                let field_name = name.unwrap_or_default();
                let options = registry.get_or_register(block_type, field_name, options);
                FieldValue::Dropdown { options, selected: 0 }
            }
            FieldType::Variable => FieldValue::Variable { variable: str_of("variable", "item") },
            FieldType::Image => FieldValue::Image {
                src: str_of("src", ""),
                width: num_of("width").unwrap_or(15.0).max(0.0) as u32,
                height: num_of("height").unwrap_or(15.0).max(0.0) as u32,
                alt: str_of("alt", ""),
            },
        };
        Ok(Field::new(name, value))
    }
}

fn constrain_number(value: f64, min: Option<f64>, max: Option<f64>, precision: Option<f64>) -> f64 {
    let mut value = value;
    if let Some(p) = precision.filter(|p| *p > 0.0) {
        value = (value / p).round() * p;
    }
    if let Some(lo) = min {
        value = value.max(lo);
    }
    if let Some(hi) = max {
        value = value.min(hi);
    }
    value
}

fn format_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<(String, String)>>,
    }

    impl FieldObserver for Recorder {
        fn on_value_changed(&self, _field: &Field, old_value: &str, new_value: &str) {
            self.changes.lock().push((old_value.to_string(), new_value.to_string()));
        }
    }

    #[test]
    fn setter_is_noop_on_equal_value() {
        let recorder = Arc::new(Recorder::default());
        let mut field = Field::text_input("NAME", "abc");
        field.register_observer(recorder.clone());
        assert!(!field.set_text("abc"));
        assert!(field.set_text("abd"));
        assert!(!field.set_text("abd"));
        assert_eq!(*recorder.changes.lock(), vec![("abc".to_string(), "abd".to_string())]);
    }

    #[test]
    fn number_respects_constraints() {
        let registry = DropdownOptionsRegistry::new();
        let json = json!({"type": "field_number", "name": "N", "value": 3, "min": 0, "max": 10, "precision": 0.5});
        let mut field = Field::from_json(&json, "t", &registry).unwrap();
        assert_eq!(field.serialized_value(), "3");
        assert!(field.set_from_string("12").unwrap());
        assert_eq!(field.serialized_value(), "10");
        field.set_from_string("2.3").unwrap();
        assert_eq!(field.serialized_value(), "2.5");
        assert!(field.set_from_string("abc").is_err());
    }

    #[test]
    fn checkbox_parses_case_insensitively() {
        let mut field = Field::checkbox("C", false);
        assert!(field.set_from_string("true").unwrap());
        assert_eq!(field.serialized_value(), "TRUE");
        assert!(field.set_from_string("maybe").is_err());
    }

    #[test]
    fn dropdown_selects_by_value() {
        let registry = DropdownOptionsRegistry::new();
        let json = json!({"type": "field_dropdown", "name": "OP", "options": [["+", "ADD"], ["-", "MINUS"]]});
        let mut field = Field::from_json(&json, "math", &registry).unwrap();
        assert_eq!(field.serialized_value(), "ADD");
        assert!(field.set_selected_value("MINUS"));
        assert!(!field.set_selected_value("TIMES"));
        assert_eq!(field.serialized_value(), "MINUS");
    }

    #[test]
    fn dropdown_options_are_shared_per_block_type_and_field() {
        let registry = DropdownOptionsRegistry::new();
        let json = json!({"type": "field_dropdown", "name": "OP", "options": [["a", "A"]]});
        let a = Field::from_json(&json, "math", &registry).unwrap();
        let b = Field::from_json(&json, "math", &registry).unwrap();
        match (a.value(), b.value()) {
            (FieldValue::Dropdown { options: x, .. }, FieldValue::Dropdown { options: y, .. }) => {
                assert!(Arc::ptr_eq(x, y))
            }
            _ => panic!("expected dropdowns"),
        }
    }

    #[test]
    fn registry_last_writer_wins() {
        let registry = DropdownOptionsRegistry::new();
        let first = Arc::new(DropdownOptions::from_pairs([("a", "A")]).unwrap());
        let second = Arc::new(DropdownOptions::from_pairs([("b", "B")]).unwrap());
        registry.register("t", "F", first);
        registry.clone().register("t", "F", second.clone());
        assert!(Arc::ptr_eq(&registry.get("t", "F").unwrap(), &second));
    }

    #[test]
    fn set_options_keeps_selection_when_possible() {
        let options = Arc::new(DropdownOptions::from_pairs([("a", "A"), ("b", "B")]).unwrap());
        let mut field = Field::dropdown("F", options);
        field.set_selected_value("B");
        let narrowed = Arc::new(DropdownOptions::from_pairs([("x", "X"), ("b", "B")]).unwrap());
        assert!(field.set_options(narrowed));
        assert_eq!(field.serialized_value(), "B");
    }

    #[test]
    fn date_validation() {
        assert!("2024-02-29".parse::<FieldDate>().is_ok());
        assert!("2023-02-29".parse::<FieldDate>().is_err());
        assert!("2023-13-01".parse::<FieldDate>().is_err());
        assert_eq!(civil_from_days(0), FieldDate::new(1970, 1, 1).unwrap());
        assert_eq!(civil_from_days(19_782), FieldDate::new(2024, 2, 29).unwrap());
    }

    #[test]
    fn angle_is_normalised() {
        let mut field = Field::new(Some("A"), FieldValue::Angle { degrees: 0.0 });
        field.set_from_string("450").unwrap();
        assert_eq!(field.serialized_value(), "90");
    }

    #[test]
    fn unknown_field_type_is_reported() {
        let registry = DropdownOptionsRegistry::new();
        let err = Field::from_json(&json!({"type": "field_slider", "name": "S"}), "t", &registry).unwrap_err();
        assert_eq!(
            err,
            BlockLoadError::UnknownFieldType {
                block_type: "t".to_string(),
                field_type: "field_slider".to_string()
            }
        );
    }

    #[test]
    fn labels_and_images_are_not_serialized() {
        assert!(!Field::label("hello").is_serializable());
        assert!(Field::text_input("T", "").is_serializable());
    }

    #[test]
    fn typed_values_keep_the_field_constraints() {
        let registry = DropdownOptionsRegistry::new();
        let json = json!({"type": "field_number", "name": "N", "value": 3, "min": 0, "max": 10, "precision": 0.5});
        let mut field = Field::from_json(&json, "t", &registry).unwrap();
        let loose = FieldValue::Number { value: 42.0, min: None, max: None, precision: None };
        assert!(field.set_value(loose));
        assert_eq!(field.serialized_value(), "10");
        let nan = FieldValue::Number { value: f64::NAN, min: None, max: None, precision: None };
        assert!(field.normalize_value(nan).is_err());
        assert!(!field.set_value(FieldValue::Checkbox { checked: true }));
        assert_eq!(field.serialized_value(), "10");
    }

    #[test]
    fn angles_wrap_into_one_turn() {
        let mut field = Field::new(Some("A"), FieldValue::Angle { degrees: 0.0 });
        assert!(field.set_value(FieldValue::Angle { degrees: 450.0 }));
        assert_eq!(field.value(), &FieldValue::Angle { degrees: 90.0 });
        assert!(field.set_value(FieldValue::Angle { degrees: -90.0 }));
        assert_eq!(field.value(), &FieldValue::Angle { degrees: 270.0 });
        assert!(!field.set_value(FieldValue::Angle { degrees: f64::INFINITY }));
    }

    #[test]
    fn out_of_range_selection_is_refused() {
        let registry = DropdownOptionsRegistry::new();
        let json = json!({"type": "field_dropdown", "name": "OP", "options": [["+", "ADD"], ["-", "MINUS"]]});
        let mut field = Field::from_json(&json, "math", &registry).unwrap();
        let options = match field.value() {
            FieldValue::Dropdown { options, .. } => Arc::clone(options),
            _ => panic!("expected a dropdown"),
        };
        let stale = FieldValue::Dropdown { options: Arc::clone(&options), selected: 7 };
        assert!(matches!(
            field.normalize_value(stale.clone()),
            Err(StructureError::InvalidFieldValue { .. })
        ));
        assert!(!field.set_value(stale));
        assert_eq!(field.serialized_value(), "ADD");
        assert!(field.set_value(FieldValue::Dropdown { options, selected: 1 }));
        assert_eq!(field.serialized_value(), "MINUS");
    }
}
