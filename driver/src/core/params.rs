//! Song parameters that are only observable through menu labels.
//!
//! RealBand renders the current key, meter, and tempo inside the label of the
//! menu item that edits them (e.g. `Key Signature [Bb]`). Reading a parameter
//! therefore means reading a label and matching it against a fixed pattern.
//! All patterns, menu paths, and edit recipes live in [`PARAMETER_TABLE`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::DriverError;

/// A song parameter exposed through a menu label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Key,
    TimeSignature,
    Tempo,
}

impl Parameter {
    pub const ALL: [Parameter; 3] = [Parameter::Key, Parameter::TimeSignature, Parameter::Tempo];

    pub fn name(self) -> &'static str {
        match self {
            Parameter::Key => "key",
            Parameter::TimeSignature => "time_signature",
            Parameter::Tempo => "tempo",
        }
    }

    pub fn spec(self) -> &'static ParameterSpec {
        match self {
            Parameter::Key => &PARAMETER_TABLE[0],
            Parameter::TimeSignature => &PARAMETER_TABLE[1],
            Parameter::Tempo => &PARAMETER_TABLE[2],
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Text(String),
    Number(f64),
}

impl ParameterValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(text) => Some(text),
            ParameterValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParameterValue::Number(value) => Some(*value),
            ParameterValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Text(text) => f.write_str(text),
            ParameterValue::Number(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Number,
}

/// How to change a parameter through its settings dialog.
///
/// Controls are named by window class and 1-based ordinal among siblings of
/// that class.
#[derive(Debug)]
pub struct SettingsRecipe {
    /// Window class of the settings dialog.
    pub dialog_class: &'static str,
    /// Combo box receiving the new value.
    pub value_control: (&'static str, usize),
    /// Buttons clicked after the value is set, in order (options, then OK).
    pub confirm_clicks: &'static [(&'static str, usize)],
}

/// One row of the parameter table.
#[derive(Debug)]
pub struct ParameterSpec {
    pub parameter: Parameter,
    /// Menu item whose label carries the current value.
    pub menu_path: &'static str,
    /// Bracketed value at the end of the label; group 1 is the value.
    pub label_pattern: &'static str,
    /// Shape of a value accepted by `set_parameter`, anchored.
    pub value_pattern: &'static str,
    pub kind: ValueKind,
    pub setter: Option<SettingsRecipe>,
}

pub static PARAMETER_TABLE: [ParameterSpec; 3] = [
    ParameterSpec {
        parameter: Parameter::Key,
        menu_path: "Edit->Key Signature",
        label_pattern: r"\[([A-G].?)\]$",
        value_pattern: r"^[A-G].?$",
        kind: ValueKind::Text,
        setter: Some(SettingsRecipe {
            dialog_class: "TKEY",
            value_control: ("TComboBox", 1),
            // "No Transpose", then OK.
            confirm_clicks: &[("TRadioButton", 4), ("TButton", 3)],
        }),
    },
    ParameterSpec {
        parameter: Parameter::TimeSignature,
        menu_path: "Edit->Meter (Time Signature)",
        label_pattern: r"\[([0-9]+/[0-9]+)\]$",
        value_pattern: r"^[0-9]+/[0-9]+$",
        kind: ValueKind::Text,
        setter: None,
    },
    ParameterSpec {
        parameter: Parameter::Tempo,
        menu_path: "Edit->Tempo",
        label_pattern: r"\[([0-9.,]+)\]$",
        value_pattern: r"^[0-9]+([.,][0-9]+)?$",
        kind: ValueKind::Number,
        setter: None,
    },
];

struct Compiled {
    label: Regex,
    value: Regex,
}

static COMPILED: LazyLock<Vec<Compiled>> = LazyLock::new(|| {
    PARAMETER_TABLE
        .iter()
        .map(|spec| Compiled {
            label: Regex::new(spec.label_pattern).unwrap(),
            value: Regex::new(spec.value_pattern).unwrap(),
        })
        .collect()
});

fn compiled(parameter: Parameter) -> &'static Compiled {
    let index = PARAMETER_TABLE
        .iter()
        .position(|spec| spec.parameter == parameter)
        .unwrap_or_default();
    &COMPILED[index]
}

/// Extract a parameter value from the menu label that displays it.
pub fn parse_label(parameter: Parameter, label: &str) -> Result<ParameterValue, DriverError> {
    let spec = parameter.spec();
    let format_error = || DriverError::ParameterFormat {
        parameter,
        label: label.to_string(),
    };
    let raw = compiled(parameter)
        .label
        .captures(label.trim_end())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(format_error)?;
    match spec.kind {
        ValueKind::Text => Ok(ParameterValue::Text(raw.to_string())),
        ValueKind::Number => raw
            .replace(',', ".")
            .parse::<f64>()
            .map(ParameterValue::Number)
            .map_err(|_| format_error()),
    }
}

/// Check a value before it is typed into a settings dialog.
pub fn validate_value(parameter: Parameter, value: &str) -> Result<(), DriverError> {
    if compiled(parameter).value.is_match(value) {
        Ok(())
    } else {
        Err(DriverError::InvalidValue {
            parameter: parameter.to_string(),
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rows_match_their_parameter() {
        for parameter in Parameter::ALL {
            assert_eq!(parameter.spec().parameter, parameter);
        }
    }

    #[test]
    fn parses_time_signature() {
        let value = parse_label(Parameter::TimeSignature, "Meter (Time Signature)... [3/4]")
            .expect("parse");
        assert_eq!(value, ParameterValue::Text("3/4".to_string()));
    }

    #[test]
    fn parses_flat_key() {
        let value = parse_label(Parameter::Key, "Key Signature [Bb]").expect("parse");
        assert_eq!(value.as_text(), Some("Bb"));
    }

    #[test]
    fn parses_tempo_as_float() {
        let value = parse_label(Parameter::Tempo, "Tempo... [120.5]").expect("parse");
        assert_eq!(value.as_number(), Some(120.5));
    }

    #[test]
    fn tempo_accepts_decimal_comma() {
        let value = parse_label(Parameter::Tempo, "Tempo [98,5] ").expect("parse");
        assert_eq!(value, ParameterValue::Number(98.5));
    }

    #[test]
    fn label_without_bracketed_value_is_a_format_error() {
        let err = parse_label(Parameter::Key, "Key Signature").unwrap_err();
        assert!(matches!(
            err,
            DriverError::ParameterFormat {
                parameter: Parameter::Key,
                ..
            }
        ));
    }

    #[test]
    fn value_must_be_at_end_of_label() {
        assert!(parse_label(Parameter::TimeSignature, "Meter [4/4] (locked)").is_err());
    }

    #[test]
    fn validates_values_before_writing() {
        assert!(validate_value(Parameter::Key, "F#").is_ok());
        assert!(validate_value(Parameter::Key, "H").is_err());
        assert!(validate_value(Parameter::Tempo, "120").is_ok());
        assert!(validate_value(Parameter::Tempo, "fast").is_err());
    }
}
