//! Scanned-label decoding.
//!
//! Unit labels carry a GS1-style payload: application identifier `01`
//! followed by the global trade item number, `11` followed by the
//! manufacture date, `21` followed by the serial number. The pattern is
//! configurable; the default matches the standard label format.

use regex::Regex;

use crate::error::{AppResult, HtfError};

/// Default GS1 label pattern with named capture groups.
pub const GS1_PATTERN: &str = r"(01)(?P<global_trade_item_number>\d{14})(11)(?P<manufacture_date>\d{6})(21)(?P<serial_number>\d{5})";

/// Fields decoded from a scanned label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedLabel {
    pub global_trade_item_number: String,
    pub manufacture_date: Option<String>,
    pub serial_number: String,
}

/// Pure decoder mapping a raw scanned string to its structured fields.
#[derive(Clone, Debug)]
pub struct LabelDecoder {
    pattern: Regex,
}

impl LabelDecoder {
    /// Compile a decoder from a pattern. The pattern must define the
    /// `global_trade_item_number` and `serial_number` capture groups;
    /// `manufacture_date` is optional.
    pub fn new(pattern: &str) -> AppResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| HtfError::Configuration(format!("invalid label pattern: {e}")))?;
        let names: Vec<_> = pattern.capture_names().flatten().collect();
        for required in ["global_trade_item_number", "serial_number"] {
            if !names.contains(&required) {
                return Err(HtfError::Configuration(format!(
                    "label pattern is missing the {required} capture group"
                )));
            }
        }
        Ok(Self { pattern })
    }

    /// Decode a raw scanned string. `None` when the label does not match.
    pub fn decode(&self, raw: &str) -> Option<DecodedLabel> {
        let captures = self.pattern.captures(raw)?;
        Some(DecodedLabel {
            global_trade_item_number: captures["global_trade_item_number"].to_string(),
            manufacture_date: captures
                .name("manufacture_date")
                .map(|m| m.as_str().to_string()),
            serial_number: captures["serial_number"].to_string(),
        })
    }
}

impl Default for LabelDecoder {
    fn default() -> Self {
        // The bundled pattern always compiles and carries both groups.
        Self::new(GS1_PATTERN).unwrap_or_else(|_| unreachable!())
    }
}
