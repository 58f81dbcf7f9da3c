//! Settings catalog
//!
//! Labels, units and value kinds of the standard GRBL `$n` settings, for
//! displaying and checking a `$$` table.

use serde::Serialize;

/// Setting data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SettingKind {
    /// Numeric value
    Numeric,
    /// `0` or `1`
    Boolean,
    /// Integer bit mask
    Mask,
    /// Per-axis bits, X = 1, Y = 2, Z = 4
    AxisBitfield,
}

/// Description of one `$n` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettingDescriptor {
    /// Key as it appears in `$$` output (`$0`, `$110`, ...)
    pub key: &'static str,
    /// Human readable label
    pub label: &'static str,
    /// Unit, if any
    pub unit: Option<&'static str>,
    /// Value kind
    pub kind: SettingKind,
}

const AXES: [char; 3] = ['X', 'Y', 'Z'];

impl SettingDescriptor {
    const fn new(
        key: &'static str,
        label: &'static str,
        unit: Option<&'static str>,
        kind: SettingKind,
    ) -> Self {
        Self {
            key,
            label,
            unit,
            kind,
        }
    }

    /// Validate a setting value
    pub fn validate(&self, value: &str) -> Result<(), String> {
        let value = value.trim();
        match self.kind {
            SettingKind::Numeric => {
                let num: f64 = value
                    .parse()
                    .map_err(|_| format!("{}: {:?} is not a number", self.key, value))?;
                if num < 0.0 {
                    return Err(format!("{}: value {} is below minimum 0", self.key, num));
                }
                Ok(())
            }
            SettingKind::Boolean => match value {
                "0" | "1" => Ok(()),
                _ => Err(format!("{}: expected 0 or 1, got {:?}", self.key, value)),
            },
            SettingKind::Mask => value
                .parse::<u8>()
                .map(|_| ())
                .map_err(|_| format!("{}: {:?} is not a mask", self.key, value)),
            SettingKind::AxisBitfield => match value.parse::<u8>() {
                Ok(bits) if bits < 8 => Ok(()),
                _ => Err(format!("{}: {:?} is not an axis bitfield", self.key, value)),
            },
        }
    }

    /// Axes set in an axis bitfield value (`"5"` gives `['X', 'Z']`)
    pub fn axes(&self, value: &str) -> Option<Vec<char>> {
        if self.kind != SettingKind::AxisBitfield {
            return None;
        }
        let bits = value.trim().parse::<u8>().ok()?;
        Some(
            AXES.iter()
                .enumerate()
                .filter(|(i, _)| bits & (1 << i) != 0)
                .map(|(_, axis)| *axis)
                .collect(),
        )
    }

    /// Label with unit, e.g. `Homing feed (mm/min)`
    pub fn display_label(&self) -> String {
        match self.unit {
            Some(unit) => format!("{} ({})", self.label, unit),
            None => self.label.to_string(),
        }
    }
}

use SettingKind::{AxisBitfield, Boolean, Mask, Numeric};

static CATALOG: [SettingDescriptor; 34] = [
    SettingDescriptor::new("$0", "Step pulse", Some("usec"), Numeric),
    SettingDescriptor::new("$1", "Step idle delay", Some("msec"), Numeric),
    SettingDescriptor::new("$2", "Step port invert", None, AxisBitfield),
    SettingDescriptor::new("$3", "Direction port invert", None, AxisBitfield),
    SettingDescriptor::new("$4", "Step enable invert", None, Boolean),
    SettingDescriptor::new("$5", "Limit pins invert", None, Boolean),
    SettingDescriptor::new("$6", "Probe pin invert", None, Boolean),
    SettingDescriptor::new("$10", "Status report", None, Mask),
    SettingDescriptor::new("$11", "Junction deviation", Some("mm"), Numeric),
    SettingDescriptor::new("$12", "Arc tolerance", Some("mm"), Numeric),
    SettingDescriptor::new("$13", "Report inches", None, Boolean),
    SettingDescriptor::new("$20", "Soft limits", None, Boolean),
    SettingDescriptor::new("$21", "Hard limits", None, Boolean),
    SettingDescriptor::new("$22", "Homing cycle", None, Boolean),
    SettingDescriptor::new("$23", "Homing dir invert", None, AxisBitfield),
    SettingDescriptor::new("$24", "Homing feed", Some("mm/min"), Numeric),
    SettingDescriptor::new("$25", "Homing seek", Some("mm/min"), Numeric),
    SettingDescriptor::new("$26", "Homing debounce", Some("msec"), Numeric),
    SettingDescriptor::new("$27", "Homing pull-off", Some("mm"), Numeric),
    SettingDescriptor::new("$30", "Max spindle speed", Some("RPM"), Numeric),
    SettingDescriptor::new("$31", "Min spindle speed", Some("RPM"), Numeric),
    SettingDescriptor::new("$32", "Laser mode", None, Boolean),
    SettingDescriptor::new("$100", "X Axis", Some("steps/mm"), Numeric),
    SettingDescriptor::new("$101", "Y Axis", Some("steps/mm"), Numeric),
    SettingDescriptor::new("$102", "Z Axis", Some("steps/mm"), Numeric),
    SettingDescriptor::new("$110", "X Max rate", Some("mm/min"), Numeric),
    SettingDescriptor::new("$111", "Y Max rate", Some("mm/min"), Numeric),
    SettingDescriptor::new("$112", "Z Max rate", Some("mm/min"), Numeric),
    SettingDescriptor::new("$120", "X Acceleration", Some("mm/sec\u{00B2}"), Numeric),
    SettingDescriptor::new("$121", "Y Acceleration", Some("mm/sec\u{00B2}"), Numeric),
    SettingDescriptor::new("$122", "Z Acceleration", Some("mm/sec\u{00B2}"), Numeric),
    SettingDescriptor::new("$130", "X Max travel", Some("mm"), Numeric),
    SettingDescriptor::new("$131", "Y Max travel", Some("mm"), Numeric),
    SettingDescriptor::new("$132", "Z Max travel", Some("mm"), Numeric),
];

/// All known settings, in display order
pub fn catalog() -> &'static [SettingDescriptor] {
    &CATALOG
}

/// Descriptor for `key` (`$110`), if known
pub fn describe(key: &str) -> Option<&'static SettingDescriptor> {
    CATALOG.iter().find(|d| d.key == key.trim())
}
