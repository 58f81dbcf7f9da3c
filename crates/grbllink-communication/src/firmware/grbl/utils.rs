//! GRBL Protocol Utilities
//!
//! Wire constants and small text helpers shared by the protocol operations.

/// Terminator appended to every line command.
pub const LINE_TERMINATOR: char = '\n';

/// Status query. Sent as text without a terminator.
pub const STATUS_QUERY: &str = "?";

/// Realtime jog-cancel byte. Sent raw, without a terminator.
pub const JOG_CANCEL: u8 = 0x85;

/// Realtime soft-reset byte.
///
/// Never used for aborting: after a reset some firmware builds refuse
/// further jog commands. Batch aborts are plain command lists instead.
pub const SOFT_RESET: u8 = 0x18;

/// Acknowledgment token.
pub const ACK_TOKEN: &str = "ok";

/// Validates a GRBL acknowledgment line
///
/// Matches the trimmed line against `ok`, ignoring case.
pub fn is_acknowledgment(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(ACK_TOKEN)
}

/// Check if a line looks like a status report (`<State|...>`)
pub fn is_status_report(line: &str) -> bool {
    line.trim_start().starts_with('<')
}

/// Check if a response indicates an error or alarm
///
/// Only used for logging; error lines are passed through as text.
pub fn is_command_error(response: &str) -> bool {
    let trimmed = response.trim().to_ascii_lowercase();
    trimmed.starts_with("error:") || trimmed.starts_with("alarm:")
}

/// Validate that a command fits on a single line
pub fn validate_command(command: &str) -> Result<(), String> {
    if command.contains(['\n', '\r']) {
        return Err(format!("command contains a line terminator: {:?}", command));
    }
    Ok(())
}

/// Format a distance for a jog command
///
/// Up to four decimals with trailing zeros removed (`0.1`, `0.01`, `0.055`).
pub fn format_distance(value: f64) -> String {
    let text = format!("{:.4}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Format a position value with appropriate precision
pub fn format_position(value: f64) -> String {
    format!("{:.3}", value)
}

/// Format an optional axis value, `-` when absent
pub fn format_axis(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), format_position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledgment_matching() {
        assert!(is_acknowledgment("ok"));
        assert!(is_acknowledgment("  OK \t"));
        assert!(is_acknowledgment("Ok"));
        assert!(!is_acknowledgment("okay"));
        assert!(!is_acknowledgment("error:20"));
        assert!(!is_acknowledgment(""));
    }

    #[test]
    fn test_status_report_detection() {
        assert!(is_status_report("<Idle|MPos:0.000,0.000,0.000|FS:0,0>"));
        assert!(!is_status_report("[VER:1.1h.20190825:]"));
    }

    #[test]
    fn test_command_error_detection() {
        assert!(is_command_error("error:9"));
        assert!(is_command_error("ALARM:1"));
        assert!(!is_command_error("ok"));
    }

    #[test]
    fn test_validate_command() {
        assert!(validate_command("G0 X1").is_ok());
        assert!(validate_command("G0 X1\nG0 X2").is_err());
        assert!(validate_command("G0\r").is_err());
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.1), "0.1");
        assert_eq!(format_distance(0.01), "0.01");
        assert_eq!(format_distance(0.055), "0.055");
        assert_eq!(format_distance(1.0), "1");
        assert_eq!(format_distance(0.0), "0");
    }

    #[test]
    fn test_format_axis() {
        assert_eq!(format_axis(Some(-2.5)), "-2.500");
        assert_eq!(format_axis(None), "-");
    }
}
