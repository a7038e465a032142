//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates a cosmetic color: `#rgb`, `#rrggbb` or `hsl(h, s%, l%)`.
///
/// # Examples
///
/// ```ignore
/// validate_color("#ff8800")              // Ok
/// validate_color("hsl(120, 100%, 50%)") // Ok
/// validate_color("red")                 // Err - named colors are not accepted
/// ```
pub fn validate_color(color: &str) -> Result<(), ValidationError> {
    if let Some(hex) = color.strip_prefix('#') {
        if matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(());
        }
        return Err(color_error("color_hex", "hex colors must be #rgb or #rrggbb"));
    }

    if let Some(body) = color
        .strip_prefix("hsl(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        if is_valid_hsl(body) {
            return Ok(());
        }
        return Err(color_error(
            "color_hsl",
            "hsl colors must be hsl(0-360, 0-100%, 0-100%)",
        ));
    }

    Err(color_error(
        "color_format",
        "color must be a hex or hsl() value",
    ))
}

fn is_valid_hsl(body: &str) -> bool {
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    let [hue, saturation, lightness] = parts.as_slice() else {
        return false;
    };

    let hue_ok = hue
        .parse::<f64>()
        .is_ok_and(|h| (0.0..=360.0).contains(&h));

    hue_ok && is_percent(saturation) && is_percent(lightness)
}

fn is_percent(raw: &str) -> bool {
    raw.strip_suffix('%')
        .and_then(|value| value.parse::<f64>().ok())
        .is_some_and(|value| (0.0..=100.0).contains(&value))
}

fn color_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates that every map row contains only printable ASCII characters.
pub fn validate_layout_rows(rows: &[String]) -> Result<(), ValidationError> {
    if let Some(index) = rows
        .iter()
        .position(|row| !row.chars().all(|c| c.is_ascii_graphic() || c == ' '))
    {
        let mut err = ValidationError::new("layout_row_charset");
        err.message = Some(format!("row {index} contains non-printable characters").into());
        return Err(err);
    }

    Ok(())
}
