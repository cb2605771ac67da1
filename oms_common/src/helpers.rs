/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a numeric setting, returning `Err` with a printable reason if the value is present but invalid.
pub fn parse_number<T: std::str::FromStr>(value: Option<String>, default: T) -> Result<T, String>
where T::Err: std::fmt::Display {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse::<T>().map_err(|e| format!("'{v}' is not a valid number. {e}")),
    }
}
