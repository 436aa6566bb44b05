use std::path::Path;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub fn resolve_adb_program(configured: &str) -> String {
    let normalized = normalize_command_path(configured);
    if normalized.is_empty() {
        "adb".to_string()
    } else {
        normalized
    }
}

/// A bare program name is left to PATH lookup; explicit paths must exist.
pub fn validate_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("command path is empty".to_string());
    }
    if !program.contains(std::path::MAIN_SEPARATOR) && !program.contains('/') {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(format!("{program} is a directory, not an executable"));
    }
    if !path.exists() {
        return Err(format!("{program} not found"));
    }
    Ok(())
}
