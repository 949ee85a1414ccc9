// src/file_manager.rs - Upload file names and their location on the printer
use thiserror::Error;

/// Characters the Duet web server and DWC cannot cope with in file names.
pub const FORBIDDEN_CHARACTERS: &str = "\"'´`<>()[]?*\\,;:&%#$!";

/// Directory on the SD card (or virtual SD) that holds uploaded jobs.
pub const GCODES_DIR: &str = "0:/gcodes/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileNameError {
    #[error("Filename too short")]
    Empty,
    #[error("Filename cannot contain {chars} (found '{0}')", chars = FORBIDDEN_CHARACTERS)]
    ForbiddenCharacter(char),
    #[error("Filename cannot be \".\" or \"..\"")]
    Reserved,
}

/// Validate a user supplied upload name and append `.gcode` when it has no extension.
pub fn validate_file_name(name: &str) -> Result<String, FileNameError> {
    let name = name.trim();
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARACTERS.contains(*c)) {
        return Err(FileNameError::ForbiddenCharacter(c));
    }
    if name == "." || name == ".." {
        return Err(FileNameError::Reserved);
    }
    if name.is_empty() {
        return Err(FileNameError::Empty);
    }
    if !name.ends_with(".gcode") && !name.contains('.') {
        return Ok(format!("{}.gcode", name));
    }
    Ok(name.to_string())
}

/// Default upload name for a local file: its stem with a `.gcode` extension.
pub fn default_upload_name(local_path: &std::path::Path) -> Option<String> {
    let stem = local_path.file_stem()?.to_str()?;
    Some(format!("{}.gcode", stem))
}

/// Absolute firmware path of an uploaded job, e.g. `0:/gcodes/part.gcode`.
pub fn gcodes_path(file_name: &str) -> String {
    format!("{}{}", GCODES_DIR, file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_valid_names() {
        assert_eq!(validate_file_name("a.gcode").unwrap(), "a.gcode");
        assert_eq!(validate_file_name("  benchy.gcode ").unwrap(), "benchy.gcode");
        assert_eq!(validate_file_name("a/b.gcode").unwrap(), "a/b.gcode");
        assert_eq!(validate_file_name("bracket v2").unwrap(), "bracket v2.gcode");
        // any extension is left alone
        assert_eq!(validate_file_name("part.g").unwrap(), "part.g");
    }

    #[test]
    fn test_rejects_reserved_and_empty() {
        assert_eq!(validate_file_name("."), Err(FileNameError::Reserved));
        assert_eq!(validate_file_name(".."), Err(FileNameError::Reserved));
        assert_eq!(validate_file_name(""), Err(FileNameError::Empty));
        assert_eq!(validate_file_name("   "), Err(FileNameError::Empty));
    }

    #[test]
    fn test_rejects_every_forbidden_character() {
        for c in FORBIDDEN_CHARACTERS.chars() {
            let name = format!("part{}1.gcode", c);
            assert_eq!(validate_file_name(&name), Err(FileNameError::ForbiddenCharacter(c)), "{}", name);
        }
    }

    #[test]
    fn test_default_upload_name() {
        assert_eq!(default_upload_name(Path::new("/tmp/benchy.gcode")).as_deref(), Some("benchy.gcode"));
        assert_eq!(default_upload_name(Path::new("cube.3mf")).as_deref(), Some("cube.gcode"));
    }

    #[test]
    fn test_gcodes_path() {
        assert_eq!(gcodes_path("test.gcode"), "0:/gcodes/test.gcode");
    }
}
