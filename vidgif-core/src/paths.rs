//! Output and settings file locations.

use std::env;
use std::path::{Path, PathBuf};

/// Settings file name, looked up next to the executable
pub const SETTINGS_FILE: &str = "vidgif.ini";

/// Destination for converting `input`: same directory and stem, `.gif`
/// extension. A `.gif` input gets `<stem>.converted.gif` so it is never
/// overwritten by its own output.
pub fn gif_path(input: &Path) -> PathBuf {
    let is_gif = input
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gif"))
        .unwrap_or(false);
    if is_gif {
        input.with_extension("converted.gif")
    } else if input.extension().is_some() {
        input.with_extension("gif")
    } else {
        // directories and extensionless files keep their full name
        let mut name = input.as_os_str().to_os_string();
        name.push(".gif");
        PathBuf::from(name)
    }
}

/// `vidgif.ini` in the executable's directory, or in the working directory
/// when the executable path is unknown.
pub fn default_settings_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(SETTINGS_FILE)))
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE))
}
