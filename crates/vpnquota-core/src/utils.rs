//! Utility functions for vpnquota-core

use std::process::Command;

use chrono::NaiveDate;

/// Date format used on the wire and in persisted keys (`yyyy-MM-dd`)
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a date the way the accounting server and the settings store expect it
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a `yyyy-MM-dd` date, returning `None` for anything else
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Creates a Command that hides the console window on Windows.
///
/// Used to run the user-supplied tunnel teardown hook without flashing a
/// console window when the CLI is launched from a GUI wrapper.
///
/// # Example
/// ```ignore
/// use vpnquota_core::utils::create_command;
///
/// let status = create_command("wg-quick").arg("down").arg("wg0").status();
/// ```
pub fn create_command(program: &str) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        // CREATE_NO_WINDOW
        cmd.creation_flags(0x08000000);
    }

    cmd
}
