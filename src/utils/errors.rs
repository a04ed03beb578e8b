//! User-Friendly Error Formatting
//!
//! Turns startup failures into a boxed message with the likely cause and
//! what to check, followed by the full error chain.

use std::fmt::Write;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Format error for user consumption
///
/// Picks troubleshooting hints from the error text and appends the
/// technical details.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    writeln!(output).ok();
    writeln!(output, "╔════════════════════════════════════════════════════════════╗").ok();
    writeln!(output, "║                     ERROR                                  ║").ok();
    writeln!(output, "╚════════════════════════════════════════════════════════════╝").ok();
    writeln!(output).ok();

    // Match against the whole chain; the interesting part is often a cause
    let error_msg = format!("{:#}", error);

    if error_msg.contains("already running") || error_msg.contains("pid file") {
        format_instance_error(&mut output);
    } else if error_msg.contains("control endpoint") || error_msg.contains("pipe directory") {
        format_endpoint_error(&mut output, &error_msg);
    } else if error_msg.contains("module") || error_msg.contains("Module") {
        format_module_error(&mut output);
    } else if error_msg.contains("PAM") || error_msg.contains("authentic") {
        format_auth_error(&mut output);
    } else if error_msg.contains("config") {
        format_config_error(&mut output);
    } else {
        format_generic_error(&mut output);
    }

    writeln!(output).ok();
    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Technical Details:").ok();
    writeln!(output).ok();
    writeln!(output, "{:#}", error).ok();
    writeln!(output).ok();

    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Need Help?").ok();
    writeln!(output, "  - Run with --verbose for detailed logs: freerds-session-manager -vvv").ok();
    writeln!(output, "  - Stop a running instance: freerds-session-manager --kill").ok();
    writeln!(output, "╚════════════════════════════════════════════════════════════╝").ok();

    output
}

fn format_instance_error(output: &mut String) {
    writeln!(output, "Session Manager Already Running").ok();
    writeln!(output).ok();
    writeln!(output, "Another session manager owns the pid file.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. The service is already started").ok();
    writeln!(output, "     → Check: systemctl status freerds-session-manager").ok();
    writeln!(output, "     → Stop it: freerds-session-manager --kill").ok();
    writeln!(output).ok();
    writeln!(output, "  2. The pid file directory is not writable").ok();
    writeln!(output, "     → Use --pid-file to choose another location").ok();
}

fn format_endpoint_error(output: &mut String, error: &str) {
    writeln!(output, "Control Endpoint Error").ok();
    writeln!(output).ok();
    writeln!(output, "Could not create the session manager socket.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();

    if error.contains("already in use") {
        writeln!(output, "  1. Another session manager is listening").ok();
        writeln!(output, "     → Stop it first: freerds-session-manager --kill").ok();
    } else if error.contains("ermission") {
        writeln!(output, "  1. No write access to the pipe directory").ok();
        writeln!(output, "     → Run as root or use --pipe-dir with a writable directory").ok();
    } else {
        writeln!(output, "  1. Pipe directory missing or on a read-only filesystem").ok();
        writeln!(output, "     → Check [server] pipe_dir in the configuration").ok();
    }
}

fn format_module_error(output: &mut String) {
    writeln!(output, "Backend Module Error").ok();
    writeln!(output).ok();
    writeln!(output, "Backend module descriptors could not be loaded.").ok();
    writeln!(output).ok();
    writeln!(output, "Check:").ok();
    writeln!(output, "  - [modules] directory exists and is readable").ok();
    writeln!(output, "  - [modules] pattern is a valid glob (default: *.module.toml)").ok();
    writeln!(output, "  - Each descriptor declares api_version = 1").ok();
}

fn format_auth_error(output: &mut String) {
    writeln!(output, "Authentication Setup Error").ok();
    writeln!(output).ok();
    writeln!(output, "The configured authentication provider is not available.").ok();
    writeln!(output).ok();
    writeln!(output, "Check:").ok();
    writeln!(output, "  - [auth] provider is \"pam\" or \"none\"").ok();
    writeln!(output, "  - PAM builds need the pam-auth feature and libpam").ok();
    writeln!(output, "  - /etc/pam.d/<pam_service> exists").ok();
}

fn format_config_error(output: &mut String) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "The configuration file is invalid.").ok();
    writeln!(output).ok();
    writeln!(output, "Check:").ok();
    writeln!(output, "  - TOML syntax (quotes around strings, [section] headers)").ok();
    writeln!(output, "  - Values named in the details below").ok();
    writeln!(output, "  - Default location: /etc/freerds/session-manager.toml").ok();
}

fn format_generic_error(output: &mut String) {
    writeln!(output, "Session Manager Error").ok();
    writeln!(output).ok();
    writeln!(output, "The session manager could not start.").ok();
    writeln!(output).ok();
    writeln!(output, "See the technical details below and the log output above.").ok();
}
