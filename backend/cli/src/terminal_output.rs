//! Terminal output: ANSI formatting and user-facing notes.
//!
//! Notes go to stderr; stdout only ever carries the pairing code and the
//! received payload, so both can be piped.

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";

pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";

/// Check if the terminal supports color output.
pub fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
        && (std::env::var("COLORTERM").is_ok()
            || std::env::var("TERM").map(|t| t != "dumb").unwrap_or(false))
}

pub fn note_info(msg: &str) {
    if supports_color() {
        eprintln!("{CYAN}{BOLD}ℹ{RESET} {msg}");
    } else {
        eprintln!("INFO: {msg}");
    }
}

pub fn note_warn(msg: &str) {
    if supports_color() {
        eprintln!("{YELLOW}{BOLD}⚠{RESET} {msg}");
    } else {
        eprintln!("WARN: {msg}");
    }
}

pub fn note_error(msg: &str) {
    if supports_color() {
        eprintln!("{RED}{BOLD}✗{RESET} {msg}");
    } else {
        eprintln!("ERROR: {msg}");
    }
}

pub fn note_success(msg: &str) {
    if supports_color() {
        eprintln!("{GREEN}{BOLD}✓{RESET} {msg}");
    } else {
        eprintln!("OK: {msg}");
    }
}

/// The code as printed on stdout for the user to read out.
pub fn code_banner(code: &str, color: bool) -> String {
    if color {
        format!("{BOLD}{code}{RESET}")
    } else {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_banner_is_just_the_code() {
        assert_eq!(code_banner("7QKMX4TB-h3wd", false), "7QKMX4TB-h3wd");
    }

    #[test]
    fn colored_banner_wraps_the_code() {
        let banner = code_banner("7QKMX4TB-h3wd", true);
        assert!(banner.starts_with(BOLD));
        assert!(banner.ends_with(RESET));
        assert!(banner.contains("7QKMX4TB-h3wd"));
    }
}
