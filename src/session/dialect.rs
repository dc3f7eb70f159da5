//! CLI dialect data: prompt shapes, paging marker, error patterns and the
//! commands used to change mode.

use regex::{Regex, RegexSet};

use crate::error::PollError;

/// Everything the session layer needs to know about one CLI family.
#[derive(Debug, Clone)]
pub struct CliDialect {
    name: &'static str,
    /// Any prompt of this family, optionally in a config sub-mode.
    prompt: Regex,
    /// Same shape as `prompt`, with the hostname captured in group 1.
    hostname: Regex,
    /// Paging marker at the end of the received text.
    more: Regex,
    /// Paging marker anywhere, for cleanup.
    more_marker: Regex,
    password: Regex,
    errors: RegexSet,
    pub enable_command: &'static str,
    pub config_enter: &'static str,
    pub config_exit: &'static str,
    pub setup_commands: &'static [&'static str],
}

fn compile(pattern: &str) -> Result<Regex, PollError> {
    Regex::new(pattern).map_err(|e| PollError::Config(format!("invalid dialect pattern: {e}")))
}

impl CliDialect {
    /// Cisco IOS / IOS-XE.
    pub fn cisco_ios() -> Result<Self, PollError> {
        let errors = RegexSet::new([
            r"^% ?Invalid input",
            r"^% ?Incomplete command",
            r"^% ?Ambiguous command",
            r"^% ?Unknown command",
            r"^% ?Bad ",
            r"^% ?Access denied",
            r"^% ?Invalid (command|parameter)",
            r"^Command authorization failed",
            r"^Command rejected:",
            r"^ERROR:",
        ])
        .map_err(|e| PollError::Config(format!("invalid dialect pattern: {e}")))?;

        Ok(Self {
            name: "cisco_ios",
            prompt: compile(r"^[^\s#>()]+(\([^)]*\))?[#>]\s*$")?,
            hostname: compile(r"^([^\s#>()]+)(\([^)]*\))?[#>]\s*$")?,
            more: compile(r"[ \t]*-{2,} ?\(?[Mm]ore\)? ?-{2,}[ \t]*$")?,
            more_marker: compile(r"[ \t]*-{2,} ?\(?[Mm]ore\)? ?-{2,}[ \t]*")?,
            password: compile(r"(?i)password:\s*$")?,
            errors,
            enable_command: "enable",
            config_enter: "configure terminal",
            config_exit: "end",
            setup_commands: &["terminal length 0", "terminal width 0"],
        })
    }

    /// Looks up the dialect for a device-type tag.
    pub fn for_device_type(tag: &str) -> Result<Self, PollError> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "cisco_ios" | "cisco_xe" | "cisco" => Self::cisco_ios(),
            _ => Err(PollError::UnsupportedDevice(tag.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_prompt(&self, line: &str) -> bool {
        self.prompt.is_match(line)
    }

    /// Hostname part of a prompt line, if the line is a prompt.
    pub fn hostname_of(&self, line: &str) -> Option<String> {
        self.hostname
            .captures(line.trim())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Prompt pattern for one specific host, in any mode.
    pub fn exact_prompt(&self, hostname: &str) -> Result<Regex, PollError> {
        compile(&format!(r"^{}(\([^)]*\))?[#>]\s*$", regex::escape(hostname)))
    }

    pub fn is_more(&self, text: &str) -> bool {
        self.more.is_match(text)
    }

    pub fn strip_more(&self, text: &str) -> String {
        self.more_marker.replace_all(text, "").into_owned()
    }

    pub fn is_password_prompt(&self, text: &str) -> bool {
        self.password.is_match(text)
    }

    /// First output line the device uses to report a failed command.
    pub fn error_line<'a>(&self, output: &'a str) -> Option<&'a str> {
        output
            .lines()
            .map(str::trim)
            .find(|line| self.errors.is_match(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_tags() {
        assert!(CliDialect::for_device_type("cisco_ios").is_ok());
        assert!(CliDialect::for_device_type("Cisco_XE").is_ok());
        let err = CliDialect::for_device_type("juniper_junos").expect_err("unsupported");
        assert!(matches!(err, PollError::UnsupportedDevice(tag) if tag == "juniper_junos"));
    }

    #[test]
    fn prompts_in_every_mode() {
        let dialect = CliDialect::cisco_ios().expect("dialect");
        assert!(dialect.is_prompt("Switch>"));
        assert!(dialect.is_prompt("Switch#"));
        assert!(dialect.is_prompt("Switch(config)#"));
        assert!(dialect.is_prompt("core-sw.lab(config-if)# "));
        assert!(!dialect.is_prompt("Total Mac Addresses for this criterion: 1"));
        assert!(!dialect.is_prompt("interface Gi1/0/1 #"));
    }

    #[test]
    fn hostname_capture_ignores_mode_suffix() {
        let dialect = CliDialect::cisco_ios().expect("dialect");
        assert_eq!(dialect.hostname_of("Switch(config-if)#"), Some("Switch".to_string()));
        assert_eq!(dialect.hostname_of("  edge-1> "), Some("edge-1".to_string()));
        assert_eq!(dialect.hostname_of("Password: "), None);

        let exact = dialect.exact_prompt("edge-1").expect("regex");
        assert!(exact.is_match("edge-1(config)#"));
        assert!(!exact.is_match("edge-10#"));
    }

    #[test]
    fn error_lines_are_found_anywhere() {
        let dialect = CliDialect::cisco_ios().expect("dialect");
        let output = "                   ^\n% Invalid input detected at '^' marker.\n";
        assert_eq!(
            dialect.error_line(output),
            Some("% Invalid input detected at '^' marker.")
        );
        assert_eq!(dialect.error_line("Building configuration...\n[OK]"), None);
    }

    #[test]
    fn paging_marker() {
        let dialect = CliDialect::cisco_ios().expect("dialect");
        assert!(dialect.is_more("Gi1/0/48 ...\n --More-- "));
        assert_eq!(dialect.strip_more("line\n --More-- "), "line\n");
    }
}
