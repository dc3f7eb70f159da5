//! Parsers for Cisco `show` output.
//!
//! Interface names are normalized to their short form (`GigabitEthernet1/0/1`
//! becomes `Gi1/0/1`) so every listing method keys interfaces the same way.

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::PollError;
use crate::model::{ArpEntry, DeviceIdentity, InterfaceState, LinkStatus, MacEntry, Vlan};

macro_rules! lazy_regex {
    ($name:ident, $pattern:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| match Regex::new($pattern) {
            Ok(re) => re,
            Err(err) => panic!("invalid {} regex: {err}", stringify!($name)),
        });
    };
}

lazy_regex!(INTERFACE_NAME, r"^[A-Za-z][A-Za-z\-]*\d+(/\d+)*(\.\d+)?(:\d+)?$");
lazy_regex!(
    BRIEF_LINE,
    r"^(\S+)\s+(\S+)\s+(YES|NO)\s+(\S+)\s+(administratively down|up|down|deleted)\s+(up|down)\s*$"
);
lazy_regex!(
    LINE_PROTOCOL,
    r"^(\S+) is (administratively down|up|down)(?:, line protocol is (up|down))?"
);
lazy_regex!(
    MAC_LINE,
    r"^(\S+)\s+([0-9a-fA-F]{4}\.[0-9a-fA-F]{4}\.[0-9a-fA-F]{4}|(?:[0-9a-fA-F]{2}[:-]){5}[0-9a-fA-F]{2})\s+(\S+)\s+(.+?)\s*$"
);
lazy_regex!(UPTIME, r"(?m)^(\S+) uptime is\s+(.+?)\s*$");
lazy_regex!(VERSION, r"Version\s+([^\s,]+)");
lazy_regex!(MODEL_NUMBER, r"(?mi)^Model number\s*:\s*(\S+)");
lazy_regex!(MODEL_PROCESSOR, r"(?mi)^cisco\s+(\S+)\s+\(");
lazy_regex!(MODEL_HARDWARE, r"(?mi)Hardware:\s*([^\s,]+)");
lazy_regex!(SERIAL_SYSTEM, r"(?mi)^System serial number\s*:\s*(\S+)");
lazy_regex!(SERIAL_BOARD, r"(?mi)Processor board ID\s+(\S+)");

const SHORT_NAMES: &[(&str, &str)] = &[
    ("TwentyFiveGigE", "Twe"),
    ("HundredGigE", "Hu"),
    ("FortyGigabitEthernet", "Fo"),
    ("TwoGigabitEthernet", "Tw"),
    ("TenGigabitEthernet", "Te"),
    ("GigabitEthernet", "Gi"),
    ("FastEthernet", "Fa"),
    ("Ethernet", "Et"),
    ("Port-channel", "Po"),
    ("Loopback", "Lo"),
    ("Tunnel", "Tu"),
    ("Vlan", "Vl"),
];

/// Status words that can appear in the Status column.
const STATUS_WORDS: &[&str] = &[
    "connected",
    "notconnect",
    "notconnected",
    "disabled",
    "err-disabled",
    "inactive",
    "monitoring",
    "faulty",
    "sfpAbsent",
    "xcvrAbsent",
    "suspended",
    "up",
    "down",
];

/// Abbreviates a long interface name (`GigabitEthernet1/0/1` -> `Gi1/0/1`).
/// Already short or unknown names are returned unchanged.
pub fn normalize_interface_name(name: &str) -> String {
    for (long, short) in SHORT_NAMES {
        if let (Some(prefix), Some(rest)) = (name.get(..long.len()), name.get(long.len()..))
            && prefix.eq_ignore_ascii_case(long)
            && rest.starts_with(|c: char| c.is_ascii_digit())
        {
            return format!("{short}{rest}");
        }
    }
    name.to_string()
}

fn looks_like_interface(token: &str) -> bool {
    INTERFACE_NAME.is_match(token)
}

/// Column offsets taken from the `show interfaces status` header.
struct StatusColumns {
    name: usize,
    status: usize,
}

impl StatusColumns {
    fn from_header(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        if !trimmed.starts_with("Port") || !line.contains("Status") {
            return None;
        }
        Some(Self {
            name: line.find("Name")?,
            status: line.find("Status")?,
        })
    }

    /// Splits a data line into (name, rest-from-status) when it is aligned
    /// with the header.
    fn split<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        if self.name >= self.status || line.len() <= self.status {
            return None;
        }
        let before = line.get(..self.status)?;
        if !before.ends_with(char::is_whitespace) {
            return None;
        }
        let name = line.get(self.name..self.status)?.trim();
        let rest = line.get(self.status..)?.trim();
        Some((name, rest))
    }
}

fn status_row(port: &str, name: &str, columns: &[&str], raw: &str) -> InterfaceState {
    let status_text = columns.first().copied().unwrap_or("unknown");
    let field = |idx: usize| columns.get(idx).copied().unwrap_or("unknown").to_string();
    let port_type = if columns.len() > 4 {
        columns[4..].join(" ")
    } else {
        "unknown".to_string()
    };
    InterfaceState {
        name: normalize_interface_name(port),
        status: LinkStatus::from_device_text(status_text),
        status_text: status_text.to_string(),
        vlan: Vlan::from_device_text(columns.get(1).copied().unwrap_or("")),
        duplex: field(2),
        speed: field(3),
        port_type,
        description: name.to_string(),
        raw: raw.to_string(),
    }
}

/// Parses `show interfaces status`.
///
/// Columns are located from the header so descriptions containing spaces
/// survive. Lines that do not line up with the header are split on
/// whitespace, using the first known status word to find where the
/// description ends.
pub fn parse_interfaces_status(output: &str) -> Vec<InterfaceState> {
    let mut columns: Option<StatusColumns> = None;
    let mut interfaces: Vec<InterfaceState> = Vec::new();

    for line in output.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() || line.trim_start().starts_with(['-', '=']) {
            continue;
        }
        if let Some(header) = StatusColumns::from_header(line) {
            columns = Some(header);
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(port) = tokens.first().copied() else {
            continue;
        };
        if tokens.len() < 2 || !looks_like_interface(port) {
            continue;
        }

        let aligned = columns.as_ref().and_then(|c| c.split(line));
        let row = match aligned {
            Some((name, rest)) => {
                let rest: Vec<&str> = rest.split_whitespace().collect();
                status_row(port, name, &rest, line)
            }
            None => {
                let status_idx = tokens[1..]
                    .iter()
                    .position(|t| STATUS_WORDS.iter().any(|w| w.eq_ignore_ascii_case(t)))
                    .map_or(1, |pos| pos + 1);
                let name = tokens[1..status_idx].join(" ");
                status_row(port, &name, &tokens[status_idx..], line)
            }
        };
        trace!("status row {} -> {}/{}", row.name, row.status_text, row.vlan);
        if interfaces.iter().all(|i| i.name != row.name) {
            interfaces.push(row);
        }
    }

    debug!("parsed {} interfaces from status table", interfaces.len());
    interfaces
}

/// Parses `show ip interface brief`. The link state follows the protocol
/// column; VLAN, speed and duplex are unknown in this listing.
pub fn parse_ip_interface_brief(output: &str) -> Vec<InterfaceState> {
    let mut interfaces: Vec<InterfaceState> = Vec::new();
    for line in output.lines() {
        let Some(caps) = BRIEF_LINE.captures(line.trim()) else {
            continue;
        };
        let status_text = &caps[5];
        let status = if status_text == "administratively down" {
            LinkStatus::Down
        } else {
            LinkStatus::from_device_text(&caps[6])
        };
        let mut row = InterfaceState::new(normalize_interface_name(&caps[1]), status);
        row.status_text = status_text.to_string();
        row.raw = line.trim().to_string();
        if interfaces.iter().all(|i| i.name != row.name) {
            interfaces.push(row);
        }
    }
    debug!("parsed {} interfaces from brief listing", interfaces.len());
    interfaces
}

/// Parses `show interfaces | include line protocol`.
pub fn parse_line_protocol(output: &str) -> Vec<InterfaceState> {
    let mut interfaces: Vec<InterfaceState> = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some(caps) = LINE_PROTOCOL.captures(line) else {
            continue;
        };
        let admin = &caps[2];
        let protocol = caps.get(3).map(|m| m.as_str());
        let (status, status_text) = match (admin, protocol) {
            ("administratively down", _) => (LinkStatus::Down, "disabled"),
            ("up", Some("up")) => (LinkStatus::Up, "connected"),
            ("up", _) => (LinkStatus::Down, "down"),
            _ if line.contains("notconnect") => (LinkStatus::Down, "notconnect"),
            _ => (LinkStatus::Down, "down"),
        };
        let mut row = InterfaceState::new(normalize_interface_name(&caps[1]), status);
        row.status_text = status_text.to_string();
        row.raw = line.to_string();
        if interfaces.iter().all(|i| i.name != row.name) {
            interfaces.push(row);
        }
    }
    debug!("parsed {} interfaces from line protocol listing", interfaces.len());
    interfaces
}

fn first_capture(output: &str, patterns: &[&Lazy<Regex>]) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

/// Parses `show version`.
pub fn parse_version(output: &str) -> Result<DeviceIdentity, PollError> {
    let (hostname, uptime) = match UPTIME.captures(output) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => return Err(PollError::Parse("no uptime line in show version output".to_string())),
    };
    Ok(DeviceIdentity {
        hostname,
        model: first_capture(output, &[&MODEL_NUMBER, &MODEL_PROCESSOR, &MODEL_HARDWARE])
            .unwrap_or_else(|| "unknown".to_string()),
        serial: first_capture(output, &[&SERIAL_SYSTEM, &SERIAL_BOARD])
            .unwrap_or_else(|| "unknown".to_string()),
        version: first_capture(output, &[&VERSION]).unwrap_or_else(|| "unknown".to_string()),
        uptime,
    })
}

/// Parses `show mac address-table`.
pub fn parse_mac_table(output: &str) -> Vec<MacEntry> {
    output
        .lines()
        .filter_map(|line| MAC_LINE.captures(line.trim()))
        .map(|caps| MacEntry {
            vlan: caps[1].to_string(),
            mac: caps[2].to_ascii_lowercase(),
            entry_type: caps[3].to_string(),
            ports: caps[4]
                .split([',', ' '])
                .filter(|p| !p.is_empty())
                .map(normalize_interface_name)
                .collect::<Vec<_>>()
                .join(","),
        })
        .collect()
}

/// Parses `show arp`.
pub fn parse_arp_table(output: &str) -> Vec<ArpEntry> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 || parts[0] != "Internet" {
                return None;
            }
            Some(ArpEntry {
                ip: parts[1].to_string(),
                age: parts[2].to_string(),
                mac: parts[3].to_ascii_lowercase(),
                entry_type: parts[4].to_string(),
                interface: normalize_interface_name(parts[5]),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "
Port      Name               Status       Vlan       Duplex  Speed Type
Gi1/0/1   uplink to core     connected    trunk      a-full  a-1000 10/100/1000BaseTX
Gi1/0/2                      notconnect   10           auto   auto 10/100/1000BaseTX
Gi1/0/3   printer            disabled     20           auto   auto 10/100/1000BaseTX
Gi1/0/4   cam                err-disabled 30           auto   auto 10/100/1000BaseTX
Po1                          connected    routed     a-full a-10G
";

    #[test]
    fn status_table_uses_header_columns() {
        let rows = parse_interfaces_status(STATUS);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Gi1/0/1", "Gi1/0/2", "Gi1/0/3", "Gi1/0/4", "Po1"]);

        assert_eq!(rows[0].description, "uplink to core");
        assert_eq!(rows[0].status, LinkStatus::Up);
        assert_eq!(rows[0].vlan, Vlan::Trunk);
        assert_eq!(rows[0].port_type, "10/100/1000BaseTX");

        assert_eq!(rows[1].description, "");
        assert_eq!(rows[1].vlan, Vlan::Access(10));
        assert_eq!(rows[2].status, LinkStatus::Down);
        assert_eq!(rows[2].status_text, "disabled");
        assert_eq!(rows[3].status_text, "err-disabled");
        assert_eq!(rows[4].vlan, Vlan::Routed);
        assert_eq!(rows[4].port_type, "unknown");
    }

    #[test]
    fn status_table_without_header_finds_status_word() {
        let output = "Gi1/0/7 lab bench two connected 42 a-full a-100 10/100BaseTX\n";
        let rows = parse_interfaces_status(output);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].description, "lab bench two");
        assert_eq!(rows[0].vlan, Vlan::Access(42));
        assert_eq!(rows[0].speed, "a-100");
    }

    #[test]
    fn brief_listing_reads_protocol_column() {
        let output = "\
Interface              IP-Address      OK? Method Status                Protocol
Vlan1                  10.0.0.2        YES NVRAM  up                    up
GigabitEthernet1/0/1   unassigned      YES unset  up                    up
GigabitEthernet1/0/2   unassigned      YES unset  down                  down
GigabitEthernet1/0/3   unassigned      YES unset  administratively down down
";
        let rows = parse_ip_interface_brief(output);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].name, "Vl1");
        assert_eq!(rows[1].name, "Gi1/0/1");
        assert_eq!(rows[1].status, LinkStatus::Up);
        assert_eq!(rows[2].status, LinkStatus::Down);
        assert_eq!(rows[3].status_text, "administratively down");
        assert_eq!(rows[3].vlan, Vlan::Unassigned);
    }

    #[test]
    fn line_protocol_listing() {
        let output = "\
GigabitEthernet1/0/1 is up, line protocol is up (connected)
GigabitEthernet1/0/2 is down, line protocol is down (notconnect)
GigabitEthernet1/0/3 is administratively down, line protocol is down (disabled)
";
        let rows = parse_line_protocol(output);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, LinkStatus::Up);
        assert_eq!(rows[1].status_text, "notconnect");
        assert_eq!(rows[2].status_text, "disabled");
    }

    #[test]
    fn version_identity() {
        let output = "\
Cisco IOS Software, C2960X Software (C2960X-UNIVERSALK9-M), Version 15.2(7)E3, RELEASE SOFTWARE (fc3)
access-sw3 uptime is 3 weeks, 2 days, 4 hours, 12 minutes
cisco WS-C2960X-48TS-L (APM86XXX) processor (revision B0) with 524288K bytes of memory.
Processor board ID FOC1234X5YZ
Model number                    : WS-C2960X-48TS-L
System serial number            : FOC9999ABCD
";
        let identity = parse_version(output).expect("identity");
        assert_eq!(identity.hostname, "access-sw3");
        assert_eq!(identity.version, "15.2(7)E3");
        assert_eq!(identity.model, "WS-C2960X-48TS-L");
        assert_eq!(identity.serial, "FOC9999ABCD");
        assert_eq!(identity.uptime, "3 weeks, 2 days, 4 hours, 12 minutes");

        assert!(matches!(parse_version("garbage"), Err(PollError::Parse(_))));
    }

    #[test]
    fn mac_table_skips_headers_and_totals() {
        let output = "\
          Mac Address Table
-------------------------------------------

Vlan    Mac Address       Type        Ports
----    -----------       --------    -----
 All    0100.0ccc.cccc    STATIC      CPU
  10    0011.2233.4455    DYNAMIC     GigabitEthernet1/0/1
  20    aabb.ccdd.eeff    DYNAMIC     Gi1/0/2
Total Mac Addresses for this criterion: 3
";
        let entries = parse_mac_table(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].ports, "Gi1/0/1");
        assert!(entries[1].is_on_port("Gi1/0/1"));
        assert_eq!(entries[2].vlan, "20");
    }

    #[test]
    fn arp_table_rows() {
        let output = "\
Protocol  Address          Age (min)  Hardware Addr   Type   Interface
Internet  10.0.0.1                -   0011.2233.4455  ARPA   Vlan1
Internet  10.0.0.20              12   AABB.CCDD.EEFF  ARPA   Vlan1
";
        let entries = parse_arp_table(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].age, "-");
        assert_eq!(entries[1].mac, "aabb.ccdd.eeff");
        assert_eq!(entries[1].interface, "Vl1");
    }

    #[test]
    fn interface_names_normalize() {
        assert_eq!(normalize_interface_name("GigabitEthernet1/0/1"), "Gi1/0/1");
        assert_eq!(normalize_interface_name("TenGigabitEthernet1/1/1"), "Te1/1/1");
        assert_eq!(normalize_interface_name("Port-channel12"), "Po12");
        assert_eq!(normalize_interface_name("Gi1/0/1"), "Gi1/0/1");
        assert_eq!(normalize_interface_name("CPU"), "CPU");
    }
}
