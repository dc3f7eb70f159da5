//! In-memory Cisco-style switch for offline tests and demos.
//!
//! The scripted device keeps a small port table and renders the `show`
//! commands the poller uses from it, applies interface configuration, answers
//! `enable`, and records everything written to it. Faults (refused connects,
//! rejected commands, withheld prompts, slow replies) can be injected at any
//! time through a cloned handle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::Transport;
use crate::error::PollError;
use crate::model::{ConnectionConfig, Vlan};
use crate::parser::normalize_interface_name;

/// One line sent to, or one chunk received from, the scripted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    Connected,
    Sent(String),
    Received(String),
    Disconnected,
}

/// A port on the scripted switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedPort {
    pub name: String,
    pub description: String,
    pub vlan: Vlan,
    pub link_up: bool,
    pub shutdown: bool,
    pub duplex: String,
    pub speed: String,
    pub port_type: String,
}

impl ScriptedPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            vlan: Vlan::Access(1),
            link_up: false,
            shutdown: false,
            duplex: "auto".to_string(),
            speed: "auto".to_string(),
            port_type: "10/100/1000BaseTX".to_string(),
        }
    }

    pub fn up(mut self) -> Self {
        self.link_up = true;
        self.duplex = "a-full".to_string();
        self.speed = "a-1000".to_string();
        self
    }

    pub fn vlan(mut self, vlan: Vlan) -> Self {
        self.vlan = vlan;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn status_word(&self) -> &'static str {
        if self.shutdown {
            "disabled"
        } else if self.link_up {
            "connected"
        } else {
            "notconnect"
        }
    }

    fn long_name(&self) -> String {
        const EXPANSIONS: &[(&str, &str)] = &[
            ("Gi", "GigabitEthernet"),
            ("Fa", "FastEthernet"),
            ("Te", "TenGigabitEthernet"),
            ("Po", "Port-channel"),
        ];
        for (short, long) in EXPANSIONS {
            if let Some(rest) = self.name.strip_prefix(short)
                && rest.starts_with(|c: char| c.is_ascii_digit())
            {
                return format!("{long}{rest}");
            }
        }
        self.name.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Exec,
    EnablePassword,
    Config,
    ConfigIf(String),
}

enum Reply {
    Text(String),
    AwaitInput(String),
    Invalid,
}

#[derive(Debug)]
struct ScriptState {
    hostname: String,
    secret: Option<String>,
    start_privileged: bool,
    privileged: bool,
    mode: CliMode,
    connected: bool,
    fail_connects: u32,
    connect_calls: u32,
    save_count: u32,
    ports: Vec<ScriptedPort>,
    macs: Vec<(u16, String, String)>,
    responses: HashMap<String, String>,
    rejected: HashSet<String>,
    withheld: HashSet<String>,
    delays: HashMap<String, Duration>,
    latency: Duration,
    awaiting_nudge: bool,
    partial_line: String,
    pending: VecDeque<(Instant, String)>,
    transcript: Vec<TranscriptEntry>,
}

impl ScriptState {
    fn prompt(&self) -> String {
        let suffix = match self.mode {
            CliMode::Exec | CliMode::EnablePassword => "",
            CliMode::Config => "(config)",
            CliMode::ConfigIf(_) => "(config-if)",
        };
        let marker = if self.privileged { '#' } else { '>' };
        format!("{}{suffix}{marker}", self.hostname)
    }

    fn emit(&mut self, text: String, delay: Duration) {
        if text.is_empty() {
            return;
        }
        let ready_at = Instant::now() + self.latency + delay;
        self.pending.push_back((ready_at, text));
    }

    fn emit_prompt(&mut self, delay: Duration) {
        let prompt = self.prompt();
        self.emit(prompt, delay);
    }

    fn handle_line(&mut self, line: &str) {
        self.transcript.push(TranscriptEntry::Sent(line.to_string()));

        if self.mode == CliMode::EnablePassword {
            self.mode = CliMode::Exec;
            if self.secret.as_deref() == Some(line) {
                self.privileged = true;
                self.emit("\r\n".to_string(), Duration::ZERO);
            } else {
                self.emit("\r\n% Access denied\r\n\r\n".to_string(), Duration::ZERO);
            }
            self.emit_prompt(Duration::ZERO);
            return;
        }

        self.emit(format!("{line}\r\n"), Duration::ZERO);
        let command = line.trim();

        if command.is_empty() {
            self.awaiting_nudge = false;
            self.emit_prompt(Duration::ZERO);
            return;
        }

        let delay = self.delays.get(command).copied().unwrap_or_default();
        let reply = if self.rejected.contains(command) {
            Reply::Invalid
        } else if let Some(text) = self.responses.get(command) {
            Reply::Text(text.clone())
        } else {
            match self.mode.clone() {
                CliMode::Exec | CliMode::EnablePassword => self.exec_command(command),
                CliMode::Config => self.config_command(command, None),
                CliMode::ConfigIf(port) => self.config_command(command, Some(port)),
            }
        };

        match reply {
            Reply::Text(text) => {
                if !text.is_empty() {
                    self.emit(format!("{}\r\n", text.replace('\n', "\r\n")), delay);
                }
                if self.withheld.contains(command) {
                    self.awaiting_nudge = true;
                } else {
                    self.emit_prompt(delay);
                }
            }
            Reply::AwaitInput(text) => self.emit(text, delay),
            Reply::Invalid => {
                self.emit(
                    "                   ^\r\n% Invalid input detected at '^' marker.\r\n\r\n"
                        .to_string(),
                    delay,
                );
                self.emit_prompt(delay);
            }
        }
    }

    fn exec_command(&mut self, command: &str) -> Reply {
        match command {
            "enable" => {
                if self.privileged {
                    Reply::Text(String::new())
                } else if self.secret.is_none() {
                    Reply::Text("% No password set".to_string())
                } else {
                    self.mode = CliMode::EnablePassword;
                    Reply::AwaitInput("Password: ".to_string())
                }
            }
            "disable" => {
                self.privileged = false;
                Reply::Text(String::new())
            }
            "terminal length 0" | "terminal width 0" => Reply::Text(String::new()),
            "configure terminal" if self.privileged => {
                self.mode = CliMode::Config;
                Reply::Text(
                    "Enter configuration commands, one per line.  End with CNTL/Z.".to_string(),
                )
            }
            "show interfaces status" => Reply::Text(self.render_status()),
            "show ip interface brief" => Reply::Text(self.render_brief()),
            "show interfaces | include line protocol" => Reply::Text(self.render_line_protocol()),
            "show version" => Reply::Text(self.render_version()),
            "show mac address-table" => Reply::Text(self.render_mac_table()),
            "show arp" => Reply::Text(self.render_arp()),
            "show clock" => Reply::Text("*12:00:00.000 UTC Sat Oct 17 2026".to_string()),
            "write memory" if self.privileged => {
                self.save_count += 1;
                Reply::Text("Building configuration...\n[OK]".to_string())
            }
            _ => Reply::Invalid,
        }
    }

    fn config_command(&mut self, command: &str, port: Option<String>) -> Reply {
        if command == "end" {
            self.mode = CliMode::Exec;
            return Reply::Text(String::new());
        }
        if command == "exit" {
            self.mode = match self.mode {
                CliMode::ConfigIf(_) => CliMode::Config,
                _ => CliMode::Exec,
            };
            return Reply::Text(String::new());
        }
        if let Some(name) = command.strip_prefix("interface ") {
            let wanted = normalize_interface_name(name.trim());
            if let Some(found) = self.ports.iter().find(|p| p.name == wanted) {
                self.mode = CliMode::ConfigIf(found.name.clone());
                return Reply::Text(String::new());
            }
            return Reply::Invalid;
        }

        let Some(port_name) = port else {
            return Reply::Invalid;
        };
        let Some(target) = self.ports.iter_mut().find(|p| p.name == port_name) else {
            return Reply::Invalid;
        };

        if command == "shutdown" {
            target.shutdown = true;
        } else if command == "no shutdown" {
            target.shutdown = false;
        } else if command == "switchport mode access" {
            if matches!(target.vlan, Vlan::Trunk | Vlan::Routed) {
                target.vlan = Vlan::Access(1);
            }
        } else if let Some(id) = command.strip_prefix("switchport access vlan ") {
            match id.trim().parse::<u16>() {
                Ok(id) if (1..=4094).contains(&id) => target.vlan = Vlan::Access(id),
                _ => return Reply::Invalid,
            }
        } else if let Some(text) = command.strip_prefix("description ") {
            target.description = text.to_string();
        } else if command == "no description" {
            target.description.clear();
        } else {
            return Reply::Invalid;
        }
        Reply::Text(String::new())
    }

    fn render_status(&self) -> String {
        let mut out = format!(
            "\n{:<10}{:<19}{:<13}{:<11}{:<8}{:<7}{}\n",
            "Port", "Name", "Status", "Vlan", "Duplex", "Speed", "Type"
        );
        for port in &self.ports {
            let name: String = port.description.chars().take(18).collect();
            out.push_str(&format!(
                "{:<10}{:<19}{:<13}{:<11}{:<8}{:<7}{}\n",
                port.name,
                name,
                port.status_word(),
                port.vlan.to_string(),
                port.duplex,
                port.speed,
                port.port_type
            ));
        }
        out
    }

    fn render_brief(&self) -> String {
        let mut out = format!(
            "{:<23}{:<16}{:<4}{:<7}{:<22}{}\n",
            "Interface", "IP-Address", "OK?", "Method", "Status", "Protocol"
        );
        for port in &self.ports {
            let (status, protocol) = if port.shutdown {
                ("administratively down", "down")
            } else if port.link_up {
                ("up", "up")
            } else {
                ("down", "down")
            };
            out.push_str(&format!(
                "{:<23}{:<16}{:<4}{:<7}{:<22}{}\n",
                port.long_name(),
                "unassigned",
                "YES",
                "unset",
                status,
                protocol
            ));
        }
        out
    }

    fn render_line_protocol(&self) -> String {
        let mut out = String::new();
        for port in &self.ports {
            let line = if port.shutdown {
                "is administratively down, line protocol is down (disabled)"
            } else if port.link_up {
                "is up, line protocol is up (connected)"
            } else {
                "is down, line protocol is down (notconnect)"
            };
            out.push_str(&format!("{} {line}\n", port.long_name()));
        }
        out
    }

    fn render_version(&self) -> String {
        format!(
            "Cisco IOS Software, C2960X Software (C2960X-UNIVERSALK9-M), Version 15.2(7)E3, RELEASE SOFTWARE (fc3)\n\
             Technical Support: http://www.cisco.com/techsupport\n\
             \n\
             ROM: Bootstrap program is C2960X boot loader\n\
             {} uptime is 3 weeks, 2 days, 4 hours, 12 minutes\n\
             System image file is \"flash:/c2960x-universalk9-mz.152-7.E3.bin\"\n\
             \n\
             cisco WS-C2960X-48TS-L (APM86XXX) processor (revision B0) with 524288K bytes of memory.\n\
             Processor board ID FOC1234X5YZ\n\
             \n\
             Model number                    : WS-C2960X-48TS-L\n\
             System serial number            : FOC1234X5YZ",
            self.hostname
        )
    }

    fn render_mac_table(&self) -> String {
        let mut out = String::from(
            "          Mac Address Table\n\
             -------------------------------------------\n\
             \n\
             Vlan    Mac Address       Type        Ports\n\
             ----    -----------       --------    -----\n",
        );
        for (vlan, mac, port) in &self.macs {
            out.push_str(&format!("{vlan:>4}    {mac:<18}DYNAMIC     {port}\n"));
        }
        out.push_str(&format!(
            "Total Mac Addresses for this criterion: {}",
            self.macs.len()
        ));
        out
    }

    fn render_arp(&self) -> String {
        let mut out = String::from(
            "Protocol  Address          Age (min)  Hardware Addr   Type   Interface\n",
        );
        for (idx, (vlan, mac, _)) in self.macs.iter().enumerate() {
            out.push_str(&format!(
                "Internet  10.0.{vlan}.{:<10}{:>4}   {mac:<16}ARPA   Vlan{vlan}\n",
                idx + 10,
                idx
            ));
        }
        out
    }
}

enum ReadStep {
    Ready(String),
    WaitUntil(Instant),
    Idle,
    Closed,
}

/// Scripted transport handle.
///
/// Clones share the same device, so a test can keep one clone to inject
/// changes while the session owns another.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// A switch with the given hostname, no ports and no enable secret.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                hostname: hostname.into(),
                secret: None,
                start_privileged: false,
                privileged: false,
                mode: CliMode::Exec,
                connected: false,
                fail_connects: 0,
                connect_calls: 0,
                save_count: 0,
                ports: Vec::new(),
                macs: Vec::new(),
                responses: HashMap::new(),
                rejected: HashSet::new(),
                withheld: HashSet::new(),
                delays: HashMap::new(),
                latency: Duration::ZERO,
                awaiting_nudge: false,
                partial_line: String::new(),
                pending: VecDeque::new(),
                transcript: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Requires `enable` with this secret before privileged commands work.
    pub fn with_secret(self, secret: impl Into<String>) -> Self {
        self.lock().secret = Some(secret.into());
        self
    }

    /// Log in directly at the privileged prompt.
    pub fn privileged(self) -> Self {
        self.lock().start_privileged = true;
        self
    }

    pub fn with_port(self, port: ScriptedPort) -> Self {
        self.add_port(port);
        self
    }

    pub fn add_port(&self, port: ScriptedPort) {
        self.lock().ports.push(port);
    }

    pub fn remove_port(&self, name: &str) {
        self.lock().ports.retain(|p| p.name != name);
    }

    pub fn set_link(&self, name: &str, up: bool) {
        let mut state = self.lock();
        if let Some(port) = state.ports.iter_mut().find(|p| p.name == name) {
            port.link_up = up;
        }
    }

    pub fn set_vlan(&self, name: &str, vlan: Vlan) {
        let mut state = self.lock();
        if let Some(port) = state.ports.iter_mut().find(|p| p.name == name) {
            port.vlan = vlan;
        }
    }

    pub fn port(&self, name: &str) -> Option<ScriptedPort> {
        self.lock().ports.iter().find(|p| p.name == name).cloned()
    }

    /// Adds a learned MAC address on `port`.
    pub fn learn_mac(&self, vlan: u16, mac: impl Into<String>, port: impl Into<String>) {
        self.lock().macs.push((vlan, mac.into(), port.into()));
    }

    /// Replaces the built-in reply for `command`.
    pub fn set_response(&self, command: impl Into<String>, output: impl Into<String>) {
        self.lock().responses.insert(command.into(), output.into());
    }

    /// Answers `command` with `% Invalid input`.
    pub fn reject_command(&self, command: impl Into<String>) {
        self.lock().rejected.insert(command.into());
    }

    /// Sends the output of `command` but no prompt until a bare newline arrives.
    pub fn withhold_prompt(&self, command: impl Into<String>) {
        self.lock().withheld.insert(command.into());
    }

    /// Delays the output of `command`.
    pub fn delay_command(&self, command: impl Into<String>, delay: Duration) {
        self.lock().delays.insert(command.into(), delay);
    }

    /// Delay applied to every chunk.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Refuses the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    /// Simulates the peer closing the session.
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.connected = false;
        state.pending.clear();
    }

    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    pub fn save_count(&self) -> u32 {
        self.lock().save_count
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.lock().transcript.clone()
    }

    /// Lines written to the device, in order.
    pub fn sent_lines(&self) -> Vec<String> {
        self.lock()
            .transcript
            .iter()
            .filter_map(|entry| match entry {
                TranscriptEntry::Sent(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    fn next_read_step(&self) -> ReadStep {
        let mut state = self.lock();
        let now = Instant::now();
        match state.pending.front() {
            Some((ready_at, _)) if *ready_at <= now => match state.pending.pop_front() {
                Some((_, chunk)) => {
                    state.transcript.push(TranscriptEntry::Received(chunk.clone()));
                    ReadStep::Ready(chunk)
                }
                None => ReadStep::Idle,
            },
            Some((ready_at, _)) => ReadStep::WaitUntil(*ready_at),
            None if !state.connected => ReadStep::Closed,
            None => ReadStep::Idle,
        }
    }
}

impl Transport for ScriptedTransport {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), PollError> {
        let mut state = self.lock();
        state.connect_calls += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(PollError::Connection {
                host: config.host.clone(),
                port: config.port,
                reason: "connection refused".to_string(),
            });
        }
        state.connected = true;
        state.mode = CliMode::Exec;
        state.privileged = state.start_privileged;
        state.awaiting_nudge = false;
        state.partial_line.clear();
        state.pending.clear();
        state.transcript.push(TranscriptEntry::Connected);
        state.emit("\r\n\r\n".to_string(), Duration::ZERO);
        state.emit_prompt(Duration::ZERO);
        Ok(())
    }

    async fn write(&mut self, text: &str) -> Result<(), PollError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(PollError::SessionClosed);
        }
        state.partial_line.push_str(text);
        while let Some(pos) = state.partial_line.find('\n') {
            let line: String = state.partial_line.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            state.handle_line(&line);
        }
        Ok(())
    }

    async fn read(&mut self, timeout: Duration) -> Result<Option<String>, PollError> {
        let deadline = Instant::now() + timeout;
        match self.next_read_step() {
            ReadStep::Ready(chunk) => Ok(Some(chunk)),
            ReadStep::Closed => Err(PollError::SessionClosed),
            ReadStep::WaitUntil(ready_at) if ready_at <= deadline => {
                tokio::time::sleep_until(ready_at).await;
                match self.next_read_step() {
                    ReadStep::Ready(chunk) => Ok(Some(chunk)),
                    ReadStep::Closed => Err(PollError::SessionClosed),
                    _ => Ok(None),
                }
            }
            ReadStep::WaitUntil(_) | ReadStep::Idle => {
                tokio::time::sleep_until(deadline).await;
                if !self.lock().connected {
                    return Err(PollError::SessionClosed);
                }
                Ok(None)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), PollError> {
        let mut state = self.lock();
        if state.connected {
            state.transcript.push(TranscriptEntry::Disconnected);
        }
        state.connected = false;
        state.pending.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
