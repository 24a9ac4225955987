//! # nmap Report
//!
//! The `nmap -oX -` report parsed into the run/host/port model the result
//! collector consumes. XML attributes and elements map onto snake_case keys;
//! attributes missing from a report fall back to empty values.

use quick_xml::DeError;
use serde::{Deserialize, Serialize};

/// Port state that makes a host worth reporting
pub const OPEN: &str = "open";

/// One complete nmap run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NmapRun {
    #[serde(rename(deserialize = "@args"), default)]
    pub args: String,
    #[serde(rename(deserialize = "@scanner"), default)]
    pub scanner: String,
    #[serde(rename(deserialize = "@start"), default)]
    pub start: u64,
    #[serde(rename(deserialize = "@startstr"), default)]
    pub start_str: String,
    #[serde(rename(deserialize = "@version"), default)]
    pub version: String,
    #[serde(rename(deserialize = "@xmloutputversion"), default)]
    pub xml_output_version: String,
    #[serde(rename(deserialize = "scaninfo"), default)]
    pub scan_info: ScanInfo,
    #[serde(rename(deserialize = "host"), default)]
    pub hosts: Vec<Host>,
    #[serde(rename(deserialize = "runstats"), default)]
    pub run_stats: RunStats,
}

impl NmapRun {
    pub fn from_xml(xml: &str) -> Result<Self, DeError> {
        quick_xml::de::from_str(xml)
    }

    /// Drop hosts without a single open port, returning how many were
    /// dropped. Remaining hosts keep every port they reported.
    pub fn retain_hosts_with_open_ports(&mut self) -> usize {
        let before = self.hosts.len();
        self.hosts.retain(Host::has_open_port);
        before - self.hosts.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanInfo {
    #[serde(rename(serialize = "type", deserialize = "@type"), default)]
    pub scan_type: String,
    #[serde(rename(deserialize = "@protocol"), default)]
    pub protocol: String,
    #[serde(rename(deserialize = "@numservices"), default)]
    pub num_services: u32,
    #[serde(rename(deserialize = "@services"), default)]
    pub services: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawHost")]
pub struct Host {
    pub start_time: u64,
    pub end_time: u64,
    pub status: Status,
    pub addresses: Vec<Address>,
    pub hostnames: Vec<Hostname>,
    pub ports: Vec<Port>,
    pub extra_ports: Vec<ExtraPorts>,
    pub os: Os,
    pub host_scripts: Vec<Script>,
}

impl Host {
    pub fn has_open_port(&self) -> bool {
        self.ports.iter().any(Port::is_open)
    }
}

/// Host as laid out in the XML, with its lists behind wrapper elements
#[derive(Deserialize)]
struct RawHost {
    #[serde(rename = "@starttime", default)]
    start_time: u64,
    #[serde(rename = "@endtime", default)]
    end_time: u64,
    #[serde(default)]
    status: Status,
    #[serde(rename = "address", default)]
    addresses: Vec<Address>,
    #[serde(default)]
    hostnames: HostnameList,
    #[serde(default)]
    ports: PortList,
    #[serde(default)]
    os: Os,
    #[serde(default)]
    hostscript: ScriptList,
}

#[derive(Default, Deserialize)]
struct HostnameList {
    #[serde(rename = "hostname", default)]
    entries: Vec<Hostname>,
}

#[derive(Default, Deserialize)]
struct PortList {
    #[serde(rename = "port", default)]
    ports: Vec<Port>,
    #[serde(rename = "extraports", default)]
    extra: Vec<ExtraPorts>,
}

#[derive(Default, Deserialize)]
struct ScriptList {
    #[serde(rename = "script", default)]
    scripts: Vec<Script>,
}

impl From<RawHost> for Host {
    fn from(raw: RawHost) -> Self {
        Self {
            start_time: raw.start_time,
            end_time: raw.end_time,
            status: raw.status,
            addresses: raw.addresses,
            hostnames: raw.hostnames.entries,
            ports: raw.ports.ports,
            extra_ports: raw.ports.extra,
            os: raw.os,
            host_scripts: raw.hostscript.scripts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(rename(deserialize = "@state"), default)]
    pub state: String,
    #[serde(rename(deserialize = "@reason"), default)]
    pub reason: String,
    #[serde(rename(deserialize = "@reason_ttl"), default)]
    pub reason_ttl: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename(deserialize = "@addr"), default)]
    pub addr: String,
    #[serde(rename(deserialize = "@addrtype"), default)]
    pub addr_type: String,
    #[serde(rename(deserialize = "@vendor"), default)]
    pub vendor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostname {
    #[serde(rename(deserialize = "@name"), default)]
    pub name: String,
    #[serde(rename(serialize = "type", deserialize = "@type"), default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    #[serde(rename(deserialize = "@portid"), default)]
    pub id: u16,
    #[serde(rename(deserialize = "@protocol"), default)]
    pub protocol: String,
    #[serde(default)]
    pub state: PortState,
    #[serde(default)]
    pub service: Service,
    #[serde(rename(deserialize = "script"), default)]
    pub scripts: Vec<Script>,
}

impl Port {
    pub fn is_open(&self) -> bool {
        self.state.state == OPEN
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortState {
    #[serde(rename(deserialize = "@state"), default)]
    pub state: String,
    #[serde(rename(deserialize = "@reason"), default)]
    pub reason: String,
    #[serde(rename(deserialize = "@reason_ttl"), default)]
    pub reason_ttl: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename(deserialize = "@name"), default)]
    pub name: String,
    #[serde(rename(deserialize = "@product"), default)]
    pub product: String,
    #[serde(rename(deserialize = "@version"), default)]
    pub version: String,
    #[serde(rename(deserialize = "@extrainfo"), default)]
    pub extra_info: String,
    #[serde(rename(deserialize = "@ostype"), default)]
    pub os_type: String,
    #[serde(rename(deserialize = "@devicetype"), default)]
    pub device_type: String,
    #[serde(rename(deserialize = "@tunnel"), default)]
    pub tunnel: String,
    #[serde(rename(deserialize = "@method"), default)]
    pub method: String,
    /// Detection confidence, 0 to 10
    #[serde(rename(deserialize = "@conf"), default)]
    pub configuration: u8,
    #[serde(rename(deserialize = "cpe"), default)]
    pub cpes: Vec<String>,
}

/// Ports summarised by state instead of listed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraPorts {
    #[serde(rename(deserialize = "@state"), default)]
    pub state: String,
    #[serde(rename(deserialize = "@count"), default)]
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    #[serde(rename(deserialize = "@id"), default)]
    pub id: String,
    #[serde(rename(deserialize = "@output"), default)]
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Os {
    #[serde(rename(deserialize = "portused"), default)]
    pub ports_used: Vec<PortUsed>,
    #[serde(rename(deserialize = "osmatch"), default)]
    pub os_matches: Vec<OsMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortUsed {
    #[serde(rename(deserialize = "@state"), default)]
    pub state: String,
    #[serde(rename(deserialize = "@proto"), default)]
    pub proto: String,
    #[serde(rename(deserialize = "@portid"), default)]
    pub id: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsMatch {
    #[serde(rename(deserialize = "@name"), default)]
    pub name: String,
    #[serde(rename(deserialize = "@accuracy"), default)]
    pub accuracy: u8,
    #[serde(rename(deserialize = "@line"), default)]
    pub line: u32,
    #[serde(rename(deserialize = "osclass"), default)]
    pub os_classes: Vec<OsClass>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsClass {
    #[serde(rename(deserialize = "@vendor"), default)]
    pub vendor: String,
    #[serde(rename(deserialize = "@osgen"), default)]
    pub os_generation: String,
    #[serde(rename(serialize = "type", deserialize = "@type"), default)]
    pub class_type: String,
    #[serde(rename(deserialize = "@accuracy"), default)]
    pub accuracy: u8,
    #[serde(rename(deserialize = "@osfamily"), default)]
    pub os_family: String,
    #[serde(rename(deserialize = "cpe"), default)]
    pub cpes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    #[serde(default)]
    pub finished: Finished,
    #[serde(default)]
    pub hosts: HostStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Finished {
    #[serde(rename(deserialize = "@time"), default)]
    pub time: u64,
    #[serde(rename(deserialize = "@timestr"), default)]
    pub time_str: String,
    #[serde(rename(deserialize = "@elapsed"), default)]
    pub elapsed: f64,
    #[serde(rename(deserialize = "@summary"), default)]
    pub summary: String,
    #[serde(rename(deserialize = "@exit"), default)]
    pub exit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    #[serde(rename(deserialize = "@up"), default)]
    pub up: u32,
    #[serde(rename(deserialize = "@down"), default)]
    pub down: u32,
    #[serde(rename(deserialize = "@total"), default)]
    pub total: u32,
}
