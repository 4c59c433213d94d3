/// Replica set discovery and primary failover
///
/// Discovery is driven only by `connect_replica_set()` and `reconnect()`;
/// there is no background monitoring. Each successful seed discovery
/// replaces the known host list with the one the seed reports.
use super::connection::{Connection, ConnectionOptions};
use super::HostAddress;
use crate::commands::is_truthy;
use crate::error::{ConnectError, WireResult};
use bson::{rawdoc, Bson, Document};
use tracing::{debug, info, warn};

/// Seed list, discovered hosts and set name of a replica set connection
#[derive(Debug, Clone, Default)]
pub struct ReplicaSet {
    seeds: Vec<HostAddress>,
    hosts: Vec<HostAddress>,
    name: Option<String>,
    primary_connected: bool,
    connect_attempted: bool,
}

impl ReplicaSet {
    fn new(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn seeds(&self) -> &[HostAddress] {
        &self.seeds
    }

    /// Hosts reported by the most recent seed discovery
    pub fn hosts(&self) -> &[HostAddress] {
        &self.hosts
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether a primary has ever been reached
    pub fn primary_connected(&self) -> bool {
        self.primary_connected
    }

    /// A reported set name satisfies the constraint when none is configured
    /// or when it matches exactly. An absent name never satisfies one.
    fn accepts(&self, reported: Option<&str>) -> bool {
        match &self.name {
            None => true,
            Some(expected) => reported == Some(expected.as_str()),
        }
    }
}

/// Parsed answer to the `ismaster` discovery command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsMaster {
    pub is_master: bool,
    pub set_name: Option<String>,
    pub hosts: Vec<HostAddress>,
}

impl IsMaster {
    /// Host strings that do not parse are skipped
    pub fn from_document(doc: &Document) -> Self {
        let is_master = doc
            .get("ismaster")
            .or_else(|| doc.get("isWritablePrimary"))
            .map(is_truthy)
            .unwrap_or(false);

        let set_name = doc.get_str("setName").ok().map(str::to_string);

        let hosts = match doc.get_array("hosts") {
            Ok(list) => list
                .iter()
                .filter_map(|entry| match entry {
                    Bson::String(host) => match host.parse::<HostAddress>() {
                        Ok(addr) => Some(addr),
                        Err(e) => {
                            warn!("Ignoring reported host '{}': {}", host, e);
                            None
                        }
                    },
                    other => {
                        warn!("Ignoring non-string host entry {:?}", other);
                        None
                    }
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        Self {
            is_master,
            set_name,
            hosts,
        }
    }
}

impl Connection {
    /// Create a disconnected replica set connection. When `name` is given
    /// every member must report exactly that set name.
    pub fn replica_set(name: Option<&str>) -> Self {
        Self::replica_set_with_options(name, ConnectionOptions::default())
    }

    pub fn replica_set_with_options(name: Option<&str>, options: ConnectionOptions) -> Self {
        let mut conn = Self::with_options(options);
        conn.replset = Some(ReplicaSet::new(name));
        conn
    }

    /// Append a seed. Seeds are fixed once the first connect attempt begins.
    pub fn add_seed(&mut self, host: &str, port: u16) -> Result<(), ConnectError> {
        let result = match self.replset.as_mut() {
            None => Err(ConnectError::bad_argument(
                "seeds can only be added to a replica set connection",
            )),
            Some(rs) if rs.connect_attempted => Err(ConnectError::bad_argument(
                "seeds cannot be added after connecting",
            )),
            Some(rs) => HostAddress::new(host, port).map(|addr| rs.seeds.push(addr)),
        };
        result.map_err(|e| self.connect_failed(e))
    }

    /// Find the primary and attach to it.
    ///
    /// Seeds are tried in order; the first one that connects and answers
    /// discovery supplies the host list. If that seed is not primary, the
    /// reported hosts are probed in order and the first primary's socket is
    /// adopted.
    pub fn connect_replica_set(&mut self) -> Result<(), ConnectError> {
        let seeds = match self.replset.as_ref() {
            Some(rs) => rs.seeds.clone(),
            None => {
                return Err(self.connect_failed(ConnectError::bad_argument(
                    "not a replica set connection",
                )))
            }
        };
        if seeds.is_empty() {
            return Err(self.connect_failed(ConnectError::bad_argument(
                "replica set has no seeds",
            )));
        }
        if let Some(rs) = self.replset.as_mut() {
            rs.connect_attempted = true;
        }

        self.disconnect();
        self.primary = None;

        for seed in &seeds {
            let (probe, status) = match self.probe(seed) {
                Some(found) => found,
                None => continue,
            };

            if let Some(rs) = self.replset.as_ref() {
                if !rs.accepts(status.set_name.as_deref()) {
                    let err = ConnectError::BadSetName {
                        expected: rs.name.clone().unwrap_or_default(),
                        found: status.set_name.clone(),
                    };
                    warn!("Seed {} belongs to the wrong set: {}", seed, err);
                    return Err(self.connect_failed(err));
                }
            }

            if let Some(rs) = self.replset.as_mut() {
                rs.hosts = status.hosts.clone();
            }

            if status.is_master {
                self.adopt(probe);
                return Ok(());
            }
            drop(probe);

            for candidate in &status.hosts {
                let Some((probe, member)) = self.probe(candidate) else {
                    continue;
                };
                let accepted = self
                    .replset
                    .as_ref()
                    .map(|rs| rs.accepts(member.set_name.as_deref()))
                    .unwrap_or(false);
                if !accepted {
                    warn!("Skipping {}: reports set {:?}", candidate, member.set_name);
                    continue;
                }
                if member.is_master {
                    self.adopt(probe);
                    return Ok(());
                }
                debug!("{} is not primary", candidate);
            }

            warn!("No primary among {} reported hosts", status.hosts.len());
            return Err(self.connect_failed(ConnectError::CannotFindPrimary));
        }

        warn!("No seed answered discovery");
        Err(self.connect_failed(ConnectError::CannotFindPrimary))
    }

    /// Run `ismaster` against the admin database
    pub fn discover(&mut self) -> WireResult<IsMaster> {
        let reply = self.run_command("admin", &rawdoc! { "ismaster": 1 })?;
        Ok(IsMaster::from_document(&reply))
    }

    /// Connect a throwaway single-host connection to `addr` and run
    /// discovery on it
    fn probe(&self, addr: &HostAddress) -> Option<(Connection, IsMaster)> {
        let mut probe = Connection::with_options(self.options.clone());
        if let Err(e) = probe.connect(addr.host(), addr.port()) {
            warn!("Replica set member {} unreachable: {}", addr, e);
            return None;
        }
        match probe.discover() {
            Ok(status) => Some((probe, status)),
            Err(e) => {
                warn!("Discovery against {} failed: {}", addr, e);
                None
            }
        }
    }

    /// Take over the socket of a probe connected to the primary
    fn adopt(&mut self, mut probe: Connection) {
        self.disconnect();
        self.stream = probe.stream.take();
        self.primary = probe.primary.take();
        self.clear_error();
        if let Some(rs) = self.replset.as_mut() {
            rs.primary_connected = true;
        }
        if let Some(primary) = &self.primary {
            info!("Connected to replica set primary {}", primary);
        }
    }
}
