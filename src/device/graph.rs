//! The static routing topology between device ports.
//!
//! [`Connections`] is pure topology: a validated edge set plus the distinguished master node.
//! Execution order is derived from it by the signal plan, never decided here.

use crate::{
    device::{DeviceId, DeviceTable},
    error::Error,
};

// -------------------------------------------------------------------------------------------------

/// One directed edge from a device send port to a device receive port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    /// Source device id and send port index.
    pub from: (DeviceId, usize),
    /// Target device id and receive port index.
    pub to: (DeviceId, usize),
}

// -------------------------------------------------------------------------------------------------

/// A single invalid edge, as reported by [`Connections::check`].
#[derive(Debug)]
pub struct ConnectionError {
    pub connection: Connection,
    pub error: Error,
}

// -------------------------------------------------------------------------------------------------

/// A validated set of connections between the devices of one table.
///
/// Built once per composition graph from pre validated configuration. Receive ports accumulate
/// the signals of all their incoming edges by summation; edge declaration order never affects
/// the result. The set is never mutated concurrently with execution: graph edits happen
/// between playback sessions only.
pub struct Connections {
    edges: Vec<Connection>,
    master: DeviceId,
}

impl Connections {
    /// Validate the given edge list against a device table and build the connection set.
    ///
    /// Fails fast on the first structural error: a missing device id or an out of range port
    /// index would otherwise corrupt audio silently. Soft deleted (non existent) devices are
    /// legal references; the signal plan skips them as zero contributors.
    pub fn build(
        edges: &[Connection],
        table: &DeviceTable,
        master: DeviceId,
    ) -> Result<Self, Error> {
        if table.get(master).is_none() {
            return Err(Error::DeviceNotFound(master));
        }
        for edge in edges {
            Self::validate_edge(edge, table)?;
        }
        Ok(Self {
            edges: edges.to_vec(),
            master,
        })
    }

    /// Re-validate every edge after a hot edit, reporting all invalid edges instead of
    /// stopping at the first one. Editor tooling consumes the full list.
    pub fn check(&self, table: &DeviceTable) -> Result<(), Vec<ConnectionError>> {
        let errors: Vec<ConnectionError> = self
            .edges
            .iter()
            .filter_map(|edge| {
                Self::validate_edge(edge, table)
                    .err()
                    .map(|error| ConnectionError {
                        connection: *edge,
                        error,
                    })
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_edge(edge: &Connection, table: &DeviceTable) -> Result<(), Error> {
        let (from_id, from_port) = edge.from;
        let (to_id, to_port) = edge.to;

        let from = table.get(from_id).ok_or(Error::DeviceNotFound(from_id))?;
        if from_port >= from.audio_out_count() {
            return Err(Error::PortOutOfRange {
                device: from_id,
                port: from_port,
                port_count: from.audio_out_count(),
            });
        }

        let to = table.get(to_id).ok_or(Error::DeviceNotFound(to_id))?;
        if to_port >= to.audio_in_count() {
            return Err(Error::PortOutOfRange {
                device: to_id,
                port: to_port,
                port_count: to.audio_in_count(),
            });
        }
        Ok(())
    }

    /// All edges in declaration order.
    pub fn edges(&self) -> &[Connection] {
        &self.edges
    }

    /// The distinguished master node: the global output, or the unit output within an
    /// audio unit.
    pub fn master(&self) -> DeviceId {
        self.master
    }

    /// Iterate over all edges ending at the given device.
    pub fn incoming(&self, device: DeviceId) -> impl Iterator<Item = &Connection> {
        self.edges.iter().filter(move |edge| edge.to.0 == device)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceKind, Processor, MASTER_DEVICE_ID};

    struct StubProc {
        ins: usize,
        outs: usize,
    }

    impl Processor for StubProc {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn audio_in_count(&self) -> usize {
            self.ins
        }
        fn audio_out_count(&self) -> usize {
            self.outs
        }
    }

    fn table_with_procs(count: usize) -> DeviceTable {
        let mut table = DeviceTable::new(16);
        for _ in 0..count {
            table
                .add(Device::new(DeviceKind::Processor(Box::new(StubProc {
                    ins: 1,
                    outs: 1,
                }))))
                .unwrap();
        }
        table
    }

    #[test]
    fn build_accepts_valid_edges() {
        let table = table_with_procs(2);
        let edges = [
            Connection {
                from: (1, 0),
                to: (2, 0),
            },
            Connection {
                from: (2, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
        ];
        let connections = Connections::build(&edges, &table, MASTER_DEVICE_ID).unwrap();
        assert_eq!(connections.edges().len(), 2);
        assert_eq!(connections.incoming(MASTER_DEVICE_ID).count(), 1);
    }

    #[test]
    fn build_rejects_unknown_device() {
        let table = table_with_procs(1);
        let edges = [Connection {
            from: (7, 0),
            to: (MASTER_DEVICE_ID, 0),
        }];
        assert!(matches!(
            Connections::build(&edges, &table, MASTER_DEVICE_ID),
            Err(Error::DeviceNotFound(7))
        ));
    }

    #[test]
    fn build_rejects_port_out_of_range() {
        let table = table_with_procs(1);
        let edges = [Connection {
            from: (1, 3),
            to: (MASTER_DEVICE_ID, 0),
        }];
        assert!(matches!(
            Connections::build(&edges, &table, MASTER_DEVICE_ID),
            Err(Error::PortOutOfRange { device: 1, .. })
        ));
        // master has no send ports
        let edges = [Connection {
            from: (MASTER_DEVICE_ID, 0),
            to: (1, 0),
        }];
        assert!(matches!(
            Connections::build(&edges, &table, MASTER_DEVICE_ID),
            Err(Error::PortOutOfRange {
                device: MASTER_DEVICE_ID,
                ..
            })
        ));
    }

    #[test]
    fn check_reports_all_dangling_edges() {
        let table = table_with_procs(2);
        let edges = [
            Connection {
                from: (1, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
            Connection {
                from: (2, 0),
                to: (MASTER_DEVICE_ID, 0),
            },
        ];
        let connections = Connections::build(&edges, &table, MASTER_DEVICE_ID).unwrap();
        assert!(connections.check(&table).is_ok());

        // validate against a table where both source devices are gone
        let smaller_table = table_with_procs(0);
        let errors = connections.check(&smaller_table).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
