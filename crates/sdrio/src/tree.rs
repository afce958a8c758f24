//! Path-keyed device properties: frontend connection strings and the
//! channel → DSP mappings produced by the subdev mapper.

use dashmap::DashMap;
use sdrio_core::Direction;

pub fn connection_path(board: usize, direction: Direction, db: &str, sd: &str) -> String {
    format!("/mboards/{board}/dboards/{db}/{direction}_frontends/{sd}/connection")
}

pub fn mapping_path(board: usize, direction: Direction) -> String {
    format!("/mboards/{board}/{direction}_chan_dsp_mapping")
}

#[derive(Debug, Default)]
pub struct PropertyTree {
    connections: DashMap<String, String>,
    mappings: DashMap<String, Vec<usize>>,
}

impl PropertyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a frontend, or change its connection string.
    pub fn set_connection(
        &self,
        board: usize,
        direction: Direction,
        db: &str,
        sd: &str,
        conn: impl Into<String>,
    ) {
        self.connections
            .insert(connection_path(board, direction, db, sd), conn.into());
    }

    pub fn connection(&self, board: usize, direction: Direction, db: &str, sd: &str) -> Option<String> {
        self.connections
            .get(&connection_path(board, direction, db, sd))
            .map(|c| c.clone())
    }

    pub fn has_frontend(&self, board: usize, direction: Direction, db: &str, sd: &str) -> bool {
        self.connections
            .contains_key(&connection_path(board, direction, db, sd))
    }

    pub fn set_mapping(&self, board: usize, direction: Direction, mapping: Vec<usize>) {
        self.mappings.insert(mapping_path(board, direction), mapping);
    }

    pub fn mapping(&self, board: usize, direction: Direction) -> Option<Vec<usize>> {
        self.mappings
            .get(&mapping_path(board, direction))
            .map(|m| m.clone())
    }
}
