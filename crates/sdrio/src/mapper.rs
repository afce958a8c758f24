//! Subdevice channel mapper: validates a subdev spec against the board's
//! frontends, programs the I/Q muxes and records which DSP serves which
//! channel.
//!
//! Entries are applied in order with no rollback. If a later entry fails,
//! earlier entries stay configured and no mapping is recorded.

use sdrio_core::{Direction, SubdevSpec};

use crate::error::ConfigurationError;
use crate::peripherals::{is_swapped_connection, RadioPeripherals};
use crate::tree::PropertyTree;

/// Radio slot served by a daughterboard.
pub fn radio_index(db_name: &str) -> Option<usize> {
    match db_name {
        "A" => Some(0),
        "B" => Some(1),
        _ => None,
    }
}

/// How one entry's connection string is applied to the hardware.
enum MuxPlan {
    Tx { conn: String },
    Rx { conn: String, swapped: bool },
}

impl MuxPlan {
    fn new(direction: Direction, conn: String) -> Self {
        match direction {
            Direction::Tx => MuxPlan::Tx { conn },
            Direction::Rx => {
                let swapped = is_swapped_connection(&conn);
                MuxPlan::Rx { conn, swapped }
            }
        }
    }

    fn apply(&self, radio: &mut RadioPeripherals) -> Result<(), ConfigurationError> {
        match self {
            MuxPlan::Tx { conn } => radio.tx_fe.set_mux(conn),
            MuxPlan::Rx { conn, swapped } => {
                radio.ddc.set_mux(conn, *swapped)?;
                radio.rx_fe.set_mux(*swapped)?;
                Ok(())
            }
        }
    }
}

/// Apply `spec` to `board` and return its channel → DSP mapping. The
/// caller must hold the board's configuration lock; `radios` is the
/// board's slot state.
pub fn configure(
    tree: &PropertyTree,
    board: usize,
    direction: Direction,
    spec: &SubdevSpec,
    radios: &mut [RadioPeripherals],
) -> Result<Vec<usize>, ConfigurationError> {
    if spec.is_empty() {
        return Err(ConfigurationError::EmptySpec);
    }
    for pair in spec {
        if !tree.has_frontend(board, direction, &pair.db_name, &pair.sd_name) {
            return Err(ConfigurationError::UnknownFrontend {
                board,
                direction,
                db: pair.db_name.clone(),
                sd: pair.sd_name.clone(),
            });
        }
    }

    match spec.pairs() {
        [only] => {
            if radio_index(&only.db_name).is_none() {
                return Err(ConfigurationError::InvalidDaughterboard(only.db_name.clone()));
            }
        }
        [first, second] => {
            let pair = (first.db_name.as_str(), second.db_name.as_str());
            if !matches!(pair, ("A", "B") | ("B", "A")) {
                return Err(ConfigurationError::NotComplementaryPair(
                    first.db_name.clone(),
                    second.db_name.clone(),
                ));
            }
        }
        _ => return Err(ConfigurationError::TooManyEntries(spec.len())),
    }

    let mut mapping = Vec::with_capacity(spec.len());
    for pair in spec {
        let radio = radio_index(&pair.db_name)
            .ok_or_else(|| ConfigurationError::InvalidDaughterboard(pair.db_name.clone()))?;
        let conn = tree
            .connection(board, direction, &pair.db_name, &pair.sd_name)
            .ok_or_else(|| ConfigurationError::UnknownFrontend {
                board,
                direction,
                db: pair.db_name.clone(),
                sd: pair.sd_name.clone(),
            })?;
        let slot = radios
            .get_mut(radio)
            .ok_or_else(|| ConfigurationError::InvalidDaughterboard(pair.db_name.clone()))?;
        MuxPlan::new(direction, conn).apply(slot)?;
        mapping.push(radio);
    }

    tree.set_mapping(board, direction, mapping.clone());
    tracing::info!(board, %direction, %spec, mapping = ?mapping, "subdev spec configured");
    Ok(mapping)
}
