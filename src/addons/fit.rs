//! Auto-fit behavior
//!
//! Proposes the largest grid that fits inside the mount node and resizes the
//! emulator to it. The node is never observed: the session calls
//! [`FitBehavior::fit`] when it opens and whenever its caller asks.

use tracing::debug;

use super::Addon;
use crate::config::FitConfig;
use crate::core::emulator::Emulator;
use crate::error::EmulatorError;
use crate::surface::{CellMetrics, Dimensions, MountTarget};

pub trait FitBehavior: Addon {
    /// Grid that fits `node`, or `None` when the node cannot be measured
    fn propose_dimensions(&self, node: &dyn MountTarget) -> Option<Dimensions>;

    /// Resize `emulator` to the proposal, returning the new geometry if it
    /// changed
    fn fit(
        &mut self,
        emulator: &mut dyn Emulator,
        node: &dyn MountTarget,
    ) -> Result<Option<Dimensions>, EmulatorError>;
}

pub struct AutoFit {
    config: FitConfig,
    active: bool,
}

impl AutoFit {
    pub fn new(config: FitConfig) -> Self {
        Self {
            config,
            active: false,
        }
    }

    fn cell_metrics(&self, node: &dyn MountTarget) -> CellMetrics {
        node.cell_size().unwrap_or(CellMetrics {
            width: self.config.cell_width,
            height: self.config.cell_height,
        })
    }
}

impl Addon for AutoFit {
    fn name(&self) -> &'static str {
        "fit"
    }

    fn activate(&mut self, _emulator: &dyn Emulator) {
        self.active = true;
    }

    fn dispose(&mut self) {
        self.active = false;
    }
}

impl FitBehavior for AutoFit {
    fn propose_dimensions(&self, node: &dyn MountTarget) -> Option<Dimensions> {
        let size = node.pixel_size()?;
        let cell = self.cell_metrics(node);
        if !(cell.width > 0.0 && cell.height > 0.0) {
            return None;
        }
        // A node with no area is hidden, not tiny
        if !(size.width > 0.0 && size.height > 0.0) {
            return None;
        }

        let config = &self.config;
        let width = size.width - 2.0 * config.padding_x - config.scrollbar_width;
        let height = size.height - 2.0 * config.padding_y;
        // A grid always keeps at least one cell
        let cols = cells_in(width, cell.width).max(config.min_cols.max(1));
        let rows = cells_in(height, cell.height).max(config.min_rows.max(1));
        Some(Dimensions::new(cols, rows))
    }

    fn fit(
        &mut self,
        emulator: &mut dyn Emulator,
        node: &dyn MountTarget,
    ) -> Result<Option<Dimensions>, EmulatorError> {
        if !self.active {
            return Ok(None);
        }
        let Some(proposed) = self.propose_dimensions(node) else {
            debug!("Mount node cannot be measured, keeping current size");
            return Ok(None);
        };
        if proposed == emulator.dimensions() {
            return Ok(None);
        }
        emulator.resize(proposed)?;
        Ok(Some(proposed))
    }
}

fn cells_in(pixels: f32, cell: f32) -> u16 {
    (pixels / cell).floor().clamp(0.0, u16::MAX as f32) as u16
}
