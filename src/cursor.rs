//! Cursor state: three slice indices plus the editable mm text fields.
//!
//! Indices are canonical. Each text field is either synced (it shows the
//! index converted to mm) or editing (the user is typing and the text is
//! held back until committed).

use crate::compositor::pixel_to_indices;
use crate::coords::{format_mm, Axis, Grid};
use crate::error::ParseError;
use crate::events::MmCoord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Synced,
    Editing,
}

#[derive(Debug, Clone)]
pub struct Cursor {
    indices: [usize; 3],
    text: [String; 3],
    state: [FieldState; 3],
    /// External request received before any grid was known.
    pending: Option<MmCoord>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    pub fn new() -> Self {
        Self {
            indices: [0; 3],
            text: ["0".to_string(), "0".to_string(), "0".to_string()],
            state: [FieldState::Synced; 3],
            pending: None,
        }
    }

    pub fn indices(&self) -> [usize; 3] {
        self.indices
    }

    pub fn index(&self, axis: Axis) -> usize {
        self.indices[axis.index()]
    }

    pub fn text(&self, axis: Axis) -> &str {
        &self.text[axis.index()]
    }

    pub fn state(&self, axis: Axis) -> FieldState {
        self.state[axis.index()]
    }

    pub fn pending(&self) -> Option<MmCoord> {
        self.pending
    }

    /// Rewrite every text field from the indices.
    fn sync_text(&mut self, grid: &Grid) {
        let mm = grid.indices_to_mm(self.indices);
        for axis in Axis::ALL {
            let i = axis.index();
            self.text[i] = format_mm(mm[i]);
            self.state[i] = FieldState::Synced;
        }
    }

    /// Pointer click at image pixel `(col, row)` of the view normal to
    /// `axis`; moves the two in-plane indices.
    pub fn click(&mut self, grid: &Grid, axis: Axis, col: u32, row: u32, mirror_x: bool) {
        for (a, index) in pixel_to_indices(axis, grid.dims, mirror_x, col, row) {
            self.indices[a.index()] = index;
        }
        self.sync_text(grid);
    }

    /// Keystroke in a coordinate field.
    pub fn edit(&mut self, axis: Axis, text: impl Into<String>) {
        let i = axis.index();
        self.text[i] = text.into();
        self.state[i] = FieldState::Editing;
    }

    /// Apply the typed text of `axis`. On error the field stays as typed.
    pub fn commit(&mut self, grid: Option<&Grid>, axis: Axis) -> Result<(), ParseError> {
        let mm = parse_mm(&self.text[axis.index()])?;
        let grid = grid.ok_or(ParseError::NoGrid)?;
        self.indices[axis.index()] = grid.mm_to_index(axis, mm);
        self.sync_text(grid);
        Ok(())
    }

    /// Jump to a millimetre position. Without a grid the request is held
    /// until [`Cursor::on_grid_changed`]; returns whether it was applied.
    pub fn set_coords(&mut self, grid: Option<&Grid>, coord: MmCoord) -> bool {
        match grid {
            Some(grid) => {
                self.pending = None;
                self.jump(grid, coord);
                true
            }
            None => {
                self.pending = Some(coord);
                for (i, mm) in coord.to_array().into_iter().enumerate() {
                    self.text[i] = format_mm(mm);
                    self.state[i] = FieldState::Synced;
                }
                false
            }
        }
    }

    fn jump(&mut self, grid: &Grid, coord: MmCoord) {
        let mm = coord.to_array();
        for axis in Axis::ALL {
            self.indices[axis.index()] = grid.mm_to_index(axis, mm[axis.index()]);
        }
        self.sync_text(grid);
    }

    /// Move one axis by `delta` slices, clamped to the grid.
    pub fn step(&mut self, grid: &Grid, axis: Axis, delta: isize) {
        let i = axis.index();
        let max = grid.dim(axis).saturating_sub(1);
        self.indices[i] = self.indices[i].saturating_add_signed(delta).min(max);
        self.sync_text(grid);
    }

    /// The active grid appeared or changed shape: apply a held request if
    /// there is one, otherwise centre.
    pub fn on_grid_changed(&mut self, grid: &Grid) {
        match self.pending.take() {
            Some(coord) => self.jump(grid, coord),
            None => {
                self.indices = grid.center();
                self.sync_text(grid);
            }
        }
    }
}

/// Parse coordinate text. `""` and `"-"` are in-progress input.
fn parse_mm(text: &str) -> Result<f64, ParseError> {
    let text = text.trim();
    if text.is_empty() || text == "-" {
        return Err(ParseError::Incomplete);
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::NotANumber(text.to_string())),
    }
}
