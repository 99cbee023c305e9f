// Grid layout calculation
//
// Maps a slot count to a named-area grid template and maps each slot in
// session order to one of those areas. Everything here is pure and may be
// called from any thread, independent of session mutation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{Slot, SlotId};

/// Largest slot count with a dedicated layout
pub const MAX_GRID_SLOTS: usize = 9;

/// Columns used once the primary stream becomes a 2x2 block
const BLOCK_COLUMNS: usize = 3;

/// Named grid area
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridArea {
    Primary,
    /// 1-based secondary position
    Secondary(usize),
    Placeholder,
}

impl fmt::Display for GridArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridArea::Primary => write!(f, "primary"),
            GridArea::Secondary(k) => write!(f, "secondary{}", k),
            GridArea::Placeholder => write!(f, "placeholder"),
        }
    }
}

/// Size of one grid track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackSize {
    /// Share of the remaining space (`1fr`)
    Fraction(u16),
}

impl fmt::Display for TrackSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSize::Fraction(n) => write!(f, "{}fr", n),
        }
    }
}

/// Rectangle covered by one named area, in 0-based grid coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaSpan {
    pub area: GridArea,
    pub row: usize,
    pub column: usize,
    pub row_span: usize,
    pub column_span: usize,
}

/// Grid template for a given slot count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPlacement {
    pub slot_count: usize,
    /// Area names, one inner vector per row
    pub areas: Vec<Vec<GridArea>>,
    pub column_sizes: Vec<TrackSize>,
    pub row_sizes: Vec<TrackSize>,
    pub placeholder_count: usize,
}

impl GridPlacement {
    fn from_rows(slot_count: usize, areas: Vec<Vec<GridArea>>, placeholder_count: usize) -> Self {
        let columns = areas.first().map(|row| row.len()).unwrap_or(0);
        let rows = areas.len();
        Self {
            slot_count,
            areas,
            column_sizes: vec![TrackSize::Fraction(1); columns],
            row_sizes: vec![TrackSize::Fraction(1); rows],
            placeholder_count,
        }
    }

    pub fn columns(&self) -> usize {
        self.column_sizes.len()
    }

    pub fn rows(&self) -> usize {
        self.row_sizes.len()
    }

    /// Distinct named areas in the template
    pub fn distinct_areas(&self) -> BTreeSet<GridArea> {
        self.areas.iter().flatten().copied().collect()
    }

    /// Bounding rectangle of every named area, in row-major order of first
    /// appearance
    pub fn spans(&self) -> Vec<AreaSpan> {
        let mut spans: Vec<AreaSpan> = Vec::new();
        for (row, cells) in self.areas.iter().enumerate() {
            for (column, area) in cells.iter().enumerate() {
                match spans.iter_mut().find(|s| s.area == *area) {
                    Some(span) => {
                        span.row_span = span.row_span.max(row - span.row + 1);
                        span.column_span = span.column_span.max(column + 1 - span.column);
                    }
                    None => spans.push(AreaSpan {
                        area: *area,
                        row,
                        column,
                        row_span: 1,
                        column_span: 1,
                    }),
                }
            }
        }
        spans
    }

    /// CSS `grid-template-areas` value
    pub fn template_areas(&self) -> String {
        self.areas
            .iter()
            .map(|row| {
                let names: Vec<String> = row.iter().map(|a| a.to_string()).collect();
                format!("\"{}\"", names.join(" "))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// CSS `grid-template-columns` value
    pub fn template_columns(&self) -> String {
        join_tracks(&self.column_sizes)
    }

    /// CSS `grid-template-rows` value
    pub fn template_rows(&self) -> String {
        join_tracks(&self.row_sizes)
    }
}

fn join_tracks(tracks: &[TrackSize]) -> String {
    tracks
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute the grid template for `slot_count` streams
///
/// Counts above [`MAX_GRID_SLOTS`] are clamped. With no streams the grid is
/// a single placeholder area used for the "add a stream" call-to-action.
pub fn layout(slot_count: usize) -> GridPlacement {
    let count = slot_count.min(MAX_GRID_SLOTS);
    match count {
        0 => GridPlacement::from_rows(0, vec![vec![GridArea::Placeholder]], 1),
        1 => GridPlacement::from_rows(1, vec![vec![GridArea::Primary]], 0),
        2 => GridPlacement::from_rows(
            2,
            vec![vec![GridArea::Primary, GridArea::Secondary(1)]],
            0,
        ),
        MAX_GRID_SLOTS => centered_layout(),
        _ => corner_block_layout(count),
    }
}

/// Primary as a 2x2 block in the top-left corner of a 3-column grid
///
/// Secondaries fill the remaining cells row-major. A single trailing unused
/// cell is absorbed by the last secondary; two or more become one
/// placeholder area.
fn corner_block_layout(count: usize) -> GridPlacement {
    let secondaries = count - 1;
    let rows = ((secondaries + 4).div_ceil(BLOCK_COLUMNS)).max(2);

    let mut cells: Vec<Vec<Option<GridArea>>> = vec![vec![None; BLOCK_COLUMNS]; rows];
    for row in cells.iter_mut().take(2) {
        for cell in row.iter_mut().take(2) {
            *cell = Some(GridArea::Primary);
        }
    }

    let mut next = 1;
    for cell in cells.iter_mut().flatten() {
        if cell.is_none() && next <= secondaries {
            *cell = Some(GridArea::Secondary(next));
            next += 1;
        }
    }

    let unused = cells.iter().flatten().filter(|c| c.is_none()).count();
    let filler = if unused == 1 {
        GridArea::Secondary(secondaries)
    } else {
        GridArea::Placeholder
    };
    let placeholder_count = usize::from(unused > 1);

    let areas = cells
        .into_iter()
        .map(|row| row.into_iter().map(|c| c.unwrap_or(filler)).collect())
        .collect();

    GridPlacement::from_rows(count, areas, placeholder_count)
}

/// Primary in the centre of a full 3x3 grid
fn centered_layout() -> GridPlacement {
    let mut next = 0;
    let areas = (0..3)
        .map(|row| {
            (0..3)
                .map(|column| {
                    if row == 1 && column == 1 {
                        GridArea::Primary
                    } else {
                        next += 1;
                        GridArea::Secondary(next)
                    }
                })
                .collect()
        })
        .collect();
    GridPlacement::from_rows(MAX_GRID_SLOTS, areas, 0)
}

/// Area for the slot at `index` when the primary slot sits at `primary_index`
///
/// Non-primary slots are numbered by how many non-primary slots precede
/// them in session order, counting themselves.
pub fn area_for(index: usize, primary_index: usize) -> GridArea {
    if index == primary_index {
        GridArea::Primary
    } else if index < primary_index {
        GridArea::Secondary(index + 1)
    } else {
        GridArea::Secondary(index)
    }
}

/// Areas for every slot position given the count and primary position
pub fn assign_areas(slot_count: usize, primary_index: usize) -> Vec<GridArea> {
    (0..slot_count).map(|i| area_for(i, primary_index)).collect()
}

/// Grid template plus the area each slot renders in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPlacement {
    pub grid: GridPlacement,
    pub assignments: Vec<(SlotId, GridArea)>,
}

impl SlotPlacement {
    pub fn area_of(&self, slot_id: SlotId) -> Option<GridArea> {
        self.assignments
            .iter()
            .find(|(id, _)| *id == slot_id)
            .map(|(_, area)| *area)
    }
}

/// Place the slots of a session onto its grid
pub fn place(slots: &[Slot]) -> SlotPlacement {
    let primary_index = slots.iter().position(|s| s.is_primary).unwrap_or(0);
    let assignments = slots
        .iter()
        .enumerate()
        .map(|(i, slot)| (slot.id, area_for(i, primary_index)))
        .collect();
    SlotPlacement {
        grid: layout(slots.len()),
        assignments,
    }
}
