// Integration tests for grid layout calculation

use multiview::{layout, place, GridArea, SessionState, MAX_GRID_SLOTS};

#[test]
fn test_four_streams_leave_one_placeholder() {
    let grid = layout(4);
    assert_eq!(grid.placeholder_count, 1);
    assert!(grid.distinct_areas().contains(&GridArea::Placeholder));
}

#[test]
fn test_five_streams_fill_the_grid() {
    let grid = layout(5);
    assert_eq!(grid.placeholder_count, 0);
    assert!(!grid.distinct_areas().contains(&GridArea::Placeholder));
}

#[test]
fn test_area_count_matches_streams_plus_placeholders() {
    for count in 0..=MAX_GRID_SLOTS {
        let grid = layout(count);
        assert_eq!(
            grid.distinct_areas().len(),
            count + grid.placeholder_count,
            "slot count {}",
            count
        );
        assert_eq!(grid, layout(count), "layout must be deterministic");
    }
}

#[test]
fn test_every_row_has_every_column() {
    for count in 0..=MAX_GRID_SLOTS {
        let grid = layout(count);
        assert!(grid.areas.iter().all(|row| row.len() == grid.columns()));
        assert_eq!(grid.areas.len(), grid.rows());
    }
}

#[test]
fn test_session_slots_map_to_distinct_areas() {
    let mut state = SessionState::new(MAX_GRID_SLOTS);
    for channel in ["a", "b", "c", "d", "e", "f"] {
        state.add(channel).unwrap();
    }
    let slots = state.slots();
    let promoted = state.promote_to_primary(slots[3].id).unwrap();

    let placement = place(&promoted);
    assert_eq!(placement.area_of(promoted[3].id), Some(GridArea::Primary));
    assert_eq!(placement.area_of(promoted[0].id), Some(GridArea::Secondary(1)));
    assert_eq!(placement.area_of(promoted[4].id), Some(GridArea::Secondary(4)));

    let mut areas: Vec<GridArea> = placement.assignments.iter().map(|(_, a)| *a).collect();
    areas.sort();
    areas.dedup();
    assert_eq!(areas.len(), promoted.len());
}

#[test]
fn test_css_template_for_three_streams() {
    let grid = layout(3);
    assert_eq!(
        grid.template_areas(),
        "\"primary primary secondary1\" \"primary primary secondary2\""
    );
    assert_eq!(grid.template_columns(), "1fr 1fr 1fr");
    assert_eq!(grid.template_rows(), "1fr 1fr");
}
