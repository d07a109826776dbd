// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Viewport culling over an arranged [`Structure`].

use kurbo::{Point, Rect};
use trellis_recycler::{CellProvider, CellView};

use crate::structure::Structure;

/// Supplies the on-screen viewport, in the coordinate space of drawn cells.
pub trait ViewportSource {
    /// The rectangle currently visible on screen.
    fn visible_viewport(&self) -> Rect;
}

impl ViewportSource for Rect {
    fn visible_viewport(&self) -> Rect {
        *self
    }
}

/// How a virtualization pass decides visibility.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Culling {
    /// Cells are visible iff they intersect the viewport.
    #[default]
    Viewport,
    /// Every cell with content is visible.
    Disabled,
    /// Like [`Disabled`](Self::Disabled), for a single pass after templates
    /// were invalidated.
    ForceVisible,
}

/// A cell handed to the draw pass.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VisibleCell {
    /// Logical index.
    pub index: usize,
    /// Row in the structure.
    pub row: usize,
    /// Column within the row.
    pub column: usize,
    /// Absolute on-canvas rectangle.
    pub drawn: Rect,
    /// Paint order.
    pub z_index: i32,
}

/// Result of a virtualization pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Visibility {
    /// Visible cells in paint order: ascending `z_index`, ties in traversal order.
    pub visible: Vec<VisibleCell>,
    /// Indices released to the provider during this pass.
    pub released: Vec<usize>,
    /// Live instances worth keeping around: the visible cells plus one row
    /// above and one row below.
    pub prewarm_target: usize,
}

/// Strict overlap: rectangles that only share an edge do not intersect.
pub(crate) fn overlaps(a: Rect, b: Rect) -> bool {
    a.x0 < b.x1 && b.x0 < a.x1 && a.y0 < b.y1 && b.y0 < a.y1
}

/// Recomputes `drawn` and `is_visible` for every cell and releases the
/// instances of cells that left the viewport.
///
/// `origin` is where the container currently draws its content; `drawn` is
/// `destination` offset by it. Cells without content are never visible. A
/// cell is released when it is not visible and either was visible on the
/// previous pass or this is the first pass over a freshly built structure,
/// so every instance bound during measurement is accounted for once.
pub fn virtualize<V: CellView>(
    structure: &mut Structure,
    provider: &CellProvider<V>,
    origin: Point,
    viewport: Rect,
    culling: Culling,
) -> Visibility {
    let first_pass = !structure.is_virtualized();
    let offset = origin.to_vec2();
    let mut visible = Vec::new();
    let mut released = Vec::new();

    for cell in structure.cells_mut() {
        let now_visible = if cell.has_content() {
            cell.drawn = cell.destination + offset;
            match culling {
                Culling::Viewport => overlaps(cell.drawn, viewport),
                Culling::Disabled | Culling::ForceVisible => true,
            }
        } else {
            cell.drawn = Rect::ZERO;
            false
        };

        if now_visible {
            visible.push(VisibleCell {
                index: cell.index,
                row: cell.row,
                column: cell.column,
                drawn: cell.drawn,
                z_index: cell.z_index,
            });
        } else if first_pass || cell.is_visible {
            provider.mark_hidden(cell.index);
            released.push(cell.index);
        }
        cell.is_visible = now_visible;
    }
    structure.set_virtualized();

    visible.sort_by_key(|cell| cell.z_index);
    let prewarm_target = visible.len() + 2 * structure.max_row_len();
    Visibility {
        visible,
        released,
        prewarm_target,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kurbo::{Point, Rect};
    use trellis_recycler::{CellProvider, PoolConfig, Template};

    use super::{Culling, overlaps, virtualize};
    use crate::engine::{LayoutOptions, measure_structure};
    use crate::structure::{Structure, StructureOptions};
    use crate::test_util::{Tile, TileData, tile_data, tile_factory};

    fn measured(
        data: Arc<[TileData]>,
        options: &LayoutOptions,
        available: Rect,
    ) -> (CellProvider<Tile>, Structure) {
        let provider = CellProvider::templated();
        let (factory, _) = tile_factory();
        provider
            .initialize(Template::new(factory), Arc::clone(&data), &PoolConfig::with_max_size(32))
            .unwrap();
        let mut structure = Structure::build(data.len(), &options.structure);
        measure_structure(&mut structure, &provider, available, 1.0, options).unwrap();
        (provider, structure)
    }

    #[test]
    fn viewport_over_first_two_rows() {
        let options = LayoutOptions::new(StructureOptions::grid(3));
        let (provider, mut structure) = measured(
            tile_data([(100.0, 50.0); 10]),
            &options,
            Rect::new(0.0, 0.0, 300.0, 1000.0),
        );
        assert_eq!(provider.in_use_count(), 10);

        let viewport = Rect::new(0.0, 0.0, 300.0, 100.0);
        let pass = virtualize(&mut structure, &provider, Point::ZERO, viewport, Culling::Viewport);

        let visible: Vec<usize> = pass.visible.iter().map(|cell| cell.index).collect();
        assert_eq!(visible, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(pass.released, vec![6, 7, 8, 9]);
        assert_eq!(provider.in_use_indices(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(provider.pool().unwrap().idle_count(), 4);
        assert_eq!(pass.prewarm_target, 12);
        for cell in structure.cells() {
            assert_eq!(cell.is_visible, cell.row < 2, "cell {}", cell.index);
        }

        // A second pass over the same viewport releases nothing more.
        let again = virtualize(&mut structure, &provider, Point::ZERO, viewport, Culling::Viewport);
        assert!(again.released.is_empty());
    }

    #[test]
    fn visibility_follows_strict_intersection() {
        let options = LayoutOptions::new(StructureOptions::grid(4)).with_spacing(3.0);
        let (provider, mut structure) = measured(
            tile_data((0_u8..37).map(|i| (10.0 + f64::from(i % 5) * 7.0, 8.0 + f64::from(i % 3) * 9.0))),
            &options,
            Rect::new(0.0, 0.0, 200.0, 400.0),
        );
        let origins = [Point::ZERO, Point::new(-40.0, -60.0), Point::new(15.0, 100.0)];
        let viewports = [
            Rect::new(0.0, 0.0, 120.0, 90.0),
            Rect::new(50.0, 30.0, 300.0, 200.0),
            Rect::new(-10.0, 150.0, 60.0, 151.0),
        ];
        for origin in origins {
            for viewport in viewports {
                virtualize(&mut structure, &provider, origin, viewport, Culling::Viewport);
                for cell in structure.cells() {
                    let expected = cell.has_content() && overlaps(cell.drawn, viewport);
                    assert_eq!(cell.is_visible, expected, "cell {}", cell.index);
                    if cell.has_content() {
                        assert_eq!(cell.drawn, cell.destination + origin.to_vec2(), "cell {}", cell.index);
                    }
                }
                for index in provider.in_use_indices() {
                    assert!(structure.cell(index).unwrap().is_visible, "index {index} still bound");
                }
            }
        }
    }

    #[test]
    fn touching_edges_are_not_visible() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(!overlaps(a, Rect::new(10.0, 0.0, 20.0, 10.0)));
        assert!(!overlaps(a, Rect::new(0.0, 10.0, 10.0, 20.0)));
        assert!(overlaps(a, Rect::new(9.5, 9.5, 20.0, 20.0)));
    }

    #[test]
    fn empty_cells_are_released_and_never_drawn() {
        let data: Arc<[TileData]> = vec![
            TileData::new(10.0, 10.0),
            TileData::new(10.0, 10.0).hidden(),
            TileData::new(10.0, 10.0),
        ]
        .into();
        let options = LayoutOptions::new(StructureOptions::row());
        let (provider, mut structure) =
            measured(data, &options, Rect::new(0.0, 0.0, 100.0, 100.0));

        let pass = virtualize(
            &mut structure,
            &provider,
            Point::ZERO,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            Culling::Disabled,
        );
        let visible: Vec<usize> = pass.visible.iter().map(|cell| cell.index).collect();
        assert_eq!(visible, vec![0, 2]);
        assert_eq!(pass.released, vec![1]);
        assert_eq!(structure.cell(1).unwrap().drawn, Rect::ZERO);
    }

    #[test]
    fn disabled_culling_keeps_offscreen_cells() {
        let options = LayoutOptions::new(StructureOptions::column());
        let (provider, mut structure) = measured(
            tile_data([(10.0, 10.0); 4]),
            &options,
            Rect::new(0.0, 0.0, 100.0, 100.0),
        );
        let far_away = Rect::new(500.0, 500.0, 600.0, 600.0);

        let forced = virtualize(&mut structure, &provider, Point::ZERO, far_away, Culling::ForceVisible);
        assert_eq!(forced.visible.len(), 4);
        assert!(forced.released.is_empty());

        let culled = virtualize(&mut structure, &provider, Point::ZERO, far_away, Culling::Viewport);
        assert!(culled.visible.is_empty());
        assert_eq!(culled.released, vec![0, 1, 2, 3]);
        assert_eq!(provider.in_use_count(), 0);
    }

    #[test]
    fn visible_cells_sorted_by_z_index_stably() {
        let data: Arc<[TileData]> = vec![
            TileData::new(10.0, 10.0).with_z(2),
            TileData::new(10.0, 10.0),
            TileData::new(10.0, 10.0).with_z(-1),
            TileData::new(10.0, 10.0),
            TileData::new(10.0, 10.0).with_z(2),
        ]
        .into();
        let options = LayoutOptions::new(StructureOptions::row());
        let (provider, mut structure) =
            measured(data, &options, Rect::new(0.0, 0.0, 100.0, 100.0));
        let pass = virtualize(
            &mut structure,
            &provider,
            Point::ZERO,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            Culling::Viewport,
        );
        let order: Vec<usize> = pass.visible.iter().map(|cell| cell.index).collect();
        assert_eq!(order, vec![2, 1, 3, 0, 4]);
    }
}
