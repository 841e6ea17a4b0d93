//! A bulk-loaded spatial index in the STR-tree role: an R-tree over bounding
//! rectangles that refers back into an owned geometry list. Envelope queries
//! give candidates; callers refine with exact predicates. The index owns its
//! geometries, so every indexed entry is alive as long as the tree is.

use geo::Rect;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};

use crate::float_types::Real;

type Entry = GeomWithData<Rectangle<[Real; 2]>, usize>;

pub struct GeomIndex<G> {
    tree: RTree<Entry>,
    geoms: Vec<G>,
}

impl<G> Default for GeomIndex<G> {
    fn default() -> Self {
        GeomIndex {
            tree: RTree::new(),
            geoms: Vec::new(),
        }
    }
}

impl<G> GeomIndex<G> {
    /// Bulk-load the index. `envelope` yields a geometry's bounding
    /// rectangle; members without one (empty geometries) stay unindexed.
    pub fn bulk_load(
        geoms: Vec<G>,
        envelope: impl Fn(&G) -> Option<Rect<Real>>,
    ) -> GeomIndex<G> {
        let entries: Vec<Entry> = geoms
            .iter()
            .enumerate()
            .filter_map(|(i, g)| {
                envelope(g).map(|r| {
                    let rect = Rectangle::from_corners(
                        [r.min().x, r.min().y],
                        [r.max().x, r.max().y],
                    );
                    GeomWithData::new(rect, i)
                })
            })
            .collect();
        GeomIndex {
            tree: RTree::bulk_load(entries),
            geoms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.geoms.is_empty()
    }

    pub fn geoms(&self) -> &[G] {
        &self.geoms
    }

    /// Indices of members whose envelope intersects `rect` grown by `pad`.
    pub fn candidates_in_rect(&self, rect: Rect<Real>, pad: Real) -> Vec<usize> {
        let query = AABB::from_corners(
            [rect.min().x - pad, rect.min().y - pad],
            [rect.max().x + pad, rect.max().y + pad],
        );
        self.tree
            .locate_in_envelope_intersecting(&query)
            .map(|e| e.data)
            .collect()
    }

    /// Indices of members whose envelope lies within `max_dist` of a point,
    /// nearest first. Envelope distance lower-bounds true distance, so no
    /// qualifying member is missed.
    pub fn candidates_near_point(&self, p: [Real; 2], max_dist: Real) -> Vec<usize> {
        let limit = max_dist * max_dist;
        self.tree
            .nearest_neighbor_iter_with_distance_2(&p)
            .take_while(|(_, d2)| *d2 <= limit)
            .map(|(e, _)| e.data)
            .collect()
    }
}
