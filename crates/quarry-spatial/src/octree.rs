//! Flat-array sparse octree.

use glam::Vec3;
use parking_lot::Mutex;
use quarry_core::math::{Aabb, Ray};
use tracing::warn;

/// Number of children per node.
const CHILD_COUNT: usize = 8;

/// Default maximum tree depth.
const DEFAULT_MAX_DEPTH: u32 = 8;

/// Default object count that triggers a leaf split.
const DEFAULT_MAX_OBJECTS_PER_NODE: usize = 16;

/// An object stored in the tree: its bounds plus caller data.
#[derive(Clone, Debug)]
struct Object<T> {
    bounds: Aabb,
    data: T,
}

/// A single octree node.
///
/// Child links are indices into the node vector; `-1` means no child.
/// Object links index into the slotted object vector.
#[derive(Clone, Debug)]
struct Node {
    bounds: Aabb,
    child_indices: [i32; CHILD_COUNT],
    object_indices: Vec<u32>,
}

impl Node {
    fn new(bounds: Aabb) -> Self {
        Self {
            bounds,
            child_indices: [-1; CHILD_COUNT],
            object_indices: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.child_indices.iter().all(|&idx| idx == -1)
    }
}

struct OctreeInner<T> {
    /// All nodes in a contiguous vector; the root is index 0.
    nodes: Vec<Node>,
    /// Slotted object storage; freed slots are reused.
    objects: Vec<Option<Object<T>>>,
    /// Free slots in `objects`.
    free_slots: Vec<u32>,
    /// Number of live objects.
    len: usize,
    max_depth: u32,
    max_objects_per_node: usize,
}

/// Generic spatial index over axis-aligned boxes.
///
/// An object lives at the deepest node whose bounds fully contain it; an
/// object straddling a center plane along any axis stays at that level.
/// All operations hold a single coarse mutex, which is sufficient at the
/// scale of this workload (tens of thousands of objects).
pub struct SparseOctree<T> {
    inner: Mutex<OctreeInner<T>>,
}

impl<T: Clone + PartialEq> SparseOctree<T> {
    /// Create an octree covering `bounds` with default depth and split limits.
    pub fn new(bounds: Aabb) -> Self {
        Self::with_limits(bounds, DEFAULT_MAX_DEPTH, DEFAULT_MAX_OBJECTS_PER_NODE)
    }

    /// Create an octree with explicit depth and per-node object limits.
    pub fn with_limits(bounds: Aabb, max_depth: u32, max_objects_per_node: usize) -> Self {
        Self {
            inner: Mutex::new(OctreeInner {
                nodes: vec![Node::new(bounds)],
                objects: Vec::new(),
                free_slots: Vec::new(),
                len: 0,
                max_depth,
                max_objects_per_node,
            }),
        }
    }

    /// Insert an object with its bounding box.
    ///
    /// Objects outside the root bounds are dropped (logged, not an error).
    pub fn insert(&self, bounds: Aabb, data: T) {
        let mut inner = self.inner.lock();
        if !inner.nodes[0].bounds.contains(&bounds) {
            warn!(
                min = ?bounds.min,
                max = ?bounds.max,
                "octree insert outside root bounds, dropping object"
            );
            return;
        }
        inner.insert_at(0, bounds, data, 0);
        inner.len += 1;
    }

    /// Remove an object by data equality. Returns whether it was found.
    pub fn remove(&self, bounds: Aabb, data: &T) -> bool {
        let mut inner = self.inner.lock();
        if !inner.nodes[0].bounds.intersects(&bounds) {
            return false;
        }
        let removed = inner.remove_at(0, &bounds, data);
        if removed {
            inner.len -= 1;
        }
        removed
    }

    /// Move an object to a new bounding box. Returns whether it was found.
    pub fn update(&self, old_bounds: Aabb, new_bounds: Aabb, data: T) -> bool {
        if self.remove(old_bounds, &data) {
            self.insert(new_bounds, data);
            true
        } else {
            false
        }
    }

    /// Collect all objects whose bounds intersect the query region.
    pub fn query_region(&self, region: Aabb) -> Vec<(Aabb, T)> {
        let inner = self.inner.lock();
        let mut result = Vec::new();
        if inner.nodes[0].bounds.intersects(&region) {
            inner.query_region_at(0, &region, &mut result);
        }
        result
    }

    /// Collect all objects whose bounds intersect the ray within `max_distance`.
    ///
    /// Children are visited in near-to-far order of their entry distances.
    pub fn query_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Vec<(Aabb, T)> {
        let inner = self.inner.lock();
        let ray = Ray::new(origin, direction);
        let mut result = Vec::new();

        match inner.nodes[0].bounds.intersect_ray(&ray) {
            Some((t_near, _)) if t_near <= max_distance => {
                inner.query_ray_at(0, &ray, max_distance, &mut result);
            }
            _ => {}
        }
        result
    }

    /// Remove every object and node except the root.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let bounds = inner.nodes[0].bounds;
        inner.nodes.clear();
        inner.nodes.push(Node::new(bounds));
        inner.objects.clear();
        inner.free_slots.clear();
        inner.len = 0;
    }

    /// Number of live objects in the tree.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Whether the tree holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + PartialEq> OctreeInner<T> {
    /// Whether `bounds` straddles a center plane of the node, i.e. its
    /// corners fall into different octants.
    fn straddles(&self, node_index: usize, bounds: &Aabb) -> bool {
        let node_bounds = &self.nodes[node_index].bounds;
        node_bounds.octant_of(bounds.min) != node_bounds.octant_of(bounds.max)
    }

    fn alloc_object(&mut self, bounds: Aabb, data: T) -> u32 {
        let object = Object { bounds, data };
        if let Some(slot) = self.free_slots.pop() {
            self.objects[slot as usize] = Some(object);
            slot
        } else {
            self.objects.push(Some(object));
            (self.objects.len() - 1) as u32
        }
    }

    fn child_of(&mut self, node_index: usize, octant: usize) -> usize {
        let existing = self.nodes[node_index].child_indices[octant];
        if existing >= 0 {
            return existing as usize;
        }
        let bounds = self.nodes[node_index].bounds.octant(octant);
        let child_index = self.nodes.len();
        self.nodes.push(Node::new(bounds));
        self.nodes[node_index].child_indices[octant] = child_index as i32;
        child_index
    }

    fn insert_at(&mut self, node_index: usize, bounds: Aabb, data: T, depth: u32) {
        if depth >= self.max_depth || self.straddles(node_index, &bounds) {
            let slot = self.alloc_object(bounds, data);
            self.nodes[node_index].object_indices.push(slot);
            return;
        }

        // Split a full leaf before descending further into it
        if self.nodes[node_index].is_leaf() {
            if self.nodes[node_index].object_indices.len() < self.max_objects_per_node {
                let slot = self.alloc_object(bounds, data);
                self.nodes[node_index].object_indices.push(slot);
                return;
            }
            self.split(node_index);
        }

        let octant = {
            let node_bounds = self.nodes[node_index].bounds;
            node_bounds.octant_of(bounds.center())
        };
        let child = self.child_of(node_index, octant);
        self.insert_at(child, bounds, data, depth + 1);
    }

    /// Create all eight children and push down every object that does not
    /// straddle a center plane.
    fn split(&mut self, node_index: usize) {
        for octant in 0..CHILD_COUNT {
            self.child_of(node_index, octant);
        }

        let slots = std::mem::take(&mut self.nodes[node_index].object_indices);
        for slot in slots {
            let bounds = match &self.objects[slot as usize] {
                Some(object) => object.bounds,
                None => continue,
            };

            if self.straddles(node_index, &bounds) {
                self.nodes[node_index].object_indices.push(slot);
            } else {
                let octant = self.nodes[node_index].bounds.octant_of(bounds.center());
                let child = self.nodes[node_index].child_indices[octant] as usize;
                // Re-split of an overfull child is deferred to its next insert
                self.nodes[child].object_indices.push(slot);
            }
        }
    }

    fn remove_at(&mut self, node_index: usize, bounds: &Aabb, data: &T) -> bool {
        // Check this node's own objects first
        let position = self.nodes[node_index].object_indices.iter().position(|&slot| {
            self.objects[slot as usize]
                .as_ref()
                .is_some_and(|object| object.data == *data)
        });

        if let Some(position) = position {
            let slot = self.nodes[node_index].object_indices.swap_remove(position);
            self.objects[slot as usize] = None;
            self.free_slots.push(slot);
            return true;
        }

        let children = self.nodes[node_index].child_indices;
        for child in children {
            if child < 0 {
                continue;
            }
            let child = child as usize;
            if self.nodes[child].bounds.intersects(bounds) && self.remove_at(child, bounds, data) {
                return true;
            }
        }
        false
    }

    fn query_region_at(&self, node_index: usize, region: &Aabb, result: &mut Vec<(Aabb, T)>) {
        let node = &self.nodes[node_index];

        for &slot in &node.object_indices {
            if let Some(object) = &self.objects[slot as usize] {
                if object.bounds.intersects(region) {
                    result.push((object.bounds, object.data.clone()));
                }
            }
        }

        for &child in &node.child_indices {
            if child < 0 {
                continue;
            }
            let child = child as usize;
            if self.nodes[child].bounds.intersects(region) {
                self.query_region_at(child, region, result);
            }
        }
    }

    fn query_ray_at(
        &self,
        node_index: usize,
        ray: &Ray,
        max_distance: f32,
        result: &mut Vec<(Aabb, T)>,
    ) {
        let node = &self.nodes[node_index];

        for &slot in &node.object_indices {
            if let Some(object) = &self.objects[slot as usize] {
                if let Some((t_near, _)) = object.bounds.intersect_ray(ray) {
                    if t_near <= max_distance {
                        result.push((object.bounds, object.data.clone()));
                    }
                }
            }
        }

        // Gather hit children into a fixed-size local array and insertion-sort
        // by entry distance; eight entries never need a heap allocation.
        let mut hits: [(i32, f32); CHILD_COUNT] = [(-1, 0.0); CHILD_COUNT];
        let mut hit_count = 0;

        for &child in &node.child_indices {
            if child < 0 {
                continue;
            }
            if let Some((t_near, _)) = self.nodes[child as usize].bounds.intersect_ray(ray) {
                if t_near <= max_distance {
                    hits[hit_count] = (child, t_near);
                    hit_count += 1;
                }
            }
        }

        let mut i = 1;
        while i < hit_count {
            let entry = hits[i];
            let mut j = i;
            while j > 0 && hits[j - 1].1 > entry.1 {
                hits[j] = hits[j - 1];
                j -= 1;
            }
            hits[j] = entry;
            i += 1;
        }

        for &(child, _) in hits.iter().take(hit_count) {
            self.query_ray_at(child as usize, ray, max_distance, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(min: f32, max: f32) -> Aabb {
        Aabb::new(Vec3::splat(min), Vec3::splat(max))
    }

    fn world() -> SparseOctree<u32> {
        SparseOctree::new(cube(0.0, 32.0))
    }

    #[test]
    fn corner_objects_query_separately() {
        let tree = world();
        tree.insert(cube(0.0, 1.0), 1);
        tree.insert(cube(31.0, 32.0), 2);

        let middle = tree.query_region(cube(15.0, 20.0));
        assert!(middle.is_empty());

        let corner = tree.query_region(cube(0.0, 2.0));
        assert_eq!(corner.len(), 1);
        assert_eq!(corner[0].1, 1);
    }

    #[test]
    fn region_query_returns_contained_objects() {
        let tree = world();
        for i in 0..50u32 {
            let base = (i % 30) as f32;
            tree.insert(Aabb::new(Vec3::splat(base), Vec3::splat(base + 1.0)), i);
        }

        // A region covering everything returns everything
        let all = tree.query_region(cube(0.0, 32.0));
        assert_eq!(all.len(), 50);

        // Every returned object really intersects the query
        let query = cube(4.0, 9.0);
        for (bounds, _) in tree.query_region(query) {
            assert!(bounds.intersects(&query));
        }
    }

    #[test]
    fn disjoint_region_returns_nothing() {
        let tree = world();
        tree.insert(cube(1.0, 3.0), 7);

        assert!(tree.query_region(cube(10.0, 12.0)).is_empty());
    }

    #[test]
    fn straddling_object_stays_findable() {
        let tree = world();
        // Crosses the root center plane at 16 on every axis
        tree.insert(cube(15.0, 17.0), 99);

        let found = tree.query_region(cube(14.0, 18.0));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, 99);
    }

    #[test]
    fn split_keeps_all_objects_queryable() {
        let tree = SparseOctree::with_limits(cube(0.0, 32.0), 8, 4);
        // Pile more objects into one octant than a leaf holds
        for i in 0..20u32 {
            let offset = (i as f32) * 0.25;
            tree.insert(
                Aabb::new(Vec3::splat(offset), Vec3::splat(offset + 0.2)),
                i,
            );
        }

        let all = tree.query_region(cube(0.0, 8.0));
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn out_of_bounds_insert_is_dropped() {
        let tree = world();
        tree.insert(cube(40.0, 44.0), 1);
        assert!(tree.is_empty());
    }

    #[test]
    fn remove_by_equality() {
        let tree = world();
        tree.insert(cube(1.0, 2.0), 5);
        tree.insert(cube(1.0, 2.0), 6);

        assert!(tree.remove(cube(1.0, 2.0), &5));
        assert!(!tree.remove(cube(1.0, 2.0), &5));
        assert_eq!(tree.len(), 1);

        let remaining = tree.query_region(cube(0.0, 3.0));
        assert_eq!(remaining, vec![(cube(1.0, 2.0), 6)]);
    }

    #[test]
    fn update_moves_object() {
        let tree = world();
        tree.insert(cube(1.0, 2.0), 5);

        assert!(tree.update(cube(1.0, 2.0), cube(20.0, 21.0), 5));

        assert!(tree.query_region(cube(0.0, 3.0)).is_empty());
        assert_eq!(tree.query_region(cube(19.0, 22.0)).len(), 1);
    }

    #[test]
    fn ray_hits_within_max_distance() {
        let tree = world();
        tree.insert(cube(2.0, 3.0), 1);
        tree.insert(cube(10.0, 11.0), 2);
        tree.insert(cube(30.0, 31.0), 3);

        let origin = Vec3::new(0.0, 2.5, 2.5);
        let hits = tree.query_ray(origin, Vec3::X, 12.0);

        // The far cube is beyond max_distance and off-axis anyway
        let data: Vec<u32> = hits.iter().map(|(_, d)| *d).collect();
        assert!(data.contains(&1));
        assert!(!data.contains(&3));

        // Every hit is actually within range
        let ray = Ray::new(origin, Vec3::X);
        for (bounds, _) in &hits {
            let (t_near, _) = bounds.intersect_ray(&ray).unwrap();
            assert!(t_near <= 12.0);
        }
    }

    #[test]
    fn ray_miss_returns_nothing() {
        let tree = world();
        tree.insert(cube(10.0, 11.0), 1);

        let hits = tree.query_ray(Vec3::new(0.0, 0.5, 0.5), Vec3::Y, 100.0);
        assert!(hits.is_empty());
    }

    #[test]
    fn clear_empties_tree() {
        let tree = world();
        tree.insert(cube(1.0, 2.0), 1);
        tree.clear();

        assert!(tree.is_empty());
        assert!(tree.query_region(cube(0.0, 32.0)).is_empty());

        // Still usable after clearing
        tree.insert(cube(1.0, 2.0), 2);
        assert_eq!(tree.len(), 1);
    }
}
