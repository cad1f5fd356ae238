//! Streaming anomaly scorer
//!
//! A robust random cut forest: an ensemble of randomized space-partitioning
//! trees that ingests one point at a time. Each update evicts the oldest point
//! from trees at capacity, inserts the new point, and scores it by collusive
//! displacement (how much of the tree the point's removal would displace).
//! A point that lands in a sparse region displaces many others and scores high.
//!
//! Scoring never looks ahead: the score for a sample depends only on samples
//! inserted before it and on the sample itself.

use crate::config::ForestConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

type NodeId = usize;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        point: Vec<f64>,
        /// Multiplicity of identical points
        count: usize,
        parent: Option<NodeId>,
    },
    Branch {
        dim: usize,
        cut: f64,
        left: NodeId,
        right: NodeId,
        count: usize,
        lower: Vec<f64>,
        upper: Vec<f64>,
        parent: Option<NodeId>,
    },
}

impl Node {
    fn count(&self) -> usize {
        match self {
            Node::Leaf { count, .. } | Node::Branch { count, .. } => *count,
        }
    }

    fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Leaf { parent, .. } | Node::Branch { parent, .. } => *parent,
        }
    }

    fn set_parent(&mut self, value: Option<NodeId>) {
        match self {
            Node::Leaf { parent, .. } | Node::Branch { parent, .. } => *parent = value,
        }
    }

    fn add_count(&mut self, delta: isize) {
        match self {
            Node::Leaf { count, .. } | Node::Branch { count, .. } => {
                *count = count.saturating_add_signed(delta)
            }
        }
    }

    fn bounds(&self) -> (&[f64], &[f64]) {
        match self {
            Node::Leaf { point, .. } => (point, point),
            Node::Branch { lower, upper, .. } => (lower, upper),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// A single random cut tree with arena-allocated nodes
#[derive(Debug, Clone)]
pub struct RandomCutTree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    /// Leaf holding each live point, oldest first
    history: VecDeque<NodeId>,
    rng: StdRng,
}

impl RandomCutTree {
    pub fn new(rng: StdRng) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            history: VecDeque::new(),
            rng,
        }
    }

    /// Number of live points (duplicates included)
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Insert a point and return the leaf that holds it
    fn insert(&mut self, point: &[f64]) -> NodeId {
        let Some(root) = self.root else {
            let leaf = self.alloc(Node::Leaf {
                point: point.to_vec(),
                count: 1,
                parent: None,
            });
            self.root = Some(leaf);
            self.history.push_back(leaf);
            return leaf;
        };

        if let Some(duplicate) = self.find_duplicate(point) {
            self.add_count_upwards(Some(duplicate), 1);
            self.history.push_back(duplicate);
            return duplicate;
        }

        let mut node = root;
        let mut parent: Option<(NodeId, Side)> = None;
        let (dim, cut, new_on_left) = loop {
            let (lower, upper) = {
                let (l, u) = self.node(node).bounds();
                (l.to_vec(), u.to_vec())
            };
            let (dim, cut) = self.insert_cut(point, &lower, &upper);
            if cut <= lower[dim] {
                break (dim, cut, true);
            }
            if cut >= upper[dim] {
                break (dim, cut, false);
            }
            match self.node(node) {
                Node::Branch {
                    dim: q,
                    cut: p,
                    left,
                    right,
                    ..
                } => {
                    let side = if point[*q] <= *p { Side::Left } else { Side::Right };
                    let next = if side == Side::Left { *left } else { *right };
                    parent = Some((node, side));
                    node = next;
                }
                // A leaf's bounds collapse to a point, so a cut can never fall inside them.
                Node::Leaf { .. } => break (dim, cut, false),
            }
        };

        let leaf = self.alloc(Node::Leaf {
            point: point.to_vec(),
            count: 1,
            parent: None,
        });
        let (left, right) = if new_on_left { (leaf, node) } else { (node, leaf) };
        let (lower, upper) = self.union_bounds(left, right);
        let branch = self.alloc(Node::Branch {
            dim,
            cut,
            left,
            right,
            count: 1 + self.node(node).count(),
            lower,
            upper,
            parent: parent.map(|(p, _)| p),
        });
        self.node_mut(node).set_parent(Some(branch));
        self.node_mut(leaf).set_parent(Some(branch));

        match parent {
            Some((p, side)) => {
                self.replace_child(p, side, branch);
                self.add_count_upwards(Some(p), 1);
                self.refresh_bounds_upwards(Some(p));
            }
            None => self.root = Some(branch),
        }

        self.history.push_back(leaf);
        leaf
    }

    /// Remove the oldest live point
    fn forget_oldest(&mut self) {
        if let Some(leaf) = self.history.pop_front() {
            self.forget(leaf);
        }
    }

    fn forget(&mut self, leaf: NodeId) {
        if self.node(leaf).count() > 1 {
            self.add_count_upwards(Some(leaf), -1);
            return;
        }

        if self.root == Some(leaf) {
            self.release(leaf);
            self.root = None;
            return;
        }

        let Some(parent) = self.node(leaf).parent() else {
            return;
        };
        let sibling = self.sibling(parent, leaf);
        let grandparent = self.node(parent).parent();
        self.release(leaf);
        self.release(parent);
        self.node_mut(sibling).set_parent(grandparent);

        match grandparent {
            Some(g) => {
                let side = self.side_of(g, parent);
                self.replace_child(g, side, sibling);
                self.add_count_upwards(Some(g), -1);
                self.refresh_bounds_upwards(Some(g));
            }
            None => self.root = Some(sibling),
        }
    }

    /// Collusive displacement of the point held by `leaf`
    fn codisp(&self, leaf: NodeId) -> f64 {
        if self.root == Some(leaf) {
            return 0.0;
        }
        let mut node = leaf;
        let mut displacement: f64 = 0.0;
        while let Some(parent) = self.node(node).parent() {
            let sibling = self.sibling(parent, node);
            let ratio = self.node(sibling).count() as f64 / self.node(node).count() as f64;
            displacement = displacement.max(ratio);
            node = parent;
        }
        displacement
    }

    fn find_duplicate(&self, point: &[f64]) -> Option<NodeId> {
        let mut node = self.root?;
        loop {
            match self.node(node) {
                Node::Branch {
                    dim,
                    cut,
                    left,
                    right,
                    ..
                } => node = if point[*dim] <= *cut { *left } else { *right },
                Node::Leaf { point: stored, .. } => {
                    return (stored.as_slice() == point).then_some(node);
                }
            }
        }
    }

    /// Draw a cut over the bounding box extended to include `point`
    fn insert_cut(&mut self, point: &[f64], lower: &[f64], upper: &[f64]) -> (usize, f64) {
        let lo: Vec<f64> = lower.iter().zip(point).map(|(l, p)| l.min(*p)).collect();
        let hi: Vec<f64> = upper.iter().zip(point).map(|(u, p)| u.max(*p)).collect();
        let spans: Vec<f64> = hi.iter().zip(&lo).map(|(h, l)| h - l).collect();
        let total: f64 = spans.iter().sum();
        let r = self.rng.gen::<f64>() * total;

        let mut cumulative = 0.0;
        for (dim, span) in spans.iter().enumerate() {
            cumulative += span;
            if cumulative >= r && *span > 0.0 {
                return (dim, lo[dim] + cumulative - r);
            }
        }
        let last = spans.len().saturating_sub(1);
        (last, hi[last])
    }

    fn union_bounds(&self, a: NodeId, b: NodeId) -> (Vec<f64>, Vec<f64>) {
        let (a_lo, a_hi) = self.node(a).bounds();
        let (b_lo, b_hi) = self.node(b).bounds();
        let lower = a_lo.iter().zip(b_lo).map(|(x, y)| x.min(*y)).collect();
        let upper = a_hi.iter().zip(b_hi).map(|(x, y)| x.max(*y)).collect();
        (lower, upper)
    }

    fn refresh_bounds_upwards(&mut self, mut current: Option<NodeId>) {
        while let Some(id) = current {
            let children = match self.node(id) {
                Node::Branch { left, right, .. } => Some((*left, *right)),
                Node::Leaf { .. } => None,
            };
            if let Some((left, right)) = children {
                let (new_lower, new_upper) = self.union_bounds(left, right);
                if let Node::Branch { lower, upper, .. } = self.node_mut(id) {
                    *lower = new_lower;
                    *upper = new_upper;
                }
            }
            current = self.node(id).parent();
        }
    }

    fn add_count_upwards(&mut self, mut current: Option<NodeId>, delta: isize) {
        while let Some(id) = current {
            let node = self.node_mut(id);
            node.add_count(delta);
            current = node.parent();
        }
    }

    fn sibling(&self, parent: NodeId, child: NodeId) -> NodeId {
        match self.node(parent) {
            Node::Branch { left, right, .. } => {
                if *left == child {
                    *right
                } else {
                    *left
                }
            }
            Node::Leaf { .. } => child,
        }
    }

    fn side_of(&self, parent: NodeId, child: NodeId) -> Side {
        match self.node(parent) {
            Node::Branch { left, .. } if *left == child => Side::Left,
            _ => Side::Right,
        }
    }

    fn replace_child(&mut self, parent: NodeId, side: Side, child: NodeId) {
        if let Node::Branch { left, right, .. } = self.node_mut(parent) {
            match side {
                Side::Left => *left = child,
                Side::Right => *right = child,
            }
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = None;
        self.free.push(id);
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id]
            .as_ref()
            .unwrap_or_else(|| unreachable!("node {id} referenced after release"))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id]
            .as_mut()
            .unwrap_or_else(|| unreachable!("node {id} referenced after release"))
    }

    /// Point count stored at the root (equals `len()` for a consistent tree)
    fn root_count(&self) -> usize {
        self.root.map(|r| self.node(r).count()).unwrap_or_default()
    }
}

/// Ensemble of random cut trees scored together
#[derive(Debug, Clone)]
pub struct RandomCutForest {
    trees: Vec<RandomCutTree>,
    tree_size: usize,
    shingle_size: usize,
    seen: usize,
}

impl RandomCutForest {
    pub fn new(config: &ForestConfig) -> Self {
        let trees = (0..config.num_trees.max(1))
            .map(|i| {
                let rng = match config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64)),
                    None => StdRng::from_entropy(),
                };
                RandomCutTree::new(rng)
            })
            .collect();
        Self {
            trees,
            tree_size: config.tree_size.max(1),
            shingle_size: config.shingle_size.max(1),
            seen: 0,
        }
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Total number of samples ingested
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Insert one sample and return its mean collusive displacement
    pub fn update(&mut self, point: &[f64]) -> f64 {
        let mut total = 0.0;
        for tree in &mut self.trees {
            if tree.len() >= self.tree_size {
                tree.forget_oldest();
            }
            let leaf = tree.insert(point);
            total += tree.codisp(leaf);
        }
        self.seen += 1;
        total / self.trees.len() as f64
    }

    /// Fit and score a scalar series in one pass, in order
    ///
    /// With a shingle size `s > 1`, frame `i` is scored as the point
    /// `values[i + 1 - s ..= i]`; positions before the first frame repeat it.
    pub fn score_series(&mut self, values: &[f64]) -> Vec<f64> {
        let mut shingle = Vec::with_capacity(self.shingle_size);
        (0..values.len())
            .map(|i| {
                shingle.clear();
                shingle.extend(
                    (0..self.shingle_size)
                        .rev()
                        .map(|back| values[i.saturating_sub(back)]),
                );
                self.update(&shingle)
            })
            .collect()
    }
}
