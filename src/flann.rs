//! Approximate nearest neighbour indices in the spirit of FLANN: a
//! randomized kd-forest for floating point descriptors and multi-probe
//! locality sensitive hashing for binary descriptors.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
};

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::{
    frame::DescriptorTable,
    matching::{euclidean, hamming, Candidate},
};

const RANDOM_SEED: u64 = 0xf1a2;

pub struct KdForestParams {
    pub trees: usize,
    /// leaves visited per query before the search stops
    pub checks: usize,
}

impl Default for KdForestParams {
    fn default() -> Self {
        Self {
            trees: 4,
            checks: 32,
        }
    }
}

enum Node {
    Leaf(Vec<usize>),
    Split {
        dimension: usize,
        value: f32,
        left: usize,
        right: usize,
    },
}

/// Sample size used to estimate the variance of each dimension
const VARIANCE_SAMPLES: usize = 100;
/// The split dimension is drawn from this many highest variance dimensions
const SPLIT_CANDIDATES: usize = 5;
const MAX_LEAF_SIZE: usize = 4;

/// Randomized kd-trees searched together, best bin first.
pub struct KdForest<'a> {
    data: &'a DescriptorTable<f32>,
    /// every tree's nodes, each tree's root first
    trees: Vec<Vec<Node>>,
    checks: usize,
}

impl<'a> KdForest<'a> {
    pub fn new(data: &'a DescriptorTable<f32>, params: &KdForestParams) -> Self {
        let mut rng = StdRng::seed_from_u64(RANDOM_SEED);
        let trees = (0..params.trees.max(1))
            .map(|_| {
                let mut nodes = Vec::new();
                let indices: Vec<usize> = (0..data.len()).collect();
                build_node(data, indices, &mut nodes, &mut rng);
                nodes
            })
            .collect();

        Self {
            data,
            trees,
            checks: params.checks.max(1),
        }
    }

    /// Up to `k` approximate nearest neighbours of `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Candidate> {
        let mut visited = vec![false; self.data.len()];
        let mut results: Vec<Candidate> = Vec::new();
        let mut branches = BinaryHeap::new();
        for tree in 0..self.trees.len() {
            branches.push(Branch {
                bound: 0.0,
                tree,
                node: 0,
            });
        }

        let mut checked_leaves = 0;
        while let Some(branch) = branches.pop() {
            if checked_leaves >= self.checks && results.len() >= k {
                break;
            }

            let nodes = &self.trees[branch.tree];
            let mut current = branch.node;
            // descend to a leaf, queueing the branches not taken
            loop {
                match &nodes[current] {
                    Node::Split {
                        dimension,
                        value,
                        left,
                        right,
                    } => {
                        let difference = query[*dimension] - value;
                        let (near, far) = if difference < 0.0 {
                            (*left, *right)
                        } else {
                            (*right, *left)
                        };
                        branches.push(Branch {
                            bound: branch.bound.max(difference.abs()),
                            tree: branch.tree,
                            node: far,
                        });
                        current = near;
                    }
                    Node::Leaf(points) => {
                        for &index in points {
                            if !std::mem::replace(&mut visited[index], true) {
                                let distance = euclidean(query, self.data.row(index));
                                results.push(Candidate {
                                    train_idx: index,
                                    distance,
                                });
                            }
                        }
                        checked_leaves += 1;
                        break;
                    }
                }
            }
        }

        sort_and_truncate(results, k)
    }
}

fn build_node(
    data: &DescriptorTable<f32>,
    indices: Vec<usize>,
    nodes: &mut Vec<Node>,
    rng: &mut StdRng,
) -> usize {
    let id = nodes.len();
    if indices.len() <= MAX_LEAF_SIZE {
        nodes.push(Node::Leaf(indices));
        return id;
    }

    let sample: Vec<usize> = indices
        .choose_multiple(rng, VARIANCE_SAMPLES.min(indices.len()))
        .copied()
        .collect();
    let width = data.width();
    let mut mean = vec![0.0f32; width];
    for &i in &sample {
        for (m, v) in mean.iter_mut().zip(data.row(i)) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= sample.len() as f32);

    let mut variance: Vec<(usize, f32)> = (0..width)
        .map(|d| {
            let var = sample
                .iter()
                .map(|&i| (data.row(i)[d] - mean[d]).powi(2))
                .sum::<f32>();
            (d, var)
        })
        .collect();
    variance.sort_by(|a, b| b.1.total_cmp(&a.1));
    let candidates = SPLIT_CANDIDATES.min(width).max(1);
    let dimension = variance[rng.gen_range(0..candidates)].0;
    let value = mean[dimension];

    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| data.row(i)[dimension] < value);
    if left.is_empty() || right.is_empty() {
        // identical values along the split, nothing to separate
        let mut all = left;
        all.extend(right);
        nodes.push(Node::Leaf(all));
        return id;
    }

    nodes.push(Node::Leaf(Vec::new()));
    let left = build_node(data, left, nodes, rng);
    let right = build_node(data, right, nodes, rng);
    nodes[id] = Node::Split {
        dimension,
        value,
        left,
        right,
    };
    id
}

/// Unexplored subtree, ordered so the heap pops the closest bound first
struct Branch {
    bound: f32,
    tree: usize,
    node: usize,
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Branch {}

impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Branch {
    fn cmp(&self, other: &Self) -> Ordering {
        other.bound.total_cmp(&self.bound)
    }
}

pub struct LshParams {
    pub tables: usize,
    pub key_bits: usize,
    /// neighbouring buckets probed differ from the query key in this many bits
    pub probe_level: usize,
}

impl Default for LshParams {
    fn default() -> Self {
        Self {
            tables: 12,
            key_bits: 20,
            probe_level: 1,
        }
    }
}

struct LshTable {
    /// descriptor bit positions making up the key
    bits: Vec<usize>,
    buckets: HashMap<u32, Vec<usize>>,
}

impl LshTable {
    fn key(&self, descriptor: &[u8]) -> u32 {
        self.bits.iter().enumerate().fold(0, |key, (i, &bit)| {
            let set = descriptor[bit / 8] & (0x80 >> (bit % 8)) != 0;
            key | ((set as u32) << i)
        })
    }
}

/// Hash tables over random bit subsets of binary descriptors.
pub struct LshIndex<'a> {
    data: &'a DescriptorTable<u8>,
    tables: Vec<LshTable>,
    probe_level: usize,
}

impl<'a> LshIndex<'a> {
    pub fn new(data: &'a DescriptorTable<u8>, params: &LshParams) -> Self {
        let mut rng = StdRng::seed_from_u64(RANDOM_SEED);
        let total_bits = data.width() * 8;
        let key_bits = params.key_bits.min(total_bits).min(32);

        let tables = (0..params.tables)
            .map(|_| {
                let mut positions: Vec<usize> = (0..total_bits).collect();
                positions.shuffle(&mut rng);
                positions.truncate(key_bits);

                let mut table = LshTable {
                    bits: positions,
                    buckets: HashMap::new(),
                };
                for (index, row) in data.rows().enumerate() {
                    let key = table.key(row);
                    table.buckets.entry(key).or_default().push(index);
                }
                table
            })
            .collect();

        Self {
            data,
            tables,
            probe_level: params.probe_level,
        }
    }

    fn probes(&self, key: u32, key_bits: usize) -> Vec<u32> {
        let mut probes = vec![key];
        if self.probe_level >= 1 {
            probes.extend((0..key_bits).map(|bit| key ^ (1 << bit)));
        }
        if self.probe_level >= 2 {
            for a in 0..key_bits {
                for b in a + 1..key_bits {
                    probes.push(key ^ (1 << a) ^ (1 << b));
                }
            }
        }
        probes
    }

    /// Up to `k` neighbours among the descriptors sharing a probed bucket, closest first.
    pub fn search(&self, query: &[u8], k: usize) -> Vec<Candidate> {
        let mut visited = vec![false; self.data.len()];
        let mut results = Vec::new();

        for table in &self.tables {
            for probe in self.probes(table.key(query), table.bits.len()) {
                let Some(bucket) = table.buckets.get(&probe) else {
                    continue;
                };
                for &index in bucket {
                    if !std::mem::replace(&mut visited[index], true) {
                        results.push(Candidate {
                            train_idx: index,
                            distance: hamming(query, self.data.row(index)) as f32,
                        });
                    }
                }
            }
        }

        sort_and_truncate(results, k)
    }
}

fn sort_and_truncate(mut candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.train_idx.cmp(&b.train_idx))
    });
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_table(rows: &[Vec<f32>]) -> DescriptorTable<f32> {
        let mut table = DescriptorTable::new(rows[0].len());
        rows.iter().for_each(|row| table.push(row));
        table
    }

    fn grid_points() -> Vec<Vec<f32>> {
        (0..20)
            .flat_map(|x| (0..20).map(move |y| vec![x as f32, y as f32, (x * y) as f32 * 0.1]))
            .collect()
    }

    #[test]
    fn kd_forest_finds_exact_neighbours_on_small_sets() {
        let points = grid_points();
        let table = float_table(&points);
        let forest = KdForest::new(
            &table,
            &KdForestParams {
                trees: 4,
                checks: usize::MAX,
            },
        );

        let query = [7.2, 11.9, 8.6];
        let found = forest.search(&query, 2);
        let mut exact: Vec<(usize, f32)> = table
            .rows()
            .enumerate()
            .map(|(i, row)| (i, euclidean(&query, row)))
            .collect();
        exact.sort_by(|a, b| a.1.total_cmp(&b.1));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].train_idx, exact[0].0);
        assert!((found[1].distance - exact[1].1).abs() < 1e-5);
    }

    #[test]
    fn kd_forest_with_default_checks_finds_identical_point() {
        let points = grid_points();
        let table = float_table(&points);
        let forest = KdForest::new(&table, &KdForestParams::default());
        for index in [0, 57, 211, 399] {
            let found = forest.search(table.row(index), 1);
            assert_eq!(found[0].train_idx, index);
            assert_eq!(found[0].distance, 0.0);
        }
    }

    #[test]
    fn lsh_finds_identical_and_near_descriptors() {
        let mut table = DescriptorTable::new(32);
        for i in 0..64u32 {
            let row: Vec<u8> = (0..32u32).map(|b| (i.wrapping_mul(2654435761).rotate_left(b) >> 3) as u8).collect();
            table.push(&row);
        }
        let index = LshIndex::new(&table, &LshParams::default());

        let mut query = table.row(10).to_vec();
        query[5] ^= 0b0000_0100;
        let found = index.search(&query, 2);
        assert_eq!(found[0].train_idx, 10);
        assert_eq!(found[0].distance, 1.0);
    }

    #[test]
    fn empty_indices_return_nothing() {
        let floats = DescriptorTable::<f32>::new(128);
        assert!(KdForest::new(&floats, &KdForestParams::default())
            .search(&[0.0; 128], 2)
            .is_empty());

        let bits = DescriptorTable::<u8>::new(32);
        assert!(LshIndex::new(&bits, &LshParams::default())
            .search(&[0; 32], 2)
            .is_empty());
    }
}
