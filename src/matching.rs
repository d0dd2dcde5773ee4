//! Descriptor matching between the previous (train) and the current (query) frame.

use space::{Knn, KnnFromBatch, LinearKnn, Metric};

use crate::{
    config::{MatcherKind, SelectorKind},
    error::{Error, Result},
    flann::{KdForest, KdForestParams, LshIndex, LshParams},
    frame::{DescriptorMatch, DescriptorTable, Descriptors},
};

/// A best match is kept only when it is clearly closer than the second best.
pub const LOWE_RATIO: f32 = 0.8;

/// A train descriptor found for a query descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub train_idx: usize,
    pub distance: f32,
}

/// Number of differing bits
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

// Implementations for `space`

#[derive(Default)]
struct HammingMetric;

impl<'d> Metric<&'d [u8]> for HammingMetric {
    type Unit = u32;
    fn distance(&self, a: &&'d [u8], b: &&'d [u8]) -> Self::Unit {
        hamming(a, b)
    }
}

#[derive(Default)]
struct EuclideanMetric;

impl<'d> Metric<&'d [f32]> for EuclideanMetric {
    type Unit = u32;
    fn distance(&self, a: &&'d [f32], b: &&'d [f32]) -> Self::Unit {
        // non-negative floats order the same as their bit patterns
        euclidean(a, b).to_bits()
    }
}

/// Exhaustive k nearest neighbour search of every query row among the train rows.
fn brute_force<'d, T, M>(
    query: &'d DescriptorTable<T>,
    train: &'d DescriptorTable<T>,
    k: usize,
    to_distance: fn(u32) -> f32,
) -> Vec<Vec<Candidate>>
where
    T: Copy,
    M: Metric<&'d [T], Unit = u32> + Default,
{
    let data = train
        .rows()
        .enumerate()
        .map(|(i, row)| (row, i))
        .collect::<Vec<_>>();
    let search: LinearKnn<M, _> = KnnFromBatch::from_batch(data.iter());

    query
        .rows()
        .map(|row| {
            search
                .knn(&row, k)
                .into_iter()
                .map(|(neighbor, _, &train_idx)| Candidate {
                    train_idx,
                    distance: to_distance(neighbor.distance),
                })
                .collect()
        })
        .collect()
}

fn candidates(
    train: &Descriptors,
    query: &Descriptors,
    matcher: MatcherKind,
    k: usize,
) -> Result<Vec<Vec<Candidate>>> {
    let candidates = match (train, query, matcher) {
        (Descriptors::Binary(train), Descriptors::Binary(query), MatcherKind::BruteForce) => {
            brute_force::<_, HammingMetric>(query, train, k, |d| d as f32)
        }
        (Descriptors::Float(train), Descriptors::Float(query), MatcherKind::BruteForce) => {
            brute_force::<_, EuclideanMetric>(query, train, k, f32::from_bits)
        }
        (Descriptors::Binary(train), Descriptors::Binary(query), MatcherKind::Flann) => {
            let index = LshIndex::new(train, &LshParams::default());
            query.rows().map(|row| index.search(row, k)).collect()
        }
        (Descriptors::Float(train), Descriptors::Float(query), MatcherKind::Flann) => {
            let index = KdForest::new(train, &KdForestParams::default());
            query.rows().map(|row| index.search(row, k)).collect()
        }
        _ => {
            return Err(Error::DescriptorMismatch {
                previous: train.kind_name(),
                current: query.kind_name(),
            })
        }
    };
    Ok(candidates)
}

/// Lowe's ratio test: `best / second < LOWE_RATIO`, rejecting a zero second distance.
pub fn ratio_test(best: f32, second: f32) -> bool {
    second > 0.0 && best / second < LOWE_RATIO
}

/// Match the current frame's descriptors (query) against the previous frame's (train).
pub fn match_descriptors(
    previous: &Descriptors,
    current: &Descriptors,
    matcher: MatcherKind,
    selector: SelectorKind,
) -> Result<Vec<DescriptorMatch>> {
    if previous.is_empty() || current.is_empty() {
        return Ok(Vec::new());
    }

    let k = match selector {
        SelectorKind::NearestNeighbor => 1,
        SelectorKind::KNearestNeighbor => 2,
    };

    let matches = candidates(previous, current, matcher, k)?
        .into_iter()
        .enumerate()
        .filter_map(|(query_idx, nearest)| {
            let best = nearest.first()?;
            let keep = match selector {
                SelectorKind::NearestNeighbor => true,
                // fewer than two candidates cannot pass the ratio test
                SelectorKind::KNearestNeighbor => nearest
                    .get(1)
                    .map_or(false, |second| ratio_test(best.distance, second.distance)),
            };
            keep.then_some(DescriptorMatch {
                query_idx,
                train_idx: best.train_idx,
                distance: best.distance,
            })
        })
        .collect();

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(rows: &[[u8; 2]]) -> Descriptors {
        let mut table = DescriptorTable::new(2);
        rows.iter().for_each(|row| table.push(row));
        Descriptors::Binary(table)
    }

    fn float(rows: &[[f32; 2]]) -> Descriptors {
        let mut table = DescriptorTable::new(2);
        rows.iter().for_each(|row| table.push(row));
        Descriptors::Float(table)
    }

    #[test]
    fn ratio_boundary() {
        assert!(!ratio_test(8.0, 10.0));
        assert!(ratio_test(7.9, 10.0));
        assert!(!ratio_test(0.0, 0.0));
        assert!(ratio_test(0.0, 1.0));
    }

    #[test]
    fn distances() {
        assert_eq!(hamming(&[0b1010_1010, 0xff], &[0b0101_0101, 0xff]), 8);
        assert_eq!(euclidean(&[0.0, 3.0], &[4.0, 0.0]), 5.0);
    }

    #[test]
    fn nearest_neighbour_matches_every_query() {
        let previous = binary(&[[0x00, 0x00], [0xff, 0xff], [0x0f, 0x0f]]);
        let current = binary(&[[0xff, 0xfe], [0x0f, 0x0f]]);
        let matches = match_descriptors(
            &previous,
            &current,
            MatcherKind::BruteForce,
            SelectorKind::NearestNeighbor,
        )
        .unwrap();

        assert_eq!(
            matches,
            vec![
                DescriptorMatch {
                    query_idx: 0,
                    train_idx: 1,
                    distance: 1.0
                },
                DescriptorMatch {
                    query_idx: 1,
                    train_idx: 2,
                    distance: 0.0
                },
            ]
        );
    }

    #[test]
    fn knn_rejects_ambiguous_matches() {
        // query 0: 8 vs 10 bits away, ratio 0.8 is rejected
        // query 1: 0 vs 6 bits away, accepted
        let previous = binary(&[[0x00, 0x00], [0x00, 0x03], [0x00, 0xff]]);
        let current = binary(&[[0xff, 0x00], [0x00, 0xff]]);
        let matches = match_descriptors(
            &previous,
            &current,
            MatcherKind::BruteForce,
            SelectorKind::KNearestNeighbor,
        )
        .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].query_idx, matches[0].train_idx), (1, 2));
    }

    #[test]
    fn knn_needs_two_candidates() {
        let previous = float(&[[1.0, 1.0]]);
        let current = float(&[[1.0, 1.2]]);
        for matcher in [MatcherKind::BruteForce, MatcherKind::Flann] {
            let matches =
                match_descriptors(&previous, &current, matcher, SelectorKind::KNearestNeighbor).unwrap();
            assert!(matches.is_empty());
            let matches =
                match_descriptors(&previous, &current, matcher, SelectorKind::NearestNeighbor).unwrap();
            assert_eq!(matches.len(), 1);
            assert!((matches[0].distance - 0.2).abs() < 1e-6);
        }
    }

    #[test]
    fn flann_agrees_with_brute_force_on_clear_matches() {
        let previous = float(&[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0], [5.0, 5.0]]);
        let current = float(&[[9.5, 0.2], [0.1, 9.8], [5.1, 5.0]]);
        let brute = match_descriptors(&previous, &current, MatcherKind::BruteForce, SelectorKind::KNearestNeighbor).unwrap();
        let flann = match_descriptors(&previous, &current, MatcherKind::Flann, SelectorKind::KNearestNeighbor).unwrap();
        assert_eq!(brute.len(), 3);
        assert_eq!(brute, flann);
    }

    #[test]
    fn empty_tables_give_no_matches() {
        let empty = Descriptors::Binary(DescriptorTable::new(2));
        let full = binary(&[[1, 2]]);
        for (previous, current) in [(&empty, &full), (&full, &empty)] {
            let matches = match_descriptors(previous, current, MatcherKind::Flann, SelectorKind::NearestNeighbor).unwrap();
            assert!(matches.is_empty());
        }
    }

    #[test]
    fn mixed_descriptor_kinds_are_an_error() {
        let result = match_descriptors(
            &binary(&[[1, 2]]),
            &float(&[[1.0, 2.0]]),
            MatcherKind::BruteForce,
            SelectorKind::NearestNeighbor,
        );
        assert!(matches!(result, Err(Error::DescriptorMismatch { .. })));
    }
}
