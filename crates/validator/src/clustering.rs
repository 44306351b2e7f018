use rand::seq::{index, SliceRandom};
use rand::Rng;
use shared::models::network::{Group, Uid};
use std::collections::HashSet;
use std::net::IpAddr;

const MAX_KMEANS_ITERATIONS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibleWorker {
    pub uid: Uid,
    pub ip: IpAddr,
}

/// Orderable integer form of an address. IPv4 addresses map to their
/// big-endian 32-bit value.
pub fn address_key(ip: &IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(*v4) as u128,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

/// Partitions workers into groups of `group_size`, keeping workers with
/// numerically close addresses together.
///
/// Workers sharing an address are collapsed to the first one seen. Every
/// surviving worker ends up in exactly one group; at most one group is
/// smaller than `group_size`. The group order is shuffled.
pub fn cluster_workers<R: Rng + ?Sized>(
    workers: &[EligibleWorker],
    group_size: usize,
    rng: &mut R,
) -> Vec<Group> {
    let mut seen = HashSet::new();
    let unique: Vec<EligibleWorker> = workers
        .iter()
        .filter(|w| seen.insert(w.ip))
        .copied()
        .collect();

    if unique.is_empty() {
        return Vec::new();
    }
    let cluster_count = unique.len() / group_size;
    if cluster_count == 0 {
        return vec![unique.iter().map(|w| w.uid).collect()];
    }

    let keys: Vec<f64> = unique.iter().map(|w| address_key(&w.ip) as f64).collect();
    let labels = kmeans_1d(&keys, cluster_count, rng);

    // clusters in order of first appearance
    let mut clusters: Vec<(usize, Vec<Uid>)> = Vec::new();
    for (worker, label) in unique.iter().zip(labels) {
        match clusters.iter_mut().find(|(l, _)| *l == label) {
            Some((_, members)) => members.push(worker.uid),
            None => clusters.push((label, vec![worker.uid])),
        }
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut leftovers: Vec<Uid> = Vec::new();
    for (_, members) in clusters {
        for chunk in members.chunks(group_size) {
            if chunk.len() == group_size {
                groups.push(chunk.to_vec());
            } else {
                leftovers.extend_from_slice(chunk);
            }
        }
    }
    groups.extend(leftovers.chunks(group_size).map(<[Uid]>::to_vec));

    groups.shuffle(rng);
    groups
}

/// Lloyd's algorithm on one dimension. Returns a cluster label per key.
fn kmeans_1d<R: Rng + ?Sized>(keys: &[f64], k: usize, rng: &mut R) -> Vec<usize> {
    let mut centroids: Vec<f64> = index::sample(rng, keys.len(), k)
        .into_iter()
        .map(|i| keys[i])
        .collect();
    let mut labels = vec![usize::MAX; keys.len()];

    for _ in 0..MAX_KMEANS_ITERATIONS {
        let mut changed = false;
        for (label, key) in labels.iter_mut().zip(keys) {
            let nearest = nearest_centroid(&centroids, *key);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (label, key) in labels.iter().zip(keys) {
            sums[*label] += key;
            counts[*label] += 1;
        }
        for (centroid, (sum, count)) in centroids.iter_mut().zip(sums.into_iter().zip(counts)) {
            // an empty cluster keeps its previous centroid
            if count > 0 {
                *centroid = sum / count as f64;
            }
        }
    }
    labels
}

fn nearest_centroid(centroids: &[f64], key: f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = (key - centroid).abs();
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}
