// src/metrics.rs

//! Unsupervised clustering accuracy.

use crate::error::{Error, Result};

/// Accuracy of `pred` against `truth` under the best one-to-one relabelling
/// of cluster ids, with the `D × D` co-occurrence matrix it was computed on.
pub fn cluster_acc(pred: &[usize], truth: &[usize]) -> Result<(f64, Vec<Vec<i64>>)> {
    if pred.len() != truth.len() {
        return Err(Error::Precondition(format!(
            "{} predictions for {} labels",
            pred.len(),
            truth.len()
        )));
    }
    if pred.is_empty() {
        return Err(Error::Precondition("cannot score an empty clustering".to_string()));
    }

    let d = pred.iter().chain(truth).copied().max().unwrap_or(0) + 1;
    let mut w = vec![vec![0i64; d]; d];
    for (&p, &t) in pred.iter().zip(truth) {
        w[p][t] += 1;
    }

    let peak = w.iter().flatten().copied().max().unwrap_or(0);
    let cost: Vec<Vec<i64>> = w.iter().map(|row| row.iter().map(|&c| peak - c).collect()).collect();
    let matched: i64 = min_cost_assignment(&cost)
        .into_iter()
        .enumerate()
        .map(|(row, col)| w[row][col])
        .sum();

    Ok((matched as f64 / pred.len() as f64, w))
}

/// Hungarian algorithm on a square cost matrix; returns the column of each row.
fn min_cost_assignment(cost: &[Vec<i64>]) -> Vec<usize> {
    let n = cost.len();
    // 1-based potentials; p[j] is the row matched to column j, 0 = none
    let mut u = vec![0i64; n + 1];
    let mut v = vec![0i64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0;
        let mut minv = vec![i64::MAX; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = i64::MAX;
            let mut j1 = 0;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let reduced = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if reduced < minv[j] {
                    minv[j] = reduced;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0; n];
    for j in 1..=n {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}
