//! Episode merging
//!
//! Flagged frames are merged into episodes under a bounded-gap rule: a frame
//! joins the open episode when its distance to the episode's most recent
//! member lies within `[min_gap, max_gap]`. Closer frames (duplicates) and
//! farther frames open a new episode.

use crate::config::EpisodeConfig;
use crate::types::Episode;
use std::collections::HashMap;

/// Slack applied to gap comparisons to absorb timestamp rounding
const GAP_TOLERANCE: f64 = 1e-9;

/// Bounded-gap merger of anomalous timestamps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeMerger {
    pub min_gap: f64,
    pub max_gap: f64,
}

impl Default for EpisodeMerger {
    fn default() -> Self {
        Self::from(EpisodeConfig::default())
    }
}

impl From<EpisodeConfig> for EpisodeMerger {
    fn from(config: EpisodeConfig) -> Self {
        Self {
            min_gap: config.min_gap,
            max_gap: config.max_gap,
        }
    }
}

impl EpisodeMerger {
    pub fn new(min_gap: f64, max_gap: f64) -> Self {
        Self { min_gap, max_gap }
    }

    fn joins(&self, anchor: f64, t: f64) -> bool {
        let gap = t - anchor;
        gap >= self.min_gap - GAP_TOLERANCE && gap <= self.max_gap + GAP_TOLERANCE
    }

    /// Group ascending timestamps into episodes
    pub fn merge(&self, timestamps: &[f64]) -> Vec<Vec<f64>> {
        let members: Vec<(usize, f64)> = timestamps.iter().copied().enumerate().collect();
        self.group(&members)
            .into_iter()
            .map(|group| group.into_iter().map(|(_, t)| t).collect())
            .collect()
    }

    /// Group `(frame index, time)` pairs into numbered episodes
    ///
    /// Episode ids start at `first_id` and increase with start time.
    pub fn episodes(&self, members: &[(usize, f64)], first_id: usize) -> Vec<Episode> {
        self.group(members)
            .iter()
            .enumerate()
            .map(|(offset, group)| Episode::new(first_id + offset, group))
            .collect()
    }

    /// Merge each run separately so no episode spans a run boundary
    ///
    /// `runs` holds the members of each run; ids are numbered across runs.
    pub fn episodes_per_run(&self, runs: &[Vec<(usize, f64)>]) -> Vec<Episode> {
        let mut episodes = Vec::new();
        for run in runs {
            let next = self.episodes(run, episodes.len());
            episodes.extend(next);
        }
        episodes
    }

    fn group(&self, members: &[(usize, f64)]) -> Vec<Vec<(usize, f64)>> {
        let mut groups: Vec<Vec<(usize, f64)>> = Vec::new();
        let mut current: Vec<(usize, f64)> = Vec::new();
        let mut anchor = f64::NEG_INFINITY;

        for &(frame, t) in members {
            if !current.is_empty() && !self.joins(anchor, t) {
                groups.push(std::mem::take(&mut current));
            }
            current.push((frame, t));
            anchor = t;
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }
}

/// Frame index to episode lookup
#[derive(Debug, Clone, Default)]
pub struct EpisodeIndex {
    by_frame: HashMap<usize, usize>,
}

impl EpisodeIndex {
    pub fn new(episodes: &[Episode]) -> Self {
        let by_frame = episodes
            .iter()
            .enumerate()
            .flat_map(|(position, episode)| episode.frames.iter().map(move |f| (*f, position)))
            .collect();
        Self { by_frame }
    }

    /// Position in the indexed episode slice of the episode holding `frame`
    pub fn position(&self, frame: usize) -> Option<usize> {
        self.by_frame.get(&frame).copied()
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.by_frame.contains_key(&frame)
    }

    pub fn len(&self) -> usize {
        self.by_frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_frame.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge_examples() {
        let merger = EpisodeMerger::default();
        assert_eq!(
            merger.merge(&[10.0, 10.5, 11.0, 20.0]),
            vec![vec![10.0, 10.5, 11.0], vec![20.0]]
        );
        assert_eq!(merger.merge(&[5.0]), vec![vec![5.0]]);
        assert!(merger.merge(&[]).is_empty());
    }

    #[test]
    fn test_anchor_advances() {
        // each step is within max_gap of the previous member, not the first
        let merger = EpisodeMerger::default();
        let groups = merger.merge(&[0.0, 2.0, 4.0, 6.0]);
        assert_eq!(groups, vec![vec![0.0, 2.0, 4.0, 6.0]]);
    }

    #[test]
    fn test_gap_bounds() {
        let merger = EpisodeMerger::default();
        // just beyond max_gap
        assert_eq!(merger.merge(&[1.0, 3.1]).len(), 2);
        // below min_gap
        let merger = EpisodeMerger::new(1.0, 2.0);
        assert_eq!(merger.merge(&[1.0, 1.5]).len(), 2);
        // rounding noise at the boundary still merges
        assert_eq!(merger.merge(&[0.1, 0.1 + 2.0 + 1e-12]).len(), 1);
    }

    #[test]
    fn test_every_timestamp_lands_in_one_group() {
        let times = [0.0, 0.5, 3.0, 3.5, 4.0, 9.0, 12.5, 13.0];
        let groups = EpisodeMerger::default().merge(&times);
        let flattened: Vec<f64> = groups.into_iter().flatten().collect();
        assert_eq!(flattened, times.to_vec());
    }

    #[test]
    fn test_episodes_are_numbered() {
        let members = [(20, 10.0), (21, 10.5), (22, 11.0), (40, 20.0)];
        let episodes = EpisodeMerger::default().episodes(&members, 0);
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].id, 0);
        assert_eq!(episodes[0].frames, vec![20, 21, 22]);
        assert!(episodes[0].is_sustained());
        assert_eq!(episodes[1].id, 1);
        assert!(!episodes[1].is_sustained());
    }

    #[test]
    fn test_runs_do_not_merge_across_boundaries() {
        let runs = vec![vec![(5, 2.5), (6, 3.0)], vec![(8, 4.0), (9, 4.5)]];
        let episodes = EpisodeMerger::default().episodes_per_run(&runs);
        // 3.0 -> 4.0 would merge in a single pass
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[1].id, 1);
        assert_eq!(episodes[1].frames, vec![8, 9]);
    }

    #[test]
    fn test_episode_index() {
        let members = [(1, 0.5), (2, 1.0), (10, 5.0)];
        let episodes = EpisodeMerger::default().episodes(&members, 0);
        let index = EpisodeIndex::new(&episodes);
        assert_eq!(index.position(2), Some(0));
        assert_eq!(index.position(10), Some(1));
        assert_eq!(index.position(3), None);
        assert!(index.contains(1));
        assert_eq!(index.len(), 3);
    }
}
