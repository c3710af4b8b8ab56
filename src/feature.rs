use std::collections::{BTreeMap, HashSet};

use crate::error::{EstimatorError, Result};
use crate::my_types::*;
use crate::state::DX_FEATURE_LEN;

/// Bookkeeping for one landmark, in camera frame numbers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureTrack {
    pub id: FeatureId,
    pub first_seen: usize,
    pub last_seen: usize,
}

impl FeatureTrack {
    pub fn new(id: FeatureId, frame_number: usize) -> Self {
        FeatureTrack {
            id,
            first_seen: frame_number,
            last_seen: frame_number,
        }
    }
}

/// When a landmark leaves the state. Every criterion is optional.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovalPolicy {
    /// Frames since initialization
    pub max_age: Option<usize>,
    /// Completed frames without an observation
    pub max_missed: Option<usize>,
    /// Drop landmarks whose estimate projects outside the image
    pub drop_out_of_view: bool,
    /// Whether a removed id may be initialized again later
    pub allow_id_reuse: bool,
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        Self {
            max_age: None,
            max_missed: None,
            drop_out_of_view: false,
            allow_id_reuse: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    MaxAge,
    Missed,
    OutOfView,
}

impl RemovalPolicy {
    pub fn check(
        &self,
        track: &FeatureTrack,
        frame_number: usize,
        in_view: bool,
    ) -> Option<RemovalReason> {
        let missed = frame_number.saturating_sub(track.last_seen);
        let age = frame_number.saturating_sub(track.first_seen);
        if self.max_missed.map_or(false, |max| missed > max) {
            return Some(RemovalReason::Missed);
        }
        if self.max_age.map_or(false, |max| age > max) {
            return Some(RemovalReason::MaxAge);
        }
        if self.drop_out_of_view && !in_view {
            return Some(RemovalReason::OutOfView);
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct FeatureManager {
    pub policy: RemovalPolicy,
    tracks: BTreeMap<FeatureId, FeatureTrack>,
    retired: HashSet<FeatureId>,
    frame_number: usize,
}

impl FeatureManager {
    pub fn new(policy: RemovalPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn frame_number(&self) -> usize {
        self.frame_number
    }

    pub fn begin_frame(&mut self) -> usize {
        self.frame_number += 1;
        self.frame_number
    }

    pub fn track(&self, id: FeatureId) -> Option<&FeatureTrack> {
        self.tracks.get(&id)
    }

    /// Refuse ids that are live, or retired when reuse is off.
    pub fn check_new(&self, id: FeatureId) -> Result<()> {
        if self.tracks.contains_key(&id) {
            return Err(EstimatorError::DuplicateFeatureId(id));
        }
        if !self.policy.allow_id_reuse && self.retired.contains(&id) {
            return Err(EstimatorError::DuplicateFeatureId(id));
        }
        Ok(())
    }

    pub fn on_insert(&mut self, id: FeatureId) {
        self.retired.remove(&id);
        self.tracks.insert(id, FeatureTrack::new(id, self.frame_number));
    }

    pub fn on_remove(&mut self, id: FeatureId) {
        if self.tracks.remove(&id).is_some() {
            self.retired.insert(id);
        }
    }

    pub fn observe(&mut self, id: FeatureId) {
        if let Some(track) = self.tracks.get_mut(&id) {
            track.last_seen = self.frame_number;
        }
    }

    /// Landmarks the policy wants gone after the current frame.
    pub fn expired<F>(&self, in_view: F) -> Vec<(FeatureId, RemovalReason)>
    where
        F: Fn(FeatureId) -> bool,
    {
        self.tracks
            .values()
            .filter_map(|track| {
                self.policy
                    .check(track, self.frame_number, in_view(track.id))
                    .map(|reason| (track.id, reason))
            })
            .collect()
    }
}

/// Covariance grown by one landmark block appended at the end. The new
/// block is diagonal with `prior` and uncorrelated with everything else.
pub fn insert_feature_block(covariance: &Matrixd, prior: &Vector3d) -> Matrixd {
    let n = covariance.nrows();
    let mut p = covariance
        .clone()
        .insert_rows(n, DX_FEATURE_LEN, 0.)
        .insert_columns(n, DX_FEATURE_LEN, 0.);
    p.fixed_view_mut::<3, 3>(n, n)
        .copy_from(&Matrix3d::from_diagonal(prior));
    p
}

/// Covariance with the landmark block starting at `start` removed; every
/// other entry is kept as is.
pub fn remove_feature_block(covariance: &Matrixd, start: usize) -> Result<Matrixd> {
    let n = covariance.nrows();
    if start + DX_FEATURE_LEN > n {
        return Err(EstimatorError::dimension(
            "covariance block removal",
            start + DX_FEATURE_LEN,
            n,
        ));
    }
    Ok(covariance
        .clone()
        .remove_rows(start, DX_FEATURE_LEN)
        .remove_columns(start, DX_FEATURE_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy() {
        let policy = RemovalPolicy {
            max_age: Some(10),
            max_missed: Some(2),
            drop_out_of_view: true,
            allow_id_reuse: true,
        };
        let track = FeatureTrack {
            id: 1,
            first_seen: 5,
            last_seen: 8,
        };
        assert_eq!(policy.check(&track, 10, true), None);
        assert_eq!(policy.check(&track, 11, true), Some(RemovalReason::Missed));
        assert_eq!(policy.check(&track, 10, false), Some(RemovalReason::OutOfView));
        let fresh = FeatureTrack {
            id: 2,
            first_seen: 0,
            last_seen: 11,
        };
        assert_eq!(policy.check(&fresh, 11, true), Some(RemovalReason::MaxAge));
        assert_eq!(RemovalPolicy::default().check(&fresh, 1000, false), None);
    }

    #[test]
    fn test_manager_lifecycle() {
        let mut manager = FeatureManager::new(RemovalPolicy {
            max_missed: Some(1),
            ..Default::default()
        });
        manager.begin_frame();
        manager.on_insert(3);
        manager.on_insert(4);
        assert_eq!(manager.check_new(3), Err(EstimatorError::DuplicateFeatureId(3)));
        manager.begin_frame();
        manager.observe(3);
        manager.begin_frame();
        assert_eq!(manager.expired(|_| true), vec![(4, RemovalReason::Missed)]);

        manager.on_remove(4);
        assert!(manager.track(4).is_none());
        assert!(manager.check_new(4).is_ok());
        manager.policy.allow_id_reuse = false;
        assert_eq!(manager.check_new(4), Err(EstimatorError::DuplicateFeatureId(4)));
    }

    #[test]
    fn test_insert_and_remove_block() {
        let p = Matrixd::from_fn(5, 5, |i, j| (i * 5 + j) as f64);
        let prior = Vector3d::new(0.1, 0.2, 0.3);
        let grown = insert_feature_block(&p, &prior);
        assert_eq!(grown.shape(), (8, 8));
        assert_eq!(grown.view((0, 0), (5, 5)), p.view((0, 0), (5, 5)));
        assert_eq!(grown[(6, 6)], 0.2);
        assert_eq!(grown[(5, 6)], 0.);
        assert_eq!(grown[(2, 7)], 0.);

        let shrunk = remove_feature_block(&grown, 5).unwrap();
        assert_eq!(shrunk, p);

        let middle = remove_feature_block(&p, 1).unwrap();
        assert_eq!(middle.shape(), (2, 2));
        assert_eq!(middle[(0, 0)], 0.);
        assert_eq!(middle[(1, 1)], 24.);
        assert_eq!(middle[(0, 1)], 4.);

        assert!(remove_feature_block(&p, 3).is_err());
    }
}
