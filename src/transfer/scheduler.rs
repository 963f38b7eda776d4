use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{ClientHandle, PeerIdentity, PeerRef, ResourceDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    Pending,
    /// Exactly one transfer attempt is in flight for the part.
    Locked,
    Done,
}

struct Candidate {
    peer: PeerRef,
    handle: Arc<dyn ClientHandle>,
    busy: bool,
}

/// Last thing that happened to a part, for the download queue view.
#[derive(Debug, Clone)]
struct PartLabel {
    peer: Option<String>,
    status: &'static str,
}

/// A part handed to a peer by [`DownloadRun::assign_next`].
#[derive(Clone)]
pub struct Assignment {
    pub part: u32,
    pub peer: PeerRef,
    pub handle: Arc<dyn ClientHandle>,
}

/// State of one resource download.
///
/// Parts and peers are always picked by lowest index, so a fixed candidate
/// order gives a reproducible schedule. Locking a part, marking its peer busy
/// and counting the attempt happen in one call, which keeps
/// `locked parts == busy peers == active` between calls.
pub struct DownloadRun {
    resource: ResourceDescriptor,
    parts: Vec<PartState>,
    labels: Vec<PartLabel>,
    candidates: Vec<Candidate>,
    evicted: Vec<PeerRef>,
    active: usize,
    limit: usize,
    peak_active: usize,
}

impl DownloadRun {
    /// Candidates reported twice (same endpoint) are kept once, first wins.
    pub fn new(
        resource: ResourceDescriptor,
        candidates: Vec<(PeerRef, Arc<dyn ClientHandle>)>,
        capacity: usize,
    ) -> Self {
        let mut seen = HashSet::new();
        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .filter(|(peer, _)| seen.insert(peer.identity()))
            .map(|(peer, handle)| Candidate {
                peer,
                handle,
                busy: false,
            })
            .collect();

        let total = resource.total_parts as usize;
        let limit = candidates.len().min(capacity).min(total);

        Self {
            parts: vec![PartState::Pending; total],
            labels: vec![
                PartLabel {
                    peer: None,
                    status: "pending",
                };
                total
            ],
            resource,
            candidates,
            evicted: Vec::new(),
            active: 0,
            limit,
            peak_active: 0,
        }
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.resource
    }

    /// `min(candidates, capacity, parts)` as computed when the run started.
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active
    }

    pub fn done_count(&self) -> usize {
        self.count(PartState::Done)
    }

    pub fn total_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn part_states(&self) -> &[PartState] {
        &self.parts
    }

    pub fn evicted(&self) -> &[PeerRef] {
        &self.evicted
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(|p| *p == PartState::Done)
    }

    /// No peer left to ask while parts are still missing.
    pub fn is_exhausted(&self) -> bool {
        self.candidates.is_empty() && !self.is_complete()
    }

    pub fn should_continue(&self) -> bool {
        !self.is_complete() && !self.candidates.is_empty()
    }

    /// Locks the first pending part to the first free peer, if the
    /// concurrency limit allows another attempt and both exist.
    pub fn assign_next(&mut self) -> Option<Assignment> {
        if self.active >= self.limit {
            return None;
        }
        let part = self.parts.iter().position(|p| *p == PartState::Pending)?;
        let candidate = self.candidates.iter_mut().find(|c| !c.busy)?;

        candidate.busy = true;
        self.parts[part] = PartState::Locked;
        self.labels[part] = PartLabel {
            peer: Some(candidate.peer.name.clone()),
            status: "in progress",
        };
        self.active += 1;
        self.peak_active = self.peak_active.max(self.active);

        debug!(
            "Assigned {} part {} to {} ({} active)",
            self.resource.name, part, candidate.peer, self.active
        );
        Some(Assignment {
            part: part as u32,
            peer: candidate.peer.clone(),
            handle: candidate.handle.clone(),
        })
    }

    /// Records a successful attempt: the part is done and the peer free again.
    pub fn complete_part(&mut self, part: u32, peer: &PeerIdentity) -> bool {
        if !self.release(part, PartState::Done) {
            return false;
        }
        if let Some(candidate) = self.candidates.iter_mut().find(|c| c.peer.identity() == *peer) {
            candidate.busy = false;
        }
        self.labels[part as usize].status = "completed";
        true
    }

    /// Records a failed attempt: the part goes back to pending and the peer
    /// is dropped for the rest of the run.
    pub fn fail_part(&mut self, part: u32, peer: &PeerIdentity) -> bool {
        if !self.release(part, PartState::Pending) {
            return false;
        }
        if let Some(pos) = self.candidates.iter().position(|c| c.peer.identity() == *peer) {
            let candidate = self.candidates.remove(pos);
            self.evicted.push(candidate.peer);
        }
        self.labels[part as usize].status = "failed";
        true
    }

    /// Part status lines, `"<name>:<part> <peer> [<status>]"`.
    pub fn queue_entries(&self) -> Vec<String> {
        self.labels
            .iter()
            .enumerate()
            .map(|(part, label)| match &label.peer {
                Some(peer) => format!(
                    "{}:{} {} [{}]",
                    self.resource.name, part, peer, label.status
                ),
                None => format!("{}:{} [{}]", self.resource.name, part, label.status),
            })
            .collect()
    }

    /// `locked == busy == active <= limit`, checked after every transition.
    pub fn invariants_hold(&self) -> bool {
        let locked = self.count(PartState::Locked);
        let busy = self.candidates.iter().filter(|c| c.busy).count();
        locked == self.active && busy == self.active && self.active <= self.limit
    }

    fn release(&mut self, part: u32, next: PartState) -> bool {
        match self.parts.get_mut(part as usize) {
            Some(state) if *state == PartState::Locked => {
                *state = next;
                self.active -= 1;
                true
            }
            _ => {
                debug!("Ignoring outcome for part {} that is not locked", part);
                false
            }
        }
    }

    fn count(&self, state: PartState) -> usize {
        self.parts.iter().filter(|p| **p == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_support::{MockClient, peer, resource};

    fn candidates(names: &[&str]) -> Vec<(PeerRef, Arc<dyn ClientHandle>)> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let handle: Arc<dyn ClientHandle> = Arc::new(MockClient::new(name, Vec::new()));
                (peer(name, 6000 + i as u16), handle)
            })
            .collect()
    }

    #[test]
    fn test_limit_is_min_of_peers_capacity_parts() {
        assert_eq!(DownloadRun::new(resource("m", 4), candidates(&["a", "b", "c"]), 2).limit(), 2);
        assert_eq!(DownloadRun::new(resource("m", 1), candidates(&["a", "b", "c"]), 5).limit(), 1);
        assert_eq!(DownloadRun::new(resource("m", 9), candidates(&["a"]), 5).limit(), 1);
        assert_eq!(DownloadRun::new(resource("m", 9), candidates(&["a"]), 0).limit(), 0);
        assert_eq!(DownloadRun::new(resource("m", 9), Vec::new(), 3).limit(), 0);
    }

    #[test]
    fn test_assignment_order_is_lowest_index() {
        let mut run = DownloadRun::new(resource("m", 4), candidates(&["a", "b", "c"]), 2);

        let first = run.assign_next().unwrap();
        let second = run.assign_next().unwrap();
        assert_eq!((first.part, first.peer.name.as_str()), (0, "a"));
        assert_eq!((second.part, second.peer.name.as_str()), (1, "b"));

        // Limit reached even though c is free.
        assert!(run.assign_next().is_none());
        assert!(run.invariants_hold());

        assert!(run.complete_part(0, &first.peer.identity()));
        let third = run.assign_next().unwrap();
        assert_eq!((third.part, third.peer.name.as_str()), (2, "a"));
        assert!(run.invariants_hold());
    }

    #[test]
    fn test_failure_requeues_part_and_evicts_peer() {
        let mut run = DownloadRun::new(resource("m", 2), candidates(&["a", "b"]), 2);
        let a = run.assign_next().unwrap();
        let b = run.assign_next().unwrap();

        assert!(run.fail_part(a.part, &a.peer.identity()));
        assert_eq!(run.part_states()[0], PartState::Pending);
        assert_eq!(run.candidate_count(), 1);
        assert_eq!(run.evicted(), &[a.peer.clone()]);
        assert!(run.invariants_hold());

        // Only b remains and it is busy, so nothing can be assigned yet.
        assert!(run.assign_next().is_none());
        assert!(run.complete_part(b.part, &b.peer.identity()));

        let retry = run.assign_next().unwrap();
        assert_eq!((retry.part, retry.peer.name.as_str()), (0, "b"));
        assert!(run.complete_part(retry.part, &retry.peer.identity()));
        assert!(run.is_complete());
        assert!(!run.should_continue());
    }

    #[test]
    fn test_exhaustion() {
        let mut run = DownloadRun::new(resource("m", 3), candidates(&["a"]), 1);
        let a = run.assign_next().unwrap();
        run.fail_part(a.part, &a.peer.identity());

        assert!(run.is_exhausted());
        assert!(!run.should_continue());
        assert_eq!(run.done_count(), 0);
    }

    #[test]
    fn test_outcome_for_unlocked_part_is_ignored() {
        let mut run = DownloadRun::new(resource("m", 2), candidates(&["a"]), 1);
        let a = run.assign_next().unwrap();
        assert!(!run.complete_part(1, &a.peer.identity()));
        assert!(!run.fail_part(7, &a.peer.identity()));
        assert_eq!(run.active(), 1);
        assert!(run.invariants_hold());
    }

    #[test]
    fn test_duplicate_candidates_kept_once() {
        let mut list = candidates(&["a", "b"]);
        let again: Arc<dyn ClientHandle> = Arc::new(MockClient::new("a", Vec::new()));
        list.push((PeerRef::new("a-alias", list[0].0.endpoint.clone()), again));

        let run = DownloadRun::new(resource("m", 5), list, 5);
        assert_eq!(run.candidate_count(), 2);
        assert_eq!(run.limit(), 2);
    }

    #[test]
    fn test_queue_entries() {
        let mut run = DownloadRun::new(resource("movie", 2), candidates(&["a"]), 1);
        let a = run.assign_next().unwrap();
        assert_eq!(run.queue_entries(), vec!["movie:0 a [in progress]", "movie:1 [pending]"]);

        run.fail_part(a.part, &a.peer.identity());
        assert_eq!(run.queue_entries()[0], "movie:0 a [failed]");
    }
}
