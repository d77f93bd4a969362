use std::collections::{BTreeSet, HashMap};

/// Many to many association between bunch ids and request ids.
///
/// A bunch may carry steps from several requests and a request may span several
/// bunches. A request is complete once no bunch is associated with it anymore.
#[derive(Debug, Default)]
pub struct BunchIndex {
    by_bunch: HashMap<u32, BTreeSet<u32>>,
    by_request: HashMap<u32, BTreeSet<u32>>,
}

impl BunchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `bunch` carries steps of `request`.
    pub fn associate(&mut self, bunch: u32, request: u32) {
        self.by_bunch.entry(bunch).or_default().insert(request);
        self.by_request.entry(request).or_default().insert(bunch);
    }

    /// Retires a finished bunch.
    ///
    /// # Returns
    /// The requests left with no associated bunch, in ascending order.
    pub fn retire(&mut self, bunch: u32) -> Vec<u32> {
        let Some(requests) = self.by_bunch.remove(&bunch) else {
            return Vec::new();
        };

        let mut complete = Vec::new();
        for request in requests {
            let Some(bunches) = self.by_request.get_mut(&request) else {
                continue;
            };

            bunches.remove(&bunch);
            if bunches.is_empty() {
                self.by_request.remove(&request);
                complete.push(request);
            }
        }

        complete
    }

    /// Returns the amount of bunches still associated with `request`.
    pub fn outstanding(&self, request: u32) -> usize {
        self.by_request.get(&request).map_or(0, BTreeSet::len)
    }

    /// Returns the amount of bunches currently tracked.
    pub fn bunches(&self) -> usize {
        self.by_bunch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_request_completes_after_its_last_bunch() {
        let mut index = BunchIndex::new();
        index.associate(0, 7);
        index.associate(1, 7);

        assert!(index.retire(1).is_empty());
        assert_eq!(index.outstanding(7), 1);
        assert_eq!(index.retire(0), vec![7]);
        assert_eq!(index.outstanding(7), 0);
        assert_eq!(index.bunches(), 0);
    }

    #[test]
    fn a_shared_bunch_can_complete_several_requests() {
        let mut index = BunchIndex::new();
        index.associate(0, 1);
        index.associate(1, 1);
        index.associate(1, 2);
        index.associate(1, 2);

        assert_eq!(index.retire(0), Vec::<u32>::new());
        assert_eq!(index.retire(1), vec![1, 2]);
    }

    #[test]
    fn retiring_an_unknown_bunch_is_a_no_op() {
        let mut index = BunchIndex::new();
        index.associate(3, 1);

        assert!(index.retire(4).is_empty());
        assert_eq!(index.outstanding(1), 1);
    }
}
