use std::collections::{BTreeMap, HashMap};

/// Bidirectional association between `(request id, caller step id)` pairs and the flat
/// local step id space the engine works in.
///
/// Different requests may reuse the same caller step ids, the local id of a pair is
/// unique for as long as its request is alive.
#[derive(Debug, Default)]
pub struct StepIdMap {
    forward: BTreeMap<(u32, u32), u32>,
    reverse: HashMap<u32, (u32, u32)>,
    next_local: u32,
}

impl StepIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the local id of a step, assigning a fresh one the first time the pair is seen.
    ///
    /// # Arguments
    /// * `request` - The request the step belongs to.
    /// * `step` - The caller supplied step id.
    ///
    /// # Returns
    /// The local step id.
    pub fn assign(&mut self, request: u32, step: u32) -> u32 {
        if let Some(&local) = self.forward.get(&(request, step)) {
            return local;
        }

        let mut local = self.next_local;
        while self.reverse.contains_key(&local) {
            local = local.wrapping_add(1);
        }

        self.next_local = local.wrapping_add(1);
        self.forward.insert((request, step), local);
        self.reverse.insert(local, (request, step));
        local
    }

    /// Resolves a local step id back into its `(request id, caller step id)` pair.
    pub fn resolve(&self, local: u32) -> Option<(u32, u32)> {
        self.reverse.get(&local).copied()
    }

    /// Drops every association held for `request`.
    ///
    /// # Returns
    /// The amount of associations that were dropped.
    pub fn erase_request(&mut self, request: u32) -> usize {
        let locals: Vec<_> = self
            .forward
            .range((request, u32::MIN)..=(request, u32::MAX))
            .map(|(&key, &local)| (key, local))
            .collect();

        for (key, local) in &locals {
            self.forward.remove(key);
            self.reverse.remove(local);
        }

        locals.len()
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}
