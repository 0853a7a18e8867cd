use crate::data_structures::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Free uses per user. Lives only as long as the process; a restart grants
/// everyone a fresh trial.
pub struct TrialCounter {
    limit: u32,
    uses: Mutex<HashMap<UserId, u32>>,
}

impl TrialCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            uses: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Takes one trial use if any is left. Check and increment happen under one lock.
    pub fn try_consume(&self, user_id: UserId) -> Option<u32> {
        let mut uses = self.lock();
        let used = uses.entry(user_id).or_insert(0);
        if *used >= self.limit {
            return None;
        }
        *used += 1;
        Some(*used)
    }

    pub fn used(&self, user_id: UserId) -> u32 {
        self.lock().get(&user_id).copied().unwrap_or(0)
    }

    pub fn remaining(&self, user_id: UserId) -> u32 {
        self.limit.saturating_sub(self.used(user_id))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, u32>> {
        self.uses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
