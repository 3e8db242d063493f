use std::collections::HashMap;

use crate::domain::date_range::DateRange;
use crate::domain::models::{
    PunchStatus, RawPunch, ReconciledLogEntry, UserRecord, format_timestamp,
};

pub type UserMap = HashMap<String, String>;

pub fn build_user_map(users: &[UserRecord]) -> UserMap {
    users
        .iter()
        .map(|user| (user.user_id.clone(), user.name.clone()))
        .collect()
}

/// Joins punches with the roster and keeps those inside `range`, in device order.
pub fn reconcile(
    users: &[UserRecord],
    punches: &[RawPunch],
    range: &DateRange,
) -> Vec<ReconciledLogEntry> {
    reconcile_with_map(&build_user_map(users), punches, range)
}

pub fn reconcile_with_map(
    user_map: &UserMap,
    punches: &[RawPunch],
    range: &DateRange,
) -> Vec<ReconciledLogEntry> {
    punches
        .iter()
        .filter(|punch| range.contains(&punch.timestamp))
        .map(|punch| ReconciledLogEntry {
            user_id: punch.user_id.clone(),
            name: user_map
                .get(&punch.user_id)
                .cloned()
                .unwrap_or_else(|| format!("User {}", punch.user_id)),
            number: punch.user_id.clone(),
            date_time: format_timestamp(&punch.timestamp),
            status: PunchStatus::from_punch_code(punch.punch_code),
        })
        .collect()
}
