//! Status condition bookkeeping
//!
//! Conditions are kept as an ordered list keyed by `type`: new types are
//! appended, existing types are replaced in place. The transition time only
//! moves when the condition's status value flips.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// Condition type reported for every instance
pub const CONDITION_AVAILABLE: &str = "Available";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Reasons used on the `Available` condition
pub mod reasons {
    pub const RECONCILING: &str = "Reconciling";
    pub const DEPLOYMENT_AVAILABLE: &str = "DeploymentAvailable";
}

/// Desired content of one condition, without its transition time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub type_: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    pub observed_generation: Option<i64>,
}

impl ConditionUpdate {
    pub fn new(type_: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Set a condition by type. Returns true if the list changed.
pub fn set_condition(conditions: &mut Vec<Condition>, update: ConditionUpdate, now: DateTime<Utc>) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == update.type_) {
        Some(existing) => {
            let mut changed = false;
            if existing.status != update.status {
                existing.status = update.status;
                existing.last_transition_time = Time(now);
                changed = true;
            }
            if existing.reason != update.reason {
                existing.reason = update.reason;
                changed = true;
            }
            if existing.message != update.message {
                existing.message = update.message;
                changed = true;
            }
            if existing.observed_generation != update.observed_generation {
                existing.observed_generation = update.observed_generation;
                changed = true;
            }
            changed
        }
        None => {
            conditions.push(Condition {
                type_: update.type_,
                status: update.status,
                reason: update.reason,
                message: update.message,
                observed_generation: update.observed_generation,
                last_transition_time: Time(now),
            });
            true
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn available(status: &str, reason: &str) -> ConditionUpdate {
        ConditionUpdate::new(CONDITION_AVAILABLE, status, reason, "msg")
    }

    #[test]
    fn test_new_condition_is_appended() {
        let mut conditions = vec![];
        assert!(set_condition(&mut conditions, available(STATUS_UNKNOWN, "Reconciling"), at(10)));
        assert!(set_condition(
            &mut conditions,
            ConditionUpdate::new("Degraded", STATUS_FALSE, "Fine", ""),
            at(11)
        ));

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, CONDITION_AVAILABLE);
        assert_eq!(conditions[1].type_, "Degraded");
        assert_eq!(conditions[0].last_transition_time, Time(at(10)));
    }

    #[test]
    fn test_replace_keeps_position_and_single_entry() {
        let mut conditions = vec![];
        set_condition(&mut conditions, available(STATUS_UNKNOWN, "Reconciling"), at(10));
        set_condition(&mut conditions, ConditionUpdate::new("Other", STATUS_TRUE, "X", ""), at(10));
        set_condition(&mut conditions, available(STATUS_TRUE, "DeploymentAvailable"), at(20));

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, CONDITION_AVAILABLE);
        assert_eq!(conditions[0].status, STATUS_TRUE);
        assert_eq!(conditions[0].reason, "DeploymentAvailable");
    }

    #[test]
    fn test_transition_time_moves_only_on_flip() {
        let mut conditions = vec![];
        set_condition(&mut conditions, available(STATUS_FALSE, "Reconciling"), at(10));

        let changed = set_condition(
            &mut conditions,
            ConditionUpdate::new(CONDITION_AVAILABLE, STATUS_FALSE, "Reconciling", "other message"),
            at(20),
        );
        assert!(changed);
        assert_eq!(conditions[0].last_transition_time, Time(at(10)));

        set_condition(&mut conditions, available(STATUS_TRUE, "DeploymentAvailable"), at(30));
        assert_eq!(conditions[0].last_transition_time, Time(at(30)));
    }

    #[test]
    fn test_identical_update_is_noop() {
        let mut conditions = vec![];
        let update = available(STATUS_FALSE, "Reconciling").observed_generation(Some(3));
        set_condition(&mut conditions, update.clone(), at(10));
        let before = conditions.clone();

        assert!(!set_condition(&mut conditions, update, at(99)));
        assert_eq!(conditions, before);
    }

    #[test]
    fn test_observed_generation_change_counts() {
        let mut conditions = vec![];
        set_condition(&mut conditions, available(STATUS_FALSE, "Reconciling").observed_generation(Some(1)), at(10));
        assert!(set_condition(
            &mut conditions,
            available(STATUS_FALSE, "Reconciling").observed_generation(Some(2)),
            at(20)
        ));
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn test_find_condition() {
        let mut conditions = vec![];
        assert!(find_condition(&conditions, CONDITION_AVAILABLE).is_none());
        set_condition(&mut conditions, available(STATUS_TRUE, "DeploymentAvailable"), at(1));
        assert_eq!(
            find_condition(&conditions, CONDITION_AVAILABLE).map(|c| c.status.as_str()),
            Some(STATUS_TRUE)
        );
        assert!(find_condition(&conditions, "Missing").is_none());
    }
}
