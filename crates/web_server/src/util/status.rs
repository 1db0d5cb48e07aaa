use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// Sets the corresponding condition in conditions to new_condition and returns
/// a tuple containing the new conditions vector and whether it was changed.
///
/// 1. If the condition of the specified type already exists, all fields of the existing condition
///    are updated to new_condition. LastTransitionTime is set to now if the new status differs
///    from the old status
/// 2. If a condition of the specified type does not exist, LastTransitionTime is set to now()
///    and new_condition is appended
pub fn set_status_condition(
    conditions: &[Condition],
    mut new_condition: Condition,
) -> (Vec<Condition>, bool) {
    let mut new_conditions = Vec::from(conditions);
    let mut changed = false;

    if let Some(existing) = new_conditions.iter_mut().find(|c| c.type_ == new_condition.type_) {
        if existing.status != new_condition.status {
            existing.status = new_condition.status;
            existing.last_transition_time = Time(Utc::now());
            changed = true;
        }

        if existing.reason != new_condition.reason {
            existing.reason = new_condition.reason;
            changed = true;
        }

        if existing.message != new_condition.message {
            existing.message = new_condition.message;
            changed = true;
        }

        if existing.observed_generation != new_condition.observed_generation {
            existing.observed_generation = new_condition.observed_generation;
            changed = true;
        }
    } else {
        new_condition.last_transition_time = Time(Utc::now());
        new_conditions.push(new_condition);
        changed = true;
    }

    (new_conditions, changed)
}

/// Finds the condition_type in conditions.
pub fn find_status_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.type_ == condition_type)
}

/// Returns true when the condition_type is present and set to `True`
pub fn is_status_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_status_condition(conditions, condition_type).is_some_and(|condition| condition.status == "True")
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::*;

    fn condition(status: &str, reason: &str, generation: i64) -> Condition {
        Condition {
            type_: "Ready".to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: "Test message".to_string(),
            last_transition_time: Time(Utc::now()),
            observed_generation: Some(generation),
        }
    }

    #[test]
    fn test_set_status_condition() {
        let conditions = Vec::new();

        let (conditions, changed) = set_status_condition(&conditions, condition("True", "Testing", 1));
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert!(is_status_condition_true(&conditions, "Ready"));

        let (conditions, changed) = set_status_condition(&conditions, condition("False", "UpdatedReason", 2));
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        assert!(!is_status_condition_true(&conditions, "Ready"));
    }

    #[test]
    fn unchanged_condition_keeps_transition_time() {
        let (conditions, _) = set_status_condition(&[], condition("True", "Settled", 1));
        let before = conditions[0].last_transition_time.clone();

        let (conditions, changed) = set_status_condition(&conditions, condition("True", "Settled", 1));
        assert!(!changed);
        assert_eq!(conditions[0].last_transition_time, before);
    }

    #[test]
    fn missing_condition_is_not_true() {
        assert!(find_status_condition(&[], "Ready").is_none());
        assert!(!is_status_condition_true(&[], "Ready"));
    }
}
