//! Set differences between two generations of records.

use crate::model::HealthCheckRecord;

/// Elements of `new` with no equal counterpart in `old`.
///
/// Additions are `delta(previous, current)`; removals are
/// `delta(current, previous)`.
pub fn delta<T: PartialEq + Clone>(old: &[T], new: &[T]) -> Vec<T> {
    new.iter()
        .filter(|n| !old.iter().any(|o| o == *n))
        .cloned()
        .collect()
}

/// How two health checks are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Every field must match; a changed body under the same id is re-registered.
    Add,
    /// A shared id counts as a match, so a check updated in place is not purged.
    Purge,
}

pub fn delta_checks(
    old: &[HealthCheckRecord],
    new: &[HealthCheckRecord],
    mode: CheckMode,
) -> Vec<HealthCheckRecord> {
    new.iter()
        .filter(|n| {
            !old.iter().any(|o| match mode {
                CheckMode::Add => o == *n,
                CheckMode::Purge => o == *n || o.id == n.id,
            })
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceRecord;

    fn svc(id: &str, port: u16) -> ServiceRecord {
        ServiceRecord::new(id, "web", "10.0.0.1", port, ["a"])
    }

    #[test]
    fn additions_and_removals() {
        let previous = vec![svc("a", 1), svc("b", 2)];
        let current = vec![svc("b", 2), svc("c", 3)];
        assert_eq!(delta(&previous, &current), vec![svc("c", 3)]);
        assert_eq!(delta(&current, &previous), vec![svc("a", 1)]);
    }

    #[test]
    fn changed_field_counts_as_both() {
        let previous = vec![svc("a", 1)];
        let current = vec![svc("a", 2)];
        assert_eq!(delta(&previous, &current), vec![svc("a", 2)]);
        assert_eq!(delta(&current, &previous), vec![svc("a", 1)]);
    }

    #[test]
    fn empty_sides() {
        let some = vec![svc("a", 1)];
        assert!(delta::<ServiceRecord>(&[], &[]).is_empty());
        assert_eq!(delta(&[], &some), some);
        assert!(delta(&some, &[]).is_empty());
    }
}
