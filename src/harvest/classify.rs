//! Final disposition of a processed object.

use crate::model::{HarvestObject, ObjectState, ReportStatus};

/// Classifies a finished object. First matching rule wins:
///
/// 1. state `ERROR` → `errored`
/// 2. extras `status = deleted` → `deleted`
/// 3. not `current` (import chose not to proceed) → `unchanged`
/// 4. another persisted object shares its package → `reimported`
/// 5. otherwise → `new`
///
/// `shares_package` is whether at least two persisted objects (this one
/// included) reference the object's package.
pub fn classify(object: &HarvestObject, shares_package: bool) -> ReportStatus {
    if object.state == ObjectState::Error {
        ReportStatus::Errored
    } else if object.is_marked_deleted() {
        ReportStatus::Deleted
    } else if !object.current {
        ReportStatus::Unchanged
    } else if shares_package {
        ReportStatus::Reimported
    } else {
        ReportStatus::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HarvestJob, HarvestSource};

    fn object(state: ObjectState, current: bool, deleted: bool) -> HarvestObject {
        let job = HarvestJob::new("job-1", HarvestSource::new("src-1", "ckan"));
        let mut obj = HarvestObject::new("obj-1", &job, "guid-1");
        obj.state = state;
        obj.current = current;
        if deleted {
            obj.set_extra("status", "deleted");
        }
        obj
    }

    #[test]
    fn test_error_wins_over_everything() {
        let obj = object(ObjectState::Error, false, true);
        assert_eq!(classify(&obj, true), ReportStatus::Errored);
    }

    #[test]
    fn test_deleted_before_current() {
        let obj = object(ObjectState::Complete, false, true);
        assert_eq!(classify(&obj, true), ReportStatus::Deleted);
    }

    #[test]
    fn test_not_current_is_unchanged() {
        let obj = object(ObjectState::Complete, false, false);
        assert_eq!(classify(&obj, true), ReportStatus::Unchanged);
    }

    #[test]
    fn test_shared_package_is_reimported() {
        let obj = object(ObjectState::Complete, true, false);
        assert_eq!(classify(&obj, true), ReportStatus::Reimported);
        assert_eq!(classify(&obj, false), ReportStatus::New);
    }

    #[test]
    fn test_other_extras_do_not_count_as_deleted() {
        let mut obj = object(ObjectState::Complete, true, false);
        obj.set_extra("status", "changed");
        assert_eq!(classify(&obj, false), ReportStatus::New);
    }
}
