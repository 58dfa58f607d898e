use std::sync::Arc;

use tracing::debug;

use super::models::LearnerProfile;
use super::store::{SponsorDirectory, StoreResult};

/// key: free-access-override -> institutionally sponsored learners
#[derive(Clone)]
pub struct FreeAccessOverride {
    directory: Arc<dyn SponsorDirectory>,
}

impl FreeAccessOverride {
    pub fn new(directory: Arc<dyn SponsorDirectory>) -> Self {
        Self { directory }
    }

    pub async fn is_sponsored(&self, identity: &str) -> StoreResult<bool> {
        let sponsored = self
            .directory
            .learner_profile(identity)
            .await?
            .map(|profile| profile_is_sponsored(&profile))
            .unwrap_or(false);
        if sponsored {
            debug!(%identity, "identity sponsored; quotas bypassed");
        }
        Ok(sponsored)
    }
}

/// Direct teacher/organization links count, as do the denormalized tags.
pub fn profile_is_sponsored(profile: &LearnerProfile) -> bool {
    let linked = |value: &Option<String>| {
        value
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
    };
    let tagged = |tags: &[String]| tags.iter().any(|tag| !tag.trim().is_empty());

    linked(&profile.teacher_id)
        || linked(&profile.organization_id)
        || tagged(&profile.created_by)
        || tagged(&profile.managed_by)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> LearnerProfile {
        LearnerProfile {
            identity: "learner".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unlinked_learner_is_not_sponsored() {
        assert!(!profile_is_sponsored(&profile()));
    }

    #[test]
    fn blank_links_do_not_count() {
        let mut learner = profile();
        learner.teacher_id = Some("  ".to_string());
        learner.created_by = vec![String::new()];
        assert!(!profile_is_sponsored(&learner));
    }

    #[test]
    fn any_link_sponsors() {
        let mut by_teacher = profile();
        by_teacher.teacher_id = Some("t-1".to_string());
        assert!(profile_is_sponsored(&by_teacher));

        let mut by_org = profile();
        by_org.organization_id = Some("org-9".to_string());
        assert!(profile_is_sponsored(&by_org));

        let mut by_tag = profile();
        by_tag.managed_by = vec!["manager-3".to_string()];
        assert!(profile_is_sponsored(&by_tag));
    }
}
