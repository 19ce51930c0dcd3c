//! Typed ID definitions for deployments, instances and entities.

use crate::define_id;

// =============================================================================
// Platform
// =============================================================================

define_id!(CdpDeploymentId, "cdp deployment id");
define_id!(EntityName, "entity name");

impl CdpDeploymentId {
    /// Issues a fresh platform deployment id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

define_id!(LambdaId, "lambda id");
define_id!(InstanceId, "instance id");
define_id!(TaskDefinitionArn, "task definition arn");

impl TaskDefinitionArn {
    /// Returns the `family:revision` suffix of the ARN, or the whole value if
    /// it is not an ARN.
    #[must_use]
    pub fn family_revision(&self) -> &str {
        self.0
            .rsplit_once("task-definition/")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.0)
    }
}

// =============================================================================
// Transport
// =============================================================================

define_id!(MessageId, "message id");

impl MessageId {
    /// Generates a time-ordered message id for locally produced messages.
    #[must_use]
    pub fn generate() -> Self {
        Self(crate::Ulid::new().to_string().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;

    #[test]
    fn test_parse_accepts_orchestrator_arns() {
        let id = InstanceId::parse(
            "arn:aws:ecs:eu-west-2:000000000000:task/dev-cluster/0f3c6a6ed2f44b5c9a2f1f3b1a7e1c55",
        )
        .unwrap();
        assert!(id.as_str().starts_with("arn:aws:ecs"));
    }

    #[test]
    fn test_parse_rejects_empty() {
        let err = LambdaId::parse("").unwrap_err();
        assert!(err.is_empty());
        assert_eq!(err.to_string(), "lambda id cannot be empty");
    }

    #[test]
    fn test_parse_rejects_whitespace() {
        let err = EntityName::parse(" service-a").unwrap_err();
        assert!(matches!(err, IdError::Whitespace { .. }));
    }

    #[test]
    fn test_parse_rejects_oversized() {
        let long = "a".repeat(crate::MAX_ID_LEN + 1);
        assert!(matches!(
            EntityName::parse(&long),
            Err(IdError::TooLong { .. })
        ));
    }

    #[test]
    fn test_generated_deployment_ids_are_unique() {
        let a = CdpDeploymentId::generate();
        let b = CdpDeploymentId::generate();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_task_definition_family_revision() {
        let arn = TaskDefinitionArn::parse(
            "arn:aws:ecs:eu-west-2:000000000000:task-definition/service-a:42",
        )
        .unwrap();
        assert_eq!(arn.family_revision(), "service-a:42");

        let bare = TaskDefinitionArn::parse("service-a:42").unwrap();
        assert_eq!(bare.family_revision(), "service-a:42");
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = LambdaId::parse("ecs-svc/1234567890").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ecs-svc/1234567890\"");

        let back: LambdaId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<LambdaId>("\"\"").is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_trimmed_non_empty_strings_parse(s in "[a-zA-Z0-9:/_.-]{1,64}") {
            let id = EntityName::parse(&s).unwrap();
            proptest::prop_assert_eq!(id.as_str(), s.as_str());
        }
    }
}
