use super::{Resolution, Resolver};
use crate::state::{Contradiction, Finding};
use async_trait::async_trait;

/// Resolves a contradiction with the guidance attached at detection time,
/// at the mean confidence of the two findings.
#[derive(Debug, Clone, Default)]
pub struct GuidanceResolver;

#[async_trait]
impl Resolver for GuidanceResolver {
    async fn resolve(
        &self,
        contradiction: &Contradiction,
        finding_a: &Finding,
        finding_b: &Finding,
    ) -> anyhow::Result<Resolution> {
        let text = if contradiction.guidance.is_empty() {
            format!("Reviewed: {}", contradiction.description)
        } else {
            contradiction.guidance.clone()
        };

        Ok(Resolution::new(
            text,
            (finding_a.confidence + finding_b.confidence) / 2.0,
        ))
    }
}
