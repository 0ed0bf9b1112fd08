//! Escalating punishment templates.
//!
//! A template is an ordered list of stages, each describing the punishment a
//! repeat offender receives next. Templates are plain data here; storing and
//! editing them is up to the caller.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_common::{AppError, AppResult};
use warden_db::entities::PunishmentKind;

use crate::duration::{PERMANENT_MARKER, PunishmentDuration, parse_millis};
use crate::punishment::NewPunishment;

/// One step of a [`PunishmentTemplate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStage {
    /// Position in the template, starting at 0.
    pub index: u32,
    /// Kind of punishment this stage issues.
    pub kind: PunishmentKind,
    /// Compact duration such as `7d`, or `permanent`.
    pub duration: String,
    /// Reason shown to the player.
    pub reason: String,
}

impl TemplateStage {
    /// The stage duration, starting now.
    pub fn duration(&self) -> AppResult<PunishmentDuration> {
        if self.duration.eq_ignore_ascii_case(PERMANENT_MARKER) {
            return Ok(PunishmentDuration::Permanent);
        }
        PunishmentDuration::parse(&self.duration)
    }

    /// Punishment input for `user_id` according to this stage.
    pub fn instantiate(&self, user_id: Uuid) -> AppResult<NewPunishment> {
        Ok(NewPunishment {
            user_id,
            kind: self.kind,
            reason: self.reason.clone(),
            duration: self.duration()?,
        })
    }
}

/// Named list of stages ordered by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TemplateDef")]
pub struct PunishmentTemplate {
    name: String,
    stages: Vec<TemplateStage>,
}

#[derive(Deserialize)]
struct TemplateDef {
    name: String,
    stages: Vec<TemplateStage>,
}

impl TryFrom<TemplateDef> for PunishmentTemplate {
    type Error = AppError;

    fn try_from(def: TemplateDef) -> AppResult<Self> {
        Self::new(def.name, def.stages)
    }
}

impl PunishmentTemplate {
    /// Build a template, sorting stages by index.
    ///
    /// Fails on an empty name, duplicate indices or unparsable durations.
    pub fn new(name: impl Into<String>, mut stages: Vec<TemplateStage>) -> AppResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::InvalidFormat("template name is empty".to_string()));
        }

        stages.sort_by_key(|stage| stage.index);
        if let Some(pair) = stages.windows(2).find(|pair| pair[0].index == pair[1].index) {
            return Err(AppError::InvalidFormat(format!(
                "template '{name}' has two stages with index {}",
                pair[0].index
            )));
        }
        for stage in &stages {
            if !stage.duration.eq_ignore_ascii_case(PERMANENT_MARKER) {
                parse_millis(&stage.duration)?;
            }
        }

        Ok(Self { name, stages })
    }

    /// Template name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in index order.
    #[must_use]
    pub fn stages(&self) -> &[TemplateStage] {
        &self.stages
    }

    /// The stage with the given index.
    pub fn stage(&self, index: u32) -> AppResult<&TemplateStage> {
        self.stages
            .iter()
            .find(|stage| stage.index == index)
            .ok_or_else(|| {
                AppError::NotFound(format!("template '{}' has no stage {index}", self.name))
            })
    }

    /// The first stage after `index`, or the last stage once the end is reached.
    pub fn next_stage(&self, index: u32) -> AppResult<&TemplateStage> {
        self.stages
            .iter()
            .find(|stage| stage.index > index)
            .or_else(|| self.stages.last())
            .ok_or_else(|| AppError::NotFound(format!("template '{}' has no stages", self.name)))
    }

    /// Punishment input for `user_id` from the stage with the given index.
    pub fn instantiate(&self, index: u32, user_id: Uuid) -> AppResult<NewPunishment> {
        self.stage(index)?.instantiate(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(index: u32, kind: PunishmentKind, duration: &str) -> TemplateStage {
        TemplateStage {
            index,
            kind,
            duration: duration.to_string(),
            reason: format!("Stage {index}"),
        }
    }

    fn spam_template() -> PunishmentTemplate {
        PunishmentTemplate::new(
            "spam",
            vec![
                stage(2, PunishmentKind::Ban, "permanent"),
                stage(0, PunishmentKind::Mute, "10m"),
                stage(1, PunishmentKind::Mute, "1d"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_stages_are_sorted() {
        let template = spam_template();
        let indices: Vec<_> = template.stages().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(template.name(), "spam");
    }

    #[test]
    fn test_next_stage_stops_at_last() {
        let template = spam_template();
        assert_eq!(template.next_stage(0).unwrap().index, 1);
        assert_eq!(template.next_stage(2).unwrap().index, 2);
        assert_eq!(template.next_stage(7).unwrap().index, 2);
    }

    #[test]
    fn test_missing_stage() {
        let template = spam_template();
        assert!(matches!(template.stage(5), Err(AppError::NotFound(_))));

        let empty = PunishmentTemplate::new("empty", Vec::new()).unwrap();
        assert!(matches!(empty.next_stage(0), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_instantiate() {
        let template = spam_template();
        let user_id = Uuid::new_v4();

        let first = template.instantiate(0, user_id).unwrap();
        assert_eq!(first.kind, PunishmentKind::Mute);
        assert_eq!(first.user_id, user_id);
        assert!(first.duration.is_ongoing());
        assert!(!first.duration.is_permanent());

        let last = template.instantiate(2, user_id).unwrap();
        assert!(last.duration.is_permanent());
        assert_eq!(last.reason, "Stage 2");
    }

    #[test]
    fn test_rejects_invalid_templates() {
        assert!(matches!(
            PunishmentTemplate::new(" ", Vec::new()),
            Err(AppError::InvalidFormat(_))
        ));
        assert!(matches!(
            PunishmentTemplate::new(
                "dup",
                vec![
                    stage(0, PunishmentKind::Mute, "1m"),
                    stage(0, PunishmentKind::Ban, "1d")
                ]
            ),
            Err(AppError::InvalidFormat(_))
        ));
        assert!(matches!(
            PunishmentTemplate::new("bad", vec![stage(0, PunishmentKind::Mute, "1 week")]),
            Err(AppError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "name": "grief",
            "stages": [
                {"index": 0, "kind": "kick", "duration": "0s", "reason": "Warning"},
                {"index": 1, "kind": "permanent_ban", "duration": "permanent", "reason": "Banned"}
            ]
        }"#;
        let template: PunishmentTemplate = serde_json::from_str(json).unwrap();
        assert_eq!(template.stage(1).unwrap().kind, PunishmentKind::PermanentBan);

        let invalid = r#"{"name": "x", "stages": [{"index": 0, "kind": "mute", "duration": "-1m", "reason": "r"}]}"#;
        assert!(serde_json::from_str::<PunishmentTemplate>(invalid).is_err());
    }
}
