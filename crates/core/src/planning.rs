//! Task graph for a newly created project.
//!
//! One storyboard task runs first; each shot-image task is blocked on it
//! until the storyboard has produced the shots they will be bound to.

use serde::Deserialize;

use crate::error::CoreError;
use crate::task::{NewTask, ShotParams, StoryboardParams, Task, TaskParams, TaskType};
use crate::types::{new_id, EntityId, Timestamp};

/// Upper bound on shots per project.
pub const MAX_SHOT_COUNT: u32 = 64;

/// Project-level defaults used to plan the initial tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDefaults {
    pub shot_count: u32,
    #[serde(default)]
    pub style: String,
    #[serde(default, alias = "storyText")]
    pub story_text: String,
    #[serde(default)]
    pub image_width: u32,
    #[serde(default)]
    pub image_height: u32,
}

impl ProjectDefaults {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.shot_count == 0 || self.shot_count > MAX_SHOT_COUNT {
            return Err(CoreError::Validation(format!(
                "shot_count must be between 1 and {MAX_SHOT_COUNT}, got {}",
                self.shot_count
            )));
        }
        if self.story_text.trim().is_empty() {
            return Err(CoreError::Validation("story_text must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Tasks created for a project, in creation order.
#[derive(Debug, Clone)]
pub struct ProjectPlan {
    pub storyboard: Task,
    pub shot_tasks: Vec<Task>,
}

impl ProjectPlan {
    pub fn into_tasks(self) -> Vec<Task> {
        std::iter::once(self.storyboard)
            .chain(self.shot_tasks)
            .collect()
    }
}

/// Build the storyboard task and `shot_count` shot-image tasks blocked on it.
pub fn plan_project(
    project_id: EntityId,
    defaults: &ProjectDefaults,
    now: Timestamp,
) -> Result<ProjectPlan, CoreError> {
    defaults.validate()?;

    let storyboard_id = new_id();
    let storyboard = NewTask::new(TaskType::Storyboard, project_id)
        .with_params(TaskParams::Storyboard(StoryboardParams {
            shot_count: defaults.shot_count,
            style: defaults.style.clone(),
            story_text: defaults.story_text.clone(),
        }))
        .into_task(storyboard_id, now);

    let shot_tasks = (0..defaults.shot_count)
        .map(|_| {
            NewTask::new(TaskType::ShotImage, project_id)
                .with_params(TaskParams::Shot(ShotParams {
                    style: defaults.style.clone(),
                    image_width: defaults.image_width,
                    image_height: defaults.image_height,
                    ..Default::default()
                }))
                .depends_on([storyboard_id])
                .into_task(new_id(), now)
        })
        .collect();

    Ok(ProjectPlan {
        storyboard,
        shot_tasks,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;
    use crate::task::TaskStatus;

    fn defaults(shot_count: u32) -> ProjectDefaults {
        ProjectDefaults {
            shot_count,
            style: "watercolor".into(),
            story_text: "A fox finds a lantern.".into(),
            image_width: 0,
            image_height: 0,
        }
    }

    #[test]
    fn plan_creates_storyboard_and_blocked_shots() {
        let project = new_id();
        let plan = plan_project(project, &defaults(3), Utc::now()).unwrap();

        assert_eq!(plan.storyboard.status, TaskStatus::Pending);
        assert_eq!(plan.storyboard.task_type, TaskType::Storyboard);
        assert!(plan.storyboard.depends_on.is_empty());

        assert_eq!(plan.shot_tasks.len(), 3);
        for t in &plan.shot_tasks {
            assert_eq!(t.status, TaskStatus::Blocked);
            assert_eq!(t.task_type, TaskType::ShotImage);
            assert_eq!(t.depends_on, vec![plan.storyboard.id]);
            assert_eq!(t.project_id, project);
        }
    }

    #[test]
    fn zero_shots_is_rejected() {
        assert_matches!(
            plan_project(new_id(), &defaults(0), Utc::now()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn empty_story_is_rejected() {
        let mut d = defaults(2);
        d.story_text = "  ".into();
        assert_matches!(plan_project(new_id(), &d, Utc::now()), Err(CoreError::Validation(_)));
    }

    #[test]
    fn into_tasks_puts_storyboard_first() {
        let plan = plan_project(new_id(), &defaults(2), Utc::now()).unwrap();
        let sb = plan.storyboard.id;
        let tasks = plan.into_tasks();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, sb);
    }
}
