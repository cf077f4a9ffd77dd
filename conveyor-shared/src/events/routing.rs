//! Routing keys for bus events.
//!
//! The primary key carries the dispatch coordinates of the task,
//! dot-joined, with `_` placeholders for absent fields and a trailing
//! reserved segment consumers match with `#`. Every route on the task
//! adds a CC key `route.<r>`.

use crate::models::task::Task;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingKey {
    pub task_id: String,
    pub run_id: Option<u32>,
    pub worker_group: Option<String>,
    pub worker_id: Option<String>,
    pub provisioner_id: String,
    pub worker_type: String,
    pub scheduler_id: String,
    pub task_group_id: String,
}

impl RoutingKey {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            run_id: None,
            worker_group: None,
            worker_id: None,
            provisioner_id: task.definition.provisioner_id.clone(),
            worker_type: task.definition.worker_type.clone(),
            scheduler_id: task.definition.scheduler_id.clone(),
            task_group_id: task.definition.task_group_id.clone(),
        }
    }

    pub fn with_run(mut self, run_id: u32) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_worker(mut self, worker_group: &str, worker_id: &str) -> Self {
        self.worker_group = Some(worker_group.to_string());
        self.worker_id = Some(worker_id.to_string());
        self
    }

    /// Render the dot-joined key with the trailing reserved segment.
    pub fn render(&self) -> String {
        let run = self
            .run_id
            .map(|r| r.to_string())
            .unwrap_or_else(|| "_".to_string());
        format!(
            "{}.{}.{}.{}.{}.{}.{}.{}._",
            self.task_id,
            run,
            self.worker_group.as_deref().unwrap_or("_"),
            self.worker_id.as_deref().unwrap_or("_"),
            self.provisioner_id,
            self.worker_type,
            self.scheduler_id,
            self.task_group_id,
        )
    }
}

/// CC keys for the task's routes.
pub fn cc_routes(routes: &[String]) -> Vec<String> {
    routes.iter().map(|r| format!("route.{r}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_render_as_placeholders() {
        let key = RoutingKey {
            task_id: "T1".into(),
            run_id: None,
            worker_group: None,
            worker_id: None,
            provisioner_id: "aws".into(),
            worker_type: "builder".into(),
            scheduler_id: "sched".into(),
            task_group_id: "G1".into(),
        };
        assert_eq!(key.render(), "T1._._._.aws.builder.sched.G1._");
        assert_eq!(
            key.with_run(2).with_worker("wg", "w1").render(),
            "T1.2.wg.w1.aws.builder.sched.G1._"
        );
    }

    #[test]
    fn routes_become_cc_keys() {
        let cc = cc_routes(&["index.project.main".to_string(), "notify.irc".to_string()]);
        assert_eq!(cc, vec!["route.index.project.main", "route.notify.irc"]);
    }
}
