use std::time::Duration;

use crate::artifact::{intermediate_name, Artifact, ArtifactStore};
use crate::config::{ClusterConfig, TimingConfig};
use crate::message::{Envelope, Message, TaskPhase};
use crate::worker::workload::Workload;
use crate::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Mapping,
    Reducing,
}

#[derive(Debug, Clone)]
struct ActiveTask {
    phase: TaskPhase,
    index: usize,
    /// Input artifact name; map tasks only.
    input: Option<String>,
}

/// The worker's claim/execute/report loop.
///
/// Reports (`TASKFINISHED`) go to every master and are re-emitted on a
/// retry cadence until a directive arrives, so a lost assignment or reply
/// heals by itself. Produced artifacts stay staged and ride along with
/// every retry, which is also what replicates them to the masters.
pub struct WorkerAgent {
    pub id: NodeId,
    config: ClusterConfig,
    timing: TimingConfig,
    phase: WorkerPhase,
    active: Option<ActiveTask>,
    exec_remaining: Duration,
    /// Last task this worker finished; `None` before the first one, which
    /// is the initial "just requesting work" report.
    last_finished: Option<(TaskPhase, usize)>,
    /// Artifacts staged from the last finished task, retained until the
    /// next assignment replaces them.
    produced: Vec<Artifact>,
    pub store: ArtifactStore,
    report_timer: Duration,
    retired: bool,
    workload: Box<dyn Workload>,
    outbox: Vec<Envelope>,
}

impl WorkerAgent {
    pub fn new(
        id: NodeId,
        config: ClusterConfig,
        timing: TimingConfig,
        workload: Box<dyn Workload>,
    ) -> Self {
        Self {
            id,
            config,
            timing,
            phase: WorkerPhase::Idle,
            active: None,
            exec_remaining: Duration::ZERO,
            last_finished: None,
            produced: Vec::new(),
            store: ArtifactStore::new(),
            // First report goes out on the first tick.
            report_timer: Duration::ZERO,
            retired: false,
            workload,
            outbox: Vec::new(),
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Index of the task currently executing, `-1` while idle.
    pub fn task_index(&self) -> i64 {
        self.active.as_ref().map_or(-1, |t| t.index as i64)
    }

    pub fn retired(&self) -> bool {
        self.retired
    }

    pub fn produced(&self) -> &[Artifact] {
        &self.produced
    }

    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    pub fn tick(&mut self, dt: Duration) {
        if self.retired {
            return;
        }
        match self.phase {
            WorkerPhase::Mapping | WorkerPhase::Reducing => {
                self.exec_remaining = self.exec_remaining.saturating_sub(dt);
                if self.exec_remaining.is_zero() {
                    self.finish_task();
                }
            }
            WorkerPhase::Idle => {
                self.report_timer = self.report_timer.saturating_sub(dt);
                if self.report_timer.is_zero() {
                    self.send_report();
                }
            }
        }
    }

    pub fn handle_message(&mut self, envelope: Envelope) {
        if self.retired {
            return;
        }
        let Envelope {
            from,
            message,
            artifacts,
            ..
        } = envelope;
        self.store.insert_all(artifacts);

        match message {
            Message::GiveTask {
                phase,
                index,
                input,
            } => {
                // A directive that crosses an execution in flight is stale;
                // the in-flight task's report will fetch a fresh one.
                if self.phase != WorkerPhase::Idle {
                    tracing::debug!(
                        worker_id = self.id,
                        from,
                        task = index,
                        "Ignoring assignment while busy"
                    );
                    return;
                }
                tracing::debug!(
                    worker_id = self.id,
                    from,
                    phase = %phase,
                    task = index,
                    "Claimed task"
                );
                self.phase = match phase {
                    TaskPhase::Map => WorkerPhase::Mapping,
                    TaskPhase::Reduce => WorkerPhase::Reducing,
                };
                self.active = Some(ActiveTask {
                    phase,
                    index,
                    input,
                });
                self.exec_remaining = Duration::from_millis(self.timing.exec_time_ms);
                self.produced.clear();
            }
            Message::Wait => {
                // Nothing assignable right now; the retry cadence is
                // already running.
            }
            Message::Exit => {
                tracing::info!(worker_id = self.id, "Retiring");
                self.retired = true;
            }
            other => {
                tracing::debug!(
                    worker_id = self.id,
                    from,
                    kind = other.kind(),
                    "Ignoring master-directed message"
                );
            }
        }
    }

    fn finish_task(&mut self) {
        let Some(task) = self.active.take() else {
            self.phase = WorkerPhase::Idle;
            return;
        };

        let produced = match task.phase {
            TaskPhase::Map => {
                let input = task
                    .input
                    .as_deref()
                    .and_then(|name| self.store.get(name).cloned())
                    .unwrap_or_else(|| Artifact::new("", ""));
                self.workload
                    .map(task.index, &input, self.config.reduce_task_count)
            }
            TaskPhase::Reduce => {
                // The bucket's intermediates were delivered with the
                // assignment; address them by convention.
                let inputs: Vec<Artifact> = (0..self.config.map_task_count)
                    .filter_map(|m| self.store.get(&intermediate_name(task.index, m)).cloned())
                    .collect();
                vec![self.workload.reduce(task.index, &inputs)]
            }
        };

        tracing::debug!(
            worker_id = self.id,
            phase = %task.phase,
            task = task.index,
            artifacts = produced.len(),
            "Task finished"
        );
        self.store.insert_all(produced.iter().cloned());
        self.produced = produced;
        self.last_finished = Some((task.phase, task.index));
        self.phase = WorkerPhase::Idle;
        self.send_report();
    }

    /// Broadcast the completion report (or the initial work request) to
    /// every master, carrying the staged artifacts.
    fn send_report(&mut self) {
        let report = Message::TaskFinished {
            finished: self.last_finished,
        };
        for master in self.config.master_ids() {
            self.outbox.push(
                Envelope::new(self.id, master, report.clone())
                    .with_artifacts(self.produced.clone()),
            );
        }
        self.report_timer = Duration::from_millis(self.timing.report_interval_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::workload::WordCount;

    fn agent() -> WorkerAgent {
        let config = ClusterConfig::new(3, 2, 2, 3).unwrap();
        WorkerAgent::new(3, config, TimingConfig::default(), Box::new(WordCount))
    }

    fn assignment(phase: TaskPhase, index: usize, input: Option<&str>) -> Envelope {
        Envelope::new(
            0,
            3,
            Message::GiveTask {
                phase,
                index,
                input: input.map(str::to_string),
            },
        )
    }

    #[test]
    fn first_tick_reports_with_no_prior_task() {
        let mut agent = agent();
        agent.tick(Duration::from_millis(1));
        let out = agent.take_outbox();
        assert_eq!(out.len(), 3, "one report per master");
        for env in &out {
            assert_eq!(env.message, Message::TaskFinished { finished: None });
            assert!(env.artifacts.is_empty());
        }
    }

    #[test]
    fn map_assignment_executes_and_reports() {
        let mut agent = agent();
        let env = assignment(TaskPhase::Map, 0, Some("pg-00.txt"))
            .with_artifacts(vec![Artifact::new("pg-00.txt", "raft raft worker")]);
        agent.handle_message(env);
        assert_eq!(agent.phase(), WorkerPhase::Mapping);
        assert_eq!(agent.task_index(), 0);

        agent.tick(Duration::from_millis(agent.timing.exec_time_ms));
        assert_eq!(agent.phase(), WorkerPhase::Idle);
        assert_eq!(agent.task_index(), -1);
        // One intermediate per reduce bucket, staged and stored locally.
        assert_eq!(agent.produced().len(), 3);
        assert!(agent.store.contains("intermediate0-0"));

        let out = agent.take_outbox();
        assert_eq!(out.len(), 3);
        assert_eq!(
            out[0].message,
            Message::TaskFinished {
                finished: Some((TaskPhase::Map, 0))
            }
        );
        assert_eq!(out[0].artifacts.len(), 3);
    }

    #[test]
    fn reduce_assignment_uses_delivered_intermediates() {
        let mut agent = agent();
        let env = assignment(TaskPhase::Reduce, 1, None).with_artifacts(vec![
            Artifact::new(intermediate_name(1, 0), "a,1"),
            Artifact::new(intermediate_name(1, 1), "a,2\nb,1"),
        ]);
        agent.handle_message(env);
        assert_eq!(agent.phase(), WorkerPhase::Reducing);

        agent.tick(Duration::from_millis(agent.timing.exec_time_ms));
        assert_eq!(agent.produced().len(), 1);
        assert_eq!(agent.produced()[0].name, "output1");
        assert_eq!(agent.produced()[0].data, "a,3\nb,1");
    }

    #[test]
    fn busy_worker_ignores_stale_assignment() {
        let mut agent = agent();
        agent.handle_message(
            assignment(TaskPhase::Map, 0, Some("pg-00.txt"))
                .with_artifacts(vec![Artifact::new("pg-00.txt", "x")]),
        );
        agent.handle_message(assignment(TaskPhase::Map, 1, Some("pg-01.txt")));
        assert_eq!(agent.task_index(), 0, "second assignment ignored");
    }

    #[test]
    fn idle_worker_keeps_retrying_with_staged_artifacts() {
        let mut agent = agent();
        agent.handle_message(
            assignment(TaskPhase::Map, 0, Some("pg-00.txt"))
                .with_artifacts(vec![Artifact::new("pg-00.txt", "x")]),
        );
        agent.tick(Duration::from_millis(agent.timing.exec_time_ms));
        agent.take_outbox();

        // No directive arrives; the next report repeats the completion.
        agent.tick(Duration::from_millis(agent.timing.report_interval_ms));
        let out = agent.take_outbox();
        assert_eq!(out.len(), 3);
        assert_eq!(
            out[0].message,
            Message::TaskFinished {
                finished: Some((TaskPhase::Map, 0))
            }
        );
        assert_eq!(out[0].artifacts.len(), 3);
    }

    #[test]
    fn exit_retires_permanently() {
        let mut agent = agent();
        agent.handle_message(Envelope::new(0, 3, Message::Exit));
        assert!(agent.retired());

        agent.tick(Duration::from_millis(1000));
        assert!(agent.take_outbox().is_empty(), "a retired worker is silent");

        agent.handle_message(assignment(TaskPhase::Map, 0, Some("pg-00.txt")));
        assert_eq!(agent.task_index(), -1);
    }

    #[test]
    fn wait_leaves_retry_cadence_running() {
        let mut agent = agent();
        agent.tick(Duration::from_millis(1));
        agent.take_outbox();
        agent.handle_message(Envelope::new(0, 3, Message::Wait));

        agent.tick(Duration::from_millis(agent.timing.report_interval_ms));
        assert_eq!(agent.take_outbox().len(), 3);
    }
}
