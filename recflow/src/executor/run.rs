//! Incremental execution of a fork's stage path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn, Instrument};

use super::loader::{records_to_jsonl, RecordLoader};
use super::operation::{
    is_input_operation, is_self_contained, InputShape, Operation, OperationFactory, ReceiverHandle,
};
use super::receiver::InterceptReceiver;
use crate::cache::{composite_key, ResultCache};
use crate::errors::{RecflowError, Result};
use crate::model::{
    CachedResult, InputId, InputSource, InputSourceKind, PipelineState, Stage, StageId,
};
use crate::observability::execution_span;
use crate::record::Record;
use crate::utils::now_millis;

/// Number of records serialized when estimating a result's size.
const SIZE_SAMPLE: usize = 10;

/// Runs stage paths, reusing cached upstream results.
pub struct Executor {
    factory: Arc<dyn OperationFactory>,
    loader: Arc<dyn RecordLoader>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub fn new(factory: Arc<dyn OperationFactory>, loader: Arc<dyn RecordLoader>) -> Self {
        Self { factory, loader }
    }

    /// Produces the target stage's output, writing every computed stage
    /// into `state.cache`.
    ///
    /// Dropping the future part way leaves `state.cache` holding everything
    /// it held before plus the stages finished so far.
    pub async fn execute_to_stage(
        &self,
        state: &mut PipelineState,
        target_stage_id: &str,
    ) -> Result<Arc<CachedResult>> {
        let PipelineState {
            stages,
            inputs,
            active_input_id,
            cache,
            ..
        } = state;
        let view = ExecutionView {
            stages: &*stages,
            inputs: &*inputs,
            active_input_id: active_input_id.as_str(),
        };
        self.execute_in(view, target_stage_id, cache).await
    }

    /// Produces the target stage's output using `cache` as the working
    /// cache. `state` is only read.
    ///
    /// Stages before the deepest cached one are not re-run. On an
    /// operation failure the results of earlier stages stay in `cache`.
    pub async fn execute_to_stage_with<C>(
        &self,
        state: &PipelineState,
        target_stage_id: &str,
        cache: &mut C,
    ) -> Result<Arc<CachedResult>>
    where
        C: ResultCache + ?Sized + Send,
    {
        self.execute_in(ExecutionView::of(state), target_stage_id, cache)
            .await
    }

    async fn execute_in<C>(
        &self,
        view: ExecutionView<'_>,
        target_stage_id: &str,
        cache: &mut C,
    ) -> Result<Arc<CachedResult>>
    where
        C: ResultCache + ?Sized + Send,
    {
        let span = execution_span(target_stage_id, view.active_input_id);
        self.run(view, target_stage_id, cache).instrument(span).await
    }

    async fn run<C>(
        &self,
        view: ExecutionView<'_>,
        target_stage_id: &str,
        cache: &mut C,
    ) -> Result<Arc<CachedResult>>
    where
        C: ResultCache + ?Sized + Send,
    {
        let started = Instant::now();
        let path = stage_path(view.stages, target_stage_id);
        if path.is_empty() {
            return Err(RecflowError::StageNotFound(target_stage_id.to_string()));
        }

        let input_id = view.active_input_id;
        let input = view.inputs.get(input_id);
        let first_enabled = path.iter().copied().find(|s| s.config.enabled);

        let needs_input = first_enabled.map_or(true, |s| !is_self_contained(&s.config.operation_name));
        if needs_input && input.is_none() {
            return Err(RecflowError::InputNotFound(input_id.to_string()));
        }

        // Deepest cached stage first.
        let mut resumed = None;
        for (index, stage) in path.iter().enumerate().rev() {
            if let Some(hit) = cache.lookup(input_id, &stage.id) {
                resumed = Some((index, hit));
                break;
            }
        }

        let start_index = resumed.as_ref().map_or(0, |(index, _)| index + 1);

        if input.is_none() {
            if let Some(stage) = path[start_index..].iter().find(|s| {
                s.config.enabled
                    && is_input_operation(&s.config.operation_name)
                    && !is_self_contained(&s.config.operation_name)
            }) {
                return Err(RecflowError::MissingInput {
                    operation: stage.config.operation_name.clone(),
                });
            }
        }

        let mut feed = InputFeed::new(self.loader.as_ref(), input);
        let (mut current, mut last) = match resumed {
            Some((index, hit)) => {
                debug!(stage_id = %path[index].id, index, "Resuming from cached stage");
                (hit.records.clone(), Some(hit))
            }
            None => {
                let lead = first_enabled.unwrap_or(path[0]);
                if is_input_operation(&lead.config.operation_name) {
                    (Vec::new(), None)
                } else {
                    (feed.records(&lead.config.operation_name).await?.to_vec(), None)
                }
            }
        };

        for stage in &path[start_index..] {
            if !stage.config.enabled {
                debug!(stage_id = %stage.id, "Passing records through disabled stage");
                last = None;
                continue;
            }

            let stage_started = Instant::now();
            let result = self
                .run_stage(stage, input_id, &current, &mut feed, started)
                .await
                .inspect_err(|err| warn!(stage_id = %stage.id, error = %err, "Stage failed"))?;

            debug!(
                stage_id = %stage.id,
                operation = %stage.config.operation_name,
                records = result.record_count,
                elapsed_ms = stage_started.elapsed().as_secs_f64() * 1000.0,
                "Stage executed"
            );

            current.clone_from(&result.records);
            let result = Arc::new(result);
            cache.store(Arc::clone(&result));
            last = Some(result);
        }

        if let Some(result) = last.filter(|r| r.stage_id == target_stage_id) {
            return Ok(result);
        }

        // The target is disabled: its output is whatever survived upstream.
        let result = Arc::new(build_result(
            input_id,
            target_stage_id,
            current,
            Vec::new(),
            None,
            started,
        ));
        cache.store(Arc::clone(&result));
        Ok(result)
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        input_id: &str,
        upstream: &[Record],
        feed: &mut InputFeed<'_>,
        started: Instant,
    ) -> Result<CachedResult> {
        let operation_name = stage.config.operation_name.as_str();
        let fail = |source: anyhow::Error| RecflowError::operation(&stage.id, operation_name, source);

        let receiver = Arc::new(Mutex::new(InterceptReceiver::new()));
        let handle: ReceiverHandle = receiver.clone();
        let mut operation = self
            .factory
            .create(operation_name, &stage.config.args, handle)
            .map_err(fail)?;

        match operation.input_shape() {
            InputShape::SelfContained => {}
            InputShape::BulkContent => {
                let content = feed.content(operation_name).await?;
                operation.parse_content(content).map_err(fail)?;
            }
            InputShape::Lines => {
                for line in feed.lines(operation_name).await? {
                    if !operation.accept_line(line).map_err(fail)? {
                        break;
                    }
                }
            }
            InputShape::Records if is_input_operation(operation_name) => {
                let records = feed.records(operation_name).await?;
                feed_records(operation.as_mut(), records).map_err(fail)?;
            }
            InputShape::Records => feed_records(operation.as_mut(), upstream).map_err(fail)?,
        }

        operation.finish().map_err(fail)?;
        drop(operation);

        let (records, lines, field_names) = receiver.lock().take();
        Ok(build_result(
            input_id,
            &stage.id,
            records,
            lines,
            Some(field_names),
            started,
        ))
    }
}

/// The parts of a state an execution reads.
#[derive(Clone, Copy)]
struct ExecutionView<'a> {
    stages: &'a HashMap<StageId, Stage>,
    inputs: &'a HashMap<InputId, InputSource>,
    active_input_id: &'a str,
}

impl<'a> ExecutionView<'a> {
    fn of(state: &'a PipelineState) -> Self {
        Self {
            stages: &state.stages,
            inputs: &state.inputs,
            active_input_id: &state.active_input_id,
        }
    }
}

fn feed_records(operation: &mut dyn Operation, records: &[Record]) -> anyhow::Result<()> {
    for record in records {
        if !operation.accept_record(record)? {
            break;
        }
    }
    Ok(())
}

/// Input data for one execution, loaded at most once per form.
struct InputFeed<'a> {
    loader: &'a dyn RecordLoader,
    input: Option<&'a InputSource>,
    records: Option<Vec<Record>>,
    content: Option<String>,
    lines: Option<Vec<String>>,
}

impl<'a> InputFeed<'a> {
    fn new(loader: &'a dyn RecordLoader, input: Option<&'a InputSource>) -> Self {
        Self {
            loader,
            input,
            records: None,
            content: None,
            lines: None,
        }
    }

    fn require(&self, operation_name: &str) -> Result<&'a InputSource> {
        self.input.ok_or_else(|| RecflowError::MissingInput {
            operation: operation_name.to_string(),
        })
    }

    async fn records(&mut self, operation_name: &str) -> Result<&[Record]> {
        if self.records.is_none() {
            let input = self.require(operation_name)?;
            self.records = Some(self.loader.load_records(input).await?);
        }
        Ok(self.records.as_deref().unwrap_or_default())
    }

    async fn content(&mut self, operation_name: &str) -> Result<&str> {
        if self.content.is_none() {
            let input = self.require(operation_name)?;
            self.content = Some(self.loader.load_content(input).await?);
        }
        Ok(self.content.as_deref().unwrap_or_default())
    }

    /// Trimmed non-empty lines of a file input, or one JSON line per
    /// captured record.
    async fn lines(&mut self, operation_name: &str) -> Result<&[String]> {
        if self.lines.is_none() {
            let input = self.require(operation_name)?;
            let lines = match &input.source {
                InputSourceKind::File { .. } => self
                    .content(operation_name)
                    .await?
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
                InputSourceKind::Captured { records } => {
                    records_to_jsonl(records).lines().map(str::to_string).collect()
                }
            };
            self.lines = Some(lines);
        }
        Ok(self.lines.as_deref().unwrap_or_default())
    }
}

/// Walks `parent_id` links from the target back to the root.
///
/// Returns an empty path for an unknown target.
#[must_use]
pub fn get_stage_path<'a>(state: &'a PipelineState, target_stage_id: &str) -> Vec<&'a Stage> {
    stage_path(&state.stages, target_stage_id)
}

fn stage_path<'a>(stages: &'a HashMap<StageId, Stage>, target_stage_id: &str) -> Vec<&'a Stage> {
    let mut path = Vec::new();
    let mut current = stages.get(target_stage_id);
    while let Some(stage) = current {
        if path.len() > stages.len() {
            break;
        }
        path.push(stage);
        current = stage.parent_id.as_ref().and_then(|id| stages.get(id));
    }
    path.reverse();
    path
}

/// Approximates the in-memory size of `records` from a small sample.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn estimate_size(records: &[Record]) -> u64 {
    if records.is_empty() {
        return 0;
    }
    let sample = &records[..records.len().min(SIZE_SAMPLE)];
    let sampled: usize = sample.iter().map(|r| r.to_json().len() * 2).sum();
    let average = sampled as f64 / sample.len() as f64;
    (average * records.len() as f64).round() as u64
}

fn build_result(
    input_id: &str,
    stage_id: &str,
    records: Vec<Record>,
    lines: Vec<String>,
    field_names: Option<Vec<String>>,
    started: Instant,
) -> CachedResult {
    let field_names = field_names.unwrap_or_else(|| {
        let mut names: Vec<String> = Vec::new();
        for key in records.iter().flat_map(Record::keys) {
            if !names.iter().any(|n| n == key) {
                names.push(key.to_string());
            }
        }
        names
    });

    CachedResult {
        key: composite_key(input_id, stage_id),
        stage_id: stage_id.to_string(),
        input_id: input_id.to_string(),
        record_count: records.len(),
        size_bytes: estimate_size(&records),
        records,
        lines,
        spill_file: None,
        field_names,
        computed_at: now_millis(),
        compute_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}
