//! Behavioural tests for the executor.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::cache::CacheManager;
    use crate::errors::{RecflowError, Result};
    use crate::executor::{
        estimate_size, get_stage_path, Executor, FsRecordLoader, MockRecordLoader, RecordLoader,
    };
    use crate::model::{
        reduce, CacheConfig, CacheMap, CachePolicy, InputSource, PipelineAction, PipelineState,
        StageConfig,
    };
    use crate::record::Record;
    use crate::testing::{
        assert_cached, assert_field_values, assert_not_cached, assert_record_count,
        cached_result, x_records, MockOperationFactory, PipelineFixture, StaticLoader,
    };

    const INPUT: &str = "input.jsonl";

    struct Harness {
        factory: Arc<MockOperationFactory>,
        loader: Arc<StaticLoader>,
        executor: Executor,
    }

    fn harness(loader: StaticLoader) -> Harness {
        let factory = Arc::new(MockOperationFactory::new());
        let loader = Arc::new(loader);
        let executor = Executor::new(factory.clone(), loader.clone());
        Harness {
            factory,
            loader,
            executor,
        }
    }

    fn x_input() -> StaticLoader {
        StaticLoader::new().with_records(INPUT, &x_records(&[5, 1, 3]))
    }

    fn grep_sort() -> PipelineFixture {
        PipelineFixture::new()
            .with_file_input(INPUT)
            .with_stage("grep", &["{{x}} > 1"])
            .with_stage("sort", &["--key", "x=n"])
    }

    fn xs(values: &[i64]) -> Vec<serde_json::Value> {
        values.iter().map(|v| json!(v)).collect()
    }

    #[tokio::test]
    async fn test_grep_then_sort() {
        let h = harness(x_input());
        let fixture = grep_sort();
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let result = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_record_count(&result, 2);
        assert_field_values(&result, "x", &xs(&[3, 5]));
        assert_eq!(result.field_names, vec!["x"]);
        assert_cached(&state, &ids[0]);
        assert_cached(&state, &ids[1]);
        assert_eq!(h.loader.load_count(), 1);

        // Disable the grep, drop the cache and run again.
        let toggled = reduce(
            &Arc::new(state),
            PipelineAction::ToggleStage {
                stage_id: ids[0].clone(),
            },
        );
        let mut state = PipelineState::clone(&toggled);
        state.cache.clear();

        let result = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_record_count(&result, 3);
        assert_field_values(&result, "x", &xs(&[1, 3, 5]));
    }

    #[tokio::test]
    async fn test_rerun_is_a_pure_cache_read() {
        let h = harness(x_input());
        let fixture = grep_sort();
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let first = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_eq!(h.factory.creation_count(), 2);
        h.factory.reset();

        let second = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_eq!(h.factory.creation_count(), 0);
        assert_eq!(h.loader.load_count(), 1);
        assert_eq!(first.records, second.records);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_downstream_invalidation_reuses_upstream() {
        let h = harness(x_input());
        let fixture = grep_sort();
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        h.factory.reset();

        let updated = reduce(
            &Arc::new(state),
            PipelineAction::UpdateStageArgs {
                stage_id: ids[1].clone(),
                args: vec!["--key".to_string(), "x=-n".to_string()],
            },
        );
        let mut state = PipelineState::clone(&updated);
        assert_cached(&state, &ids[0]);
        assert_not_cached(&state, &ids[1]);

        let result = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_field_values(&result, "x", &xs(&[5, 3]));
        assert_eq!(h.factory.creations_of("grep"), 0);
        assert_eq!(h.factory.creations_of("sort"), 1);
        assert_eq!(h.loader.load_count(), 1, "input is not reloaded");
    }

    #[tokio::test]
    async fn test_disabled_stage_equals_removed_stage() {
        let h = harness(x_input());

        let with_disabled = PipelineFixture::new()
            .with_file_input(INPUT)
            .with_stage("grep", &["x > 1"])
            .with_disabled_stage("head", &["-n", "1"])
            .with_stage("sort", &["--key", "x=n"]);
        let target = with_disabled.stage_ids()[2].clone();
        let mut state = with_disabled.into_state();
        let disabled = h.executor.execute_to_stage(&mut state, &target).await.unwrap();

        let removed = PipelineFixture::new()
            .with_file_input(INPUT)
            .with_stage("grep", &["x > 1"])
            .with_stage("sort", &["--key", "x=n"]);
        let target = removed.stage_ids()[1].clone();
        let mut state = removed.into_state();
        let plain = h.executor.execute_to_stage(&mut state, &target).await.unwrap();

        assert_eq!(disabled.records, plain.records);
        assert_eq!(h.factory.creations_of("head"), 0);
    }

    #[tokio::test]
    async fn test_disabled_target_yields_upstream_output() {
        let h = harness(x_input());
        let fixture = PipelineFixture::new()
            .with_file_input(INPUT)
            .with_stage("grep", &["x > 1"])
            .with_disabled_stage("sort", &[]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let result = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_eq!(result.stage_id, ids[1]);
        assert_field_values(&result, "x", &xs(&[5, 3]));
        assert_eq!(result.field_names, vec!["x"]);
        assert_cached(&state, &ids[1]);
    }

    #[tokio::test]
    async fn test_all_disabled_passes_input_through() {
        let h = harness(x_input());
        let fixture = PipelineFixture::new()
            .with_file_input(INPUT)
            .with_disabled_stage("grep", &["x > 1"]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let result = h.executor.execute_to_stage(&mut state, &ids[0]).await.unwrap();
        assert_field_values(&result, "x", &xs(&[5, 1, 3]));
        assert_eq!(h.factory.creation_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_stage() {
        let h = harness(x_input());
        let mut state = grep_sort().into_state();
        let err = h.executor.execute_to_stage(&mut state, "missing").await.unwrap_err();
        assert!(matches!(err, RecflowError::StageNotFound(ref id) if id == "missing"));
        assert_eq!(err.to_string(), "Stage missing not found in pipeline");
    }

    #[tokio::test]
    async fn test_missing_active_input() {
        let h = harness(x_input());
        let fixture = PipelineFixture::new().with_stage("grep", &["x > 1"]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let err = h.executor.execute_to_stage(&mut state, &ids[0]).await.unwrap_err();
        assert!(matches!(err, RecflowError::InputNotFound(_)));
        assert_eq!(h.factory.creation_count(), 0);
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_self_contained_needs_no_input() {
        let mut loader = MockRecordLoader::new();
        loader.expect_load_records().times(0);
        loader.expect_load_content().times(0);
        let factory = Arc::new(MockOperationFactory::new());
        let executor = Executor::new(factory.clone(), Arc::new(loader));

        let fixture = PipelineFixture::new()
            .with_stage("fromps", &[])
            .with_stage("sort", &["--key", "pid=-n"]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let result = executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_field_values(&result, "pid", &xs(&[314, 42, 1]));
        assert_eq!(result.field_names, vec!["pid", "command"]);
    }

    #[tokio::test]
    async fn test_input_operation_without_input_fails_before_running() {
        let h = harness(StaticLoader::new());
        let fixture = PipelineFixture::new()
            .with_stage("fromps", &[])
            .with_stage("fromcsv", &["--header"]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let err = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap_err();
        assert!(matches!(err, RecflowError::MissingInput { ref operation } if operation == "fromcsv"));
        assert_eq!(h.factory.creation_count(), 0);
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_operation_failure_keeps_earlier_results() {
        let h = harness(x_input());
        let fixture = PipelineFixture::new()
            .with_file_input(INPUT)
            .with_stage("grep", &["x > 1"])
            .with_stage("fail", &[])
            .with_stage("sort", &[]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let err = h.executor.execute_to_stage(&mut state, &ids[2]).await.unwrap_err();
        assert_eq!(err.failed_stage(), Some(ids[1].as_str()));
        assert!(err.to_string().contains("forced failure"));
        assert_cached(&state, &ids[0]);
        assert_not_cached(&state, &ids[1]);
        assert_not_cached(&state, &ids[2]);
        assert_eq!(h.factory.creations_of("sort"), 0);
    }

    #[tokio::test]
    async fn test_operation_creation_failure() {
        let h = harness(x_input());
        let fixture = PipelineFixture::new()
            .with_file_input(INPUT)
            .with_stage("grep", &["x ~ 1"]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let err = h.executor.execute_to_stage(&mut state, &ids[0]).await.unwrap_err();
        assert!(matches!(err, RecflowError::Operation { ref operation, .. } if operation == "grep"));
    }

    #[tokio::test]
    async fn test_bulk_content_operation() {
        let h = harness(StaticLoader::new().with_file("people.csv", "name,age\nann,30\n\nbob,25\n"));
        let fixture = PipelineFixture::new()
            .with_file_input("people.csv")
            .with_stage("fromcsv", &["--header"])
            .with_stage("grep", &["age > 26"]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let result = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_field_values(&result, "name", &[json!("ann")]);

        let parsed = crate::model::get_stage_output(&state, &ids[0]).unwrap();
        assert_eq!(parsed.record_count, 2);
        assert_eq!(parsed.field_names, vec!["name", "age"]);
        assert_eq!(h.loader.load_count(), 1);
    }

    #[tokio::test]
    async fn test_line_operation_on_file_and_captured_input() {
        let h = harness(StaticLoader::new().with_file("notes.txt", "  alpha \n\n beta\n"));
        let fixture = PipelineFixture::new()
            .with_file_input("notes.txt")
            .with_stage("fromlines", &[]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        let result = h.executor.execute_to_stage(&mut state, &ids[0]).await.unwrap();
        assert_field_values(&result, "line", &[json!("alpha"), json!("beta")]);

        let fixture = PipelineFixture::new()
            .with_captured_input(vec![Record::new().with("a", 1)])
            .with_stage("fromlines", &[]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        let result = h.executor.execute_to_stage(&mut state, &ids[0]).await.unwrap();
        assert_field_values(&result, "line", &[json!("{\"a\":1}")]);
    }

    #[tokio::test]
    async fn test_text_output_stage() {
        let h = harness(x_input());
        let fixture = PipelineFixture::new()
            .with_file_input(INPUT)
            .with_stage("grep", &["x > 1"])
            .with_stage("tocsv", &[]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let result = h.executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert!(result.is_text_output());
        assert_eq!(result.lines, vec!["x", "5", "3"]);
        assert_eq!(result.record_count, 0);

        let delta = crate::model::get_stage_delta(&state, &ids[1]).unwrap();
        assert!(delta.is_text_output);
        assert_eq!(delta.output_count, 3);
    }

    #[tokio::test]
    async fn test_head_stops_feeding() {
        let h = harness(x_input());
        let fixture = PipelineFixture::new()
            .with_file_input(INPUT)
            .with_stage("head", &["-n", "1"]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let result = h.executor.execute_to_stage(&mut state, &ids[0]).await.unwrap();
        assert_field_values(&result, "x", &xs(&[5]));
    }

    #[tokio::test]
    async fn test_working_cache_leaves_state_untouched() {
        let h = harness(x_input());
        let fixture = grep_sort();
        let ids = fixture.stage_ids();

        let mut working = CacheMap::new();
        let result = h
            .executor
            .execute_to_stage_with(fixture.state(), &ids[1], &mut working)
            .await
            .unwrap();
        assert_eq!(result.record_count, 2);
        assert_eq!(working.len(), 2);
        assert!(fixture.state().cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_manager_as_working_cache() {
        let h = harness(x_input());
        let fixture = grep_sort();
        let ids = fixture.stage_ids();

        let mut manager = CacheManager::new(&CacheConfig::default(), None);
        h.executor
            .execute_to_stage_with(fixture.state(), &ids[1], &mut manager)
            .await
            .unwrap();
        assert_eq!(manager.len(), 2);
        assert!(manager.memory_usage_bytes() > 0);

        let mut refusing = CacheManager::new(
            &CacheConfig {
                cache_policy: CachePolicy::None,
                ..CacheConfig::default()
            },
            None,
        );
        let result = h
            .executor
            .execute_to_stage_with(fixture.state(), &ids[1], &mut refusing)
            .await
            .unwrap();
        assert_field_values(&result, "x", &xs(&[3, 5]));
        assert!(refusing.is_empty());
    }

    #[tokio::test]
    async fn test_mock_loader_called_once() {
        let mut loader = MockRecordLoader::new();
        loader
            .expect_load_records()
            .withf(|input| input.label == INPUT)
            .times(1)
            .returning(|_| Ok(x_records(&[5, 1, 3])));
        let executor = Executor::new(Arc::new(MockOperationFactory::new()), Arc::new(loader));

        let fixture = grep_sort();
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        executor.execute_to_stage(&mut state, &ids[0]).await.unwrap();
        let result = executor.execute_to_stage(&mut state, &ids[1]).await.unwrap();
        assert_field_values(&result, "x", &xs(&[3, 5]));
    }

    #[tokio::test]
    async fn test_fs_loader_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        std::fs::write(&path, "{\"x\":5}\n{\"x\":1}\n{\"x\":3}\n").unwrap();

        let executor = Executor::new(
            Arc::new(MockOperationFactory::new()),
            Arc::new(FsRecordLoader::new()),
        );
        let fixture = PipelineFixture::new()
            .with_file_input(&path)
            .with_stage("sort", &["--key", "x=n"]);
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();

        let result = executor.execute_to_stage(&mut state, &ids[0]).await.unwrap();
        assert_field_values(&result, "x", &xs(&[1, 3, 5]));
        assert!(result.size_bytes > 0);
        assert!(result.compute_time_ms >= 0.0);
    }

    /// Loader that never finishes in test time.
    struct StalledLoader;

    #[async_trait]
    impl RecordLoader for StalledLoader {
        async fn load_records(&self, _input: &InputSource) -> Result<Vec<Record>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn load_content(&self, _input: &InputSource) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_dropped_execution_keeps_existing_cache() {
        let executor = Executor::new(Arc::new(MockOperationFactory::new()), Arc::new(StalledLoader));
        let fixture = grep_sort();
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        let unrelated = cached_result("other-input", "other-stage", 1, 10);
        state
            .cache
            .insert(unrelated.key.clone(), Arc::new(unrelated));

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            executor.execute_to_stage(&mut state, &ids[0]),
        )
        .await;
        assert!(outcome.is_err(), "execution should still be waiting on input");

        assert_eq!(state.cache.len(), 1);
        assert!(state.cache.contains_key("other-input:other-stage"));
    }

    #[tokio::test]
    async fn test_dropped_execution_keeps_finished_stages() {
        let h = harness(x_input());
        let fixture = grep_sort();
        let ids = fixture.stage_ids();
        let mut state = fixture.into_state();
        h.executor.execute_to_stage(&mut state, &ids[0]).await.unwrap();

        let stalled = Executor::new(Arc::new(MockOperationFactory::new()), Arc::new(StalledLoader));
        let extended = reduce(
            &Arc::new(state),
            PipelineAction::AddStage {
                after_stage_id: None,
                config: StageConfig::new("fromcsv", ["--header"]),
            },
        );
        let mut state = PipelineState::clone(&extended);
        let target = state.cursor_stage_id.clone().unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            stalled.execute_to_stage(&mut state, &target),
        )
        .await;
        assert!(outcome.is_err());
        assert_cached(&state, &ids[0]);
        assert_cached(&state, &ids[1]);
        assert_not_cached(&state, &target);
    }

    #[test]
    fn test_stage_path_follows_parents() {
        let fixture = grep_sort().with_stage("tocsv", &[]);
        let ids = fixture.stage_ids();
        let path: Vec<_> = get_stage_path(fixture.state(), &ids[2])
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(path, ids);
        assert!(get_stage_path(fixture.state(), "nope").is_empty());
    }

    #[test]
    fn test_estimate_size() {
        assert_eq!(estimate_size(&[]), 0);
        // `{"x":5}` is 7 characters, counted twice.
        assert_eq!(estimate_size(&x_records(&[5, 1, 3])), 42);
    }
}
