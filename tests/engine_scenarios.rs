use motiflab::{
    Engine, EngineError,
    cancel::CancellationToken,
    client::{Client, run_with_retry},
    config::EngineConfig,
    data::{Collection, DataKind, DataObject, Motif, Module, NumericVariable, Sequence, TextVariable},
    notify::{DataListener, LogLevel, MessageListener, MessageRecorder},
    session::SessionError,
    task::{Task, TaskContext, TaskError},
};
use motiflab_protocol::{RetryPolicy, TaskStatus};
use parking_lot::Mutex;
use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

fn seq(name: &str) -> DataObject {
    DataObject::Sequence(Sequence::new(name, "chr1", 1_000, 2_000))
}

fn registry_dump(engine: &Engine) -> Vec<DataObject> {
    let mut all: Vec<DataObject> = DataKind::ALL
        .iter()
        .flat_map(|k| engine.all_of_kind(*k))
        .collect();
    all.sort_by(|a, b| a.name().cmp(b.name()));
    all
}

#[test]
fn stored_sequence_joins_default_collection() {
    let engine = Engine::new();
    engine.store(seq("seq1")).unwrap();
    assert_eq!(engine.default_collection().members(), &["seq1".to_string()]);
}

#[test]
fn motif_name_can_not_be_taken_by_module() {
    let engine = Engine::new();
    engine
        .store(DataObject::Motif(Motif::from_consensus("X", "TGASTCA")))
        .unwrap();
    let before = registry_dump(&engine);
    let err = engine
        .store(DataObject::Module(Module::new("X", vec!["X".to_string()])))
        .unwrap_err();
    assert!(matches!(err, EngineError::TypeConflict { .. }));
    assert_eq!(engine.get("X").map(|o| o.kind()), Some(DataKind::Motif));
    assert_eq!(registry_dump(&engine), before);
}

#[test]
fn remove_is_refused_while_updates_are_disabled() {
    let engine = Engine::new();
    engine.store(seq("seq1")).unwrap();
    engine.set_updates_allowed(false);
    assert!(matches!(engine.remove("seq1"), Err(EngineError::UpdatesDisabled)));
    assert!(engine.get("seq1").is_some());
}

#[test]
fn restored_collection_resolves_its_members() {
    let engine = Engine::new();
    engine.store(seq("seq1")).unwrap();
    engine
        .store(DataObject::SequenceCollection(Collection::with_members(
            "Promoters",
            ["seq1"],
        )))
        .unwrap();
    let mut buf = Vec::new();
    engine.save_session(&mut buf).unwrap();

    let restored = Engine::new();
    restored
        .load_session(Cursor::new(buf), &CancellationToken::new())
        .unwrap();
    let members: Vec<String> = restored
        .resolve_members("Promoters")
        .iter()
        .map(|o| o.name().to_string())
        .collect();
    assert_eq!(members, vec!["seq1".to_string()]);
}

#[test]
fn newer_session_format_is_refused_without_side_effects() {
    let writer = Engine::new();
    writer.store(seq("seq1")).unwrap();
    let mut buf = Vec::new();
    writer.save_session(&mut buf).unwrap();

    let mut config = EngineConfig::default();
    config.max_session_format = 2;
    let reader = Engine::with_config(config);
    reader.store(seq("local")).unwrap();
    let before = registry_dump(&reader);

    let err = reader
        .load_session(Cursor::new(buf), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Session(SessionError::NeedsNewerVersion { found: 3, supported: 2 })
    ));
    assert!(err.to_string().contains("newer version"));
    assert_eq!(registry_dump(&reader), before);
}

#[test]
fn removed_member_stays_gone_after_round_trip() {
    let engine = Engine::new();
    engine.store(seq("seq1")).unwrap();
    engine.store(seq("seq2")).unwrap();
    engine
        .store(DataObject::SequenceCollection(Collection::with_members(
            "Set1",
            ["seq1", "seq2"],
        )))
        .unwrap();
    engine.remove("seq1").unwrap();

    let mut buf = Vec::new();
    engine.save_session(&mut buf).unwrap();
    let restored = Engine::new();
    restored
        .load_session(Cursor::new(buf), &CancellationToken::new())
        .unwrap();
    assert_eq!(registry_dump(&restored), registry_dump(&engine));
    assert_eq!(
        restored.get("Set1"),
        Some(DataObject::SequenceCollection(Collection::with_members("Set1", ["seq2"])))
    );
}

struct DecliningClient {
    asked: AtomicUsize,
    errors: AtomicUsize,
}

impl MessageListener for DecliningClient {
    fn error_message(&self, _message: &str, _code: i32) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn log_message(&self, _message: &str, _level: LogLevel) {}
}

impl Client for DecliningClient {
    fn prompt_value(&self, _data: &DataObject) -> Option<String> {
        None
    }

    fn should_retry(&self, _task_name: &str, _error: &EngineError) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        false
    }
}

fn failing_task() -> Task {
    Task::new("fetch", |_ctx: &mut TaskContext<'_>| -> Result<(), TaskError> {
        Err(TaskError::execution("server did not answer"))
    })
}

#[test]
fn declined_prompt_retry_reports_failure_once() {
    let engine = Engine::new();
    let client = Arc::new(DecliningClient {
        asked: AtomicUsize::new(0),
        errors: AtomicUsize::new(0),
    });
    engine.set_client(Some(client.clone()));

    let err = run_with_retry(&engine, RetryPolicy::PromptRetry, failing_task).unwrap_err();
    assert!(matches!(err, EngineError::Execution(_)));
    assert_eq!(client.asked.load(Ordering::SeqCst), 1);
    assert_eq!(client.errors.load(Ordering::SeqCst), 1);

    let mut task = failing_task();
    assert!(engine.execute_task(&mut task).is_err());
    assert_eq!(task.status(), TaskStatus::Error);
    assert_eq!(client.errors.load(Ordering::SeqCst), 2);
}

#[test]
fn do_not_retry_never_asks_the_client() {
    let engine = Engine::new();
    let client = Arc::new(DecliningClient {
        asked: AtomicUsize::new(0),
        errors: AtomicUsize::new(0),
    });
    engine.set_client(Some(client.clone()));
    let attempts = AtomicUsize::new(0);
    let result = run_with_retry(&engine, RetryPolicy::DoNotRetry, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        failing_task()
    });
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(client.asked.load(Ordering::SeqCst), 0);
}

#[test]
fn delayed_retry_blocks_before_retrying() {
    let engine = Engine::new();
    engine.set_parameter("max_auto_retries", "1").unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let started = Instant::now();
    let task = run_with_retry(&engine, RetryPolicy::Delay(1), move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        Task::new("flaky", move |_ctx: &mut TaskContext<'_>| -> Result<(), TaskError> {
            if attempt == 0 {
                Err(TaskError::execution("first attempt fails"))
            } else {
                Ok(())
            }
        })
    })
    .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(task.status(), TaskStatus::Done);
}

#[test]
fn cancelled_task_is_not_retried() {
    let engine = Engine::new();
    let attempts = AtomicUsize::new(0);
    let result = run_with_retry(&engine, RetryPolicy::Delay(0), || {
        attempts.fetch_add(1, Ordering::SeqCst);
        Task::new("stop", |ctx: &mut TaskContext<'_>| -> Result<(), TaskError> {
            ctx.cancellation().cancel();
            ctx.check_cancelled()
        })
    });
    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn round_trip_preserves_every_persistent_object() {
    let engine = Engine::new();
    for name in ["seq1", "seq2", "seq3"] {
        engine.store(seq(name)).unwrap();
    }
    engine
        .store(DataObject::Motif(Motif::from_consensus("AP1", "TGASTCA")))
        .unwrap();
    engine
        .store(DataObject::Motif(Motif::from_consensus("CREB", "TGACGTCA")))
        .unwrap();
    engine
        .store(DataObject::Module(Module::new(
            "Pair",
            vec!["AP1".to_string(), "CREB".to_string()],
        )))
        .unwrap();
    engine
        .store(DataObject::MotifCollection(Collection::with_members(
            "bZIP",
            ["CREB", "AP1"],
        )))
        .unwrap();
    engine
        .store(DataObject::ModuleCollection(Collection::with_members("Mods", ["Pair"])))
        .unwrap();
    engine
        .store(DataObject::TextVariable(TextVariable::new(
            "notes",
            vec!["first".to_string(), "second".to_string()],
        )))
        .unwrap();
    engine
        .store(DataObject::NumericVariable(NumericVariable::new("threshold", 0.85)))
        .unwrap();
    engine.rename("seq3", "seq9").unwrap();
    engine.remove("seq2").unwrap();
    engine
        .update(DataObject::NumericVariable(NumericVariable::new("threshold", 0.9)))
        .unwrap();
    engine
        .store(DataObject::NumericVariable(NumericVariable::new("_temp_scratch", 1.0)))
        .unwrap();

    let mut buf = Vec::new();
    engine.save_session(&mut buf).unwrap();
    let restored = Engine::new();
    restored
        .load_session(Cursor::new(buf), &CancellationToken::new())
        .unwrap();

    let expected: Vec<DataObject> = registry_dump(&engine)
        .into_iter()
        .filter(|o| !o.is_temporary())
        .collect();
    assert_eq!(registry_dump(&restored), expected);
    assert_eq!(
        restored.default_collection().members(),
        engine.default_collection().members()
    );
}

struct Juggler {
    engine: Arc<Engine>,
    newcomer: Arc<dyn DataListener>,
    me: Mutex<Option<Arc<dyn DataListener>>>,
}

impl DataListener for Juggler {
    fn data_added(&self, _data: &DataObject) {
        self.engine.add_data_listener(self.newcomer.clone());
        if let Some(me) = self.me.lock().take() {
            self.engine.remove_data_listener(&me);
        }
    }
}

#[derive(Default)]
struct Count(AtomicUsize);

impl DataListener for Count {
    fn data_added(&self, _data: &DataObject) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn listener_changes_inside_callbacks_are_safe() {
    let engine = Arc::new(Engine::new());
    let before = Arc::new(Count::default());
    let after = Arc::new(Count::default());
    let newcomer = Arc::new(Count::default());
    let juggler = Arc::new(Juggler {
        engine: engine.clone(),
        newcomer: newcomer.clone(),
        me: Mutex::new(None),
    });
    let juggler_dyn: Arc<dyn DataListener> = juggler.clone();
    *juggler.me.lock() = Some(juggler_dyn.clone());

    engine.add_data_listener(before.clone());
    engine.add_data_listener(juggler_dyn);
    engine.add_data_listener(after.clone());
    engine
        .store(DataObject::NumericVariable(NumericVariable::new("a", 1.0)))
        .unwrap();

    assert_eq!(before.0.load(Ordering::SeqCst), 1);
    assert_eq!(after.0.load(Ordering::SeqCst), 1);
    assert_eq!(newcomer.0.load(Ordering::SeqCst), 0);
    assert_eq!(engine.bus().data_listener_count(), 3);
}

#[test]
fn load_text_operation_reads_file_into_variable() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("genes.txt");
    std::fs::write(&path, "FOS\nJUN\nATF3\n").unwrap();

    let engine = Engine::new();
    let recorder = Arc::new(MessageRecorder::new());
    engine.add_message_listener(recorder.clone());
    let step = motiflab::protocol::ProtocolStep::new("load_text")
        .with_target("genes")
        .with_param("path", path.to_str().unwrap());
    let mut task = Task::for_step(step);
    engine.execute_task(&mut task).unwrap();
    match engine.get("genes") {
        Some(DataObject::TextVariable(t)) => assert_eq!(t.lines, vec!["FOS", "JUN", "ATF3"]),
        other => panic!("unexpected object {other:?}"),
    }
    assert!(recorder.count("status") >= 1);
}

#[test]
fn delete_operation_accepts_numbered_ranges() {
    let engine = Engine::new();
    for i in 1..=5 {
        engine.store(seq(&format!("seq{i}"))).unwrap();
    }
    let step = motiflab::protocol::ProtocolStep::new("delete").with_source("seq[2-4], seq5");
    let mut task = Task::for_step(step);
    engine.execute_task(&mut task).unwrap();
    assert_eq!(engine.names_of_kind(DataKind::Sequence), vec!["seq1".to_string()]);
    assert_eq!(engine.default_collection().members(), &["seq1".to_string()]);
}

struct Answering(&'static str);

impl MessageListener for Answering {
    fn error_message(&self, _message: &str, _code: i32) {}
    fn log_message(&self, _message: &str, _level: LogLevel) {}
}

impl Client for Answering {
    fn prompt_value(&self, _data: &DataObject) -> Option<String> {
        Some(self.0.to_string())
    }

    fn should_retry(&self, _task_name: &str, _error: &EngineError) -> bool {
        false
    }
}

#[test]
fn prompt_operation_updates_value_from_client() {
    let engine = Engine::new();
    engine
        .store(DataObject::NumericVariable(NumericVariable::new("cutoff", 1.0)))
        .unwrap();
    engine.set_client(Some(Arc::new(Answering("4.5"))));
    let mut task = Task::for_step(motiflab::protocol::ProtocolStep::new("prompt").with_source("cutoff"));
    engine.execute_task(&mut task).unwrap();
    assert_eq!(
        engine.get("cutoff"),
        Some(DataObject::NumericVariable(NumericVariable::new("cutoff", 4.5)))
    );

    engine.set_client(None);
    let mut task = Task::for_step(motiflab::protocol::ProtocolStep::new("prompt").with_source("cutoff"));
    assert!(engine.execute_task(&mut task).is_err());
    assert_eq!(task.status(), TaskStatus::Error);
}
