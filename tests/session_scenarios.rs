//! End-to-end session behaviour on both paths.

use std::sync::Arc;
use tabwright::config::RuntimeConfig;
use tabwright::persistence::FsBlobStore;
use tabwright::runtime::{PolarsRuntime, RuntimeLoader, RuntimeState};
use tabwright::{EngineConfig, EngineError, ErrorKind, ImputeMethod, Session, Table, Value};

const PEOPLE: &str = include_str!("../testdata/people.csv");

fn memory_only() -> EngineConfig {
    EngineConfig {
        runtime: RuntimeConfig {
            enabled: false,
            components: Vec::new(),
        },
        ..EngineConfig::default()
    }
}

fn single_column(name: &str, values: Vec<Value>) -> Table {
    Table::from_rows(
        vec![name.to_owned()],
        values.into_iter().map(|v| vec![v]).collect(),
    )
    .unwrap()
}

fn ages() -> Table {
    single_column(
        "age",
        [Some(25.0), None, Some(30.0), None, Some(35.0)]
            .into_iter()
            .map(Value::from)
            .collect(),
    )
}

fn numbers(table: &Table, column: &str) -> Vec<Option<f64>> {
    table
        .column_values(column)
        .unwrap()
        .iter()
        .map(Value::as_number)
        .collect()
}

async fn ready_session() -> Session {
    let session = Session::new(EngineConfig::default());
    session.start_runtime();
    assert_eq!(session.runtime().wait_settled().await, RuntimeState::Ready);
    session
}

async fn run_age_scenario(session: &Session, path: &str) {
    session.load_table(ages()).await;

    let summary = session.describe().await.unwrap();
    let age = summary.get("age").unwrap();
    assert_eq!((age.missing, age.unique), (2, 3));
    assert_eq!(age.mean, Some(30.0));
    assert_eq!((age.min, age.max), (Some(25.0), Some(35.0)));

    session
        .impute_column("age", ImputeMethod::Mean, None)
        .await
        .unwrap();
    assert_eq!(
        numbers(&session.table().await, "age"),
        vec![Some(25.0), Some(30.0), Some(30.0), Some(30.0), Some(35.0)]
    );
    assert_eq!(session.summary().await.unwrap().get("age").unwrap().missing, 0);

    session.normalize_column("age").await.unwrap();
    assert_eq!(
        numbers(&session.table().await, "age"),
        vec![Some(0.0), Some(0.5), Some(0.5), Some(0.5), Some(1.0)]
    );

    let audit = session.audit_log().await;
    let actions: Vec<&str> = audit.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, ["load_table", "impute_column", "normalize_column"]);
    assert_eq!(audit.last().unwrap().path, path);
}

#[tokio::test]
async fn age_scenario_in_memory() {
    let session = Session::new(memory_only());
    run_age_scenario(&session, "memory").await;
}

#[tokio::test]
async fn age_scenario_on_runtime() {
    let session = ready_session().await;
    run_age_scenario(&session, "runtime").await;
}

#[tokio::test]
async fn colours_encode_in_first_seen_order() {
    let session = Session::new(memory_only());
    session
        .load_table(single_column(
            "color",
            ["red", "blue", "red", "green"].map(Value::from).to_vec(),
        ))
        .await;

    let encoding = session.encode_column("color").await.unwrap();
    assert_eq!(
        encoding.categories,
        ["red", "blue", "green"].map(Value::from).to_vec()
    );
    assert_eq!(
        numbers(&session.table().await, "color"),
        vec![Some(0.0), Some(1.0), Some(0.0), Some(2.0)]
    );
}

#[tokio::test]
async fn coercion_preview_then_apply() {
    let session = Session::new(memory_only());
    session
        .load_table(single_column(
            "n",
            ["1", "2", "abc", "4"].map(Value::from).to_vec(),
        ))
        .await;

    let preview = session.preview_coerce_numeric("n").await.unwrap();
    assert_eq!((preview.total, preview.failed), (4, 1));
    assert!((preview.success_rate - 75.0).abs() < 1e-9);
    // previews never touch the table
    assert_eq!(session.generation().await, 1);

    session.coerce_column_to_numeric("n").await.unwrap();
    assert_eq!(
        numbers(&session.table().await, "n"),
        vec![Some(1.0), Some(2.0), None, Some(4.0)]
    );
}

#[tokio::test]
async fn impute_preview_leaves_table_alone() {
    let session = Session::new(memory_only());
    session.load_table(ages()).await;

    let preview = session
        .preview_imputation("age", ImputeMethod::Constant, Some(Value::from(0)))
        .await
        .unwrap();
    assert_eq!(preview.rows.len(), 5);
    let changed: Vec<usize> = preview
        .rows
        .iter()
        .filter(|r| r.before != r.after)
        .map(|r| r.row)
        .collect();
    assert_eq!(changed, [1, 3]);
    assert!(preview.rows.iter().all(|r| !r.after.is_null()));
    assert_eq!(session.table().await, ages());
    assert_eq!(session.generation().await, 1);
}

#[tokio::test]
async fn snapshot_round_trip() {
    let session = Session::new(memory_only());
    session.load_table(ages()).await;

    let snapshot = session.create_snapshot("clean").await;
    assert_eq!(snapshot.row_count, 5);
    session.drop_column("age").await.unwrap();
    assert!(!session.is_loaded().await);

    assert!(session.restore_snapshot(&snapshot).await);
    assert_eq!(session.table().await, ages());
    assert_eq!(session.audit_log().await.last().unwrap().action, "restore_snapshot");
}

#[tokio::test]
async fn snapshot_round_trip_on_runtime() {
    let session = ready_session().await;
    session.load_table(ages()).await;
    let snapshot = session.create_snapshot("clean").await;

    session
        .impute_column("age", ImputeMethod::Ffill, None)
        .await
        .unwrap();
    assert!(session.restore_snapshot(&snapshot).await);
    assert_eq!(session.table().await, ages());

    // the runtime must see the restored table, not the imputed one
    let missing = session.missing_rows("age").await.unwrap();
    assert_eq!(missing.missing, 2);
}

#[tokio::test]
async fn loading_clears_snapshots() {
    let session = Session::new(memory_only());
    session.load_table(ages()).await;
    session.normalize_column("age").await.unwrap();
    assert!(session.latest_snapshot().await.is_some());

    session.load_table(ages()).await;
    assert!(session.latest_snapshot().await.is_none());
    assert!(!session.undo().await);
}

struct BrokenLoader;

impl RuntimeLoader for BrokenLoader {
    async fn load(&self) -> anyhow::Result<PolarsRuntime> {
        anyhow::bail!("package index unreachable")
    }

    async fn install(&self, _: &mut PolarsRuntime, _: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn components(&self) -> Vec<String> {
        Vec::new()
    }
}

#[tokio::test]
async fn failed_runtime_falls_back_to_memory() {
    let session = Session::new(EngineConfig::default());
    session.start_runtime_with(BrokenLoader);
    let state = session.runtime().wait_settled().await;
    assert!(matches!(state, RuntimeState::Failed(ref reason) if reason.contains("unreachable")));

    session.load_table(ages()).await;
    session
        .impute_column("age", ImputeMethod::Median, None)
        .await
        .unwrap();
    assert_eq!(numbers(&session.table().await, "age").get(1), Some(&Some(30.0)));
    assert_eq!(session.audit_log().await.last().unwrap().path, "memory");
}

#[tokio::test]
async fn operations_before_ready_use_memory() {
    let session = Session::new(EngineConfig::default());
    session.load_table(ages()).await;
    // not started: every call goes through the in-memory path
    assert_eq!(session.runtime_state(), RuntimeState::Idle);
    session.normalize_column("age").await.unwrap();
    assert_eq!(session.audit_log().await.last().unwrap().path, "memory");
}

#[tokio::test]
async fn errors_are_recorded_not_fatal() {
    let session = Session::new(memory_only());
    session.load_table(ages()).await;

    let err = session.normalize_column("height").await.unwrap_err();
    assert!(matches!(err, EngineError::ColumnNotFound(_)));
    assert_eq!(session.last_error().unwrap().kind, ErrorKind::ColumnNotFound);

    // the session keeps working after a failure
    session.encode_column("age").await.unwrap();
    assert_eq!(session.table().await.row_count(), 5);
}

#[tokio::test]
async fn csv_text_is_trimmed_on_load() {
    let session = Session::new(memory_only());
    session
        .load_csv_text("name,city\n  Ann ,Oslo \nBo,  Rome\n")
        .await
        .unwrap();
    let table = session.table().await;
    assert_eq!(
        table.column_values("name").unwrap(),
        ["Ann", "Bo"].map(Value::from).to_vec()
    );
    assert_eq!(
        table.column_values("city").unwrap(),
        ["Oslo", "Rome"].map(Value::from).to_vec()
    );
}

#[tokio::test]
async fn fixture_loads_and_reports_missing_rows() {
    let session = Session::new(memory_only());
    session.load_csv_text(PEOPLE).await.unwrap();

    let missing = session.missing_rows("age").await.unwrap();
    assert_eq!(missing.missing, 2);
    assert_eq!(missing.rows.first().map(|r| r.row), Some(1));

    let encodings = session.encode_categoricals().await.unwrap();
    let columns: Vec<&str> = encodings.iter().map(|e| e.column.as_str()).collect();
    assert_eq!(columns, ["name", "city"]);
}

#[tokio::test]
async fn save_and_reload_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::with_store(memory_only(), FsBlobStore::new(dir.path(), "files", 1));
    session.load_csv_text(PEOPLE).await.unwrap();
    session.drop_column("raw").await.unwrap();

    session.save("people/clean.csv").await.unwrap();
    let bytes = session.load_saved("people/clean.csv").await.unwrap().unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("name,age,city\n"));
    assert_eq!(text.lines().count(), 6);

    assert!(session.load_saved("missing").await.unwrap().is_none());
    assert!(dir.path().join("files").join("schema.json").exists());
}

#[tokio::test]
async fn save_rejects_empty_key() {
    let session = Session::new(memory_only());
    session.load_table(ages()).await;
    let err = session.save("").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn concurrent_writers_apply_in_turn() {
    let session = Arc::new(Session::new(memory_only()));
    session.load_csv_text(PEOPLE).await.unwrap();

    let tasks: Vec<_> = ["name", "city", "raw"]
        .into_iter()
        .map(|column| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.drop_column(column).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap());
    }

    let table = session.table().await;
    assert_eq!(table.columns(), ["age"]);
    assert_eq!(table.row_count(), 5);
    // one load plus three drops, each a full generation
    assert_eq!(session.generation().await, 4);
}
