use super::*;
use std::{collections::HashMap, sync::Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use shared::{
    domain::ColumnKind,
    error::{ErrorCode, NoticeLevel},
    protocol::GridNotification,
};
use tokio::sync::oneshot;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<GridNotification>>,
    decline_deletes: bool,
}

impl Recorder {
    fn push(&self, event: GridNotification) {
        self.events.lock().expect("events").push(event);
    }

    fn take(&self) -> Vec<GridNotification> {
        std::mem::take(&mut *self.events.lock().expect("events"))
    }
}

impl GridObserver for Recorder {
    fn on_save(&self, rows: &[Row]) {
        self.push(GridNotification::Saved {
            rows: rows.to_vec(),
        });
    }

    fn on_delete(&self, row_index: usize) {
        self.push(GridNotification::Deleted { row_index });
    }

    fn on_add(&self, rows: &[Row]) {
        self.push(GridNotification::Added {
            rows: rows.to_vec(),
        });
    }

    fn on_copy(&self, rows: &[Row], source_index: usize) {
        self.push(GridNotification::Copied {
            rows: rows.to_vec(),
            source_index,
        });
    }

    fn on_notice(&self, notice: &Notice) {
        self.push(GridNotification::Notice(notice.clone()));
    }

    fn confirm_delete(&self, _row_index: usize, _row: &Row) -> bool {
        !self.decline_deletes
    }
}

type Gate = oneshot::Sender<anyhow::Result<Vec<SelectOption>>>;

/// Option source whose responses are released by the test, one gate per
/// prerequisite value.
#[derive(Default)]
struct GatedSource {
    gates: Mutex<HashMap<String, oneshot::Receiver<anyhow::Result<Vec<SelectOption>>>>>,
}

impl GatedSource {
    fn gate(&self, value: &str) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().expect("gates").insert(value.to_string(), rx);
        tx
    }
}

#[async_trait]
impl DependentOptionSource for GatedSource {
    async fn options_for(&self, dependent_value: &CellValue) -> anyhow::Result<Vec<SelectOption>> {
        let gate = self
            .gates
            .lock()
            .expect("gates")
            .remove(&dependent_value.to_string());
        match gate {
            Some(rx) => rx.await.map_err(|_| anyhow!("gate dropped"))?,
            None => Err(anyhow!("no gate for {dependent_value}")),
        }
    }
}

struct FruitSearch;

#[async_trait]
impl SearchOptionSource for FruitSearch {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SelectOption>> {
        let all = [("1", "Apple"), ("2", "Banana"), ("3", "Orange"), ("4", "Mango")];
        Ok(all
            .iter()
            .filter(|(_, label)| label.to_lowercase().contains(&query.to_lowercase()))
            .map(|(value, label)| SelectOption::new(*value, *label))
            .collect())
    }
}

/// Remote-style search that offers nothing until the user types.
struct QueryOnlySearch;

#[async_trait]
impl SearchOptionSource for QueryOnlySearch {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SelectOption>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        FruitSearch.search(query).await
    }
}

struct PanickingSearch;

#[async_trait]
impl SearchOptionSource for PanickingSearch {
    async fn search(&self, _query: &str) -> anyhow::Result<Vec<SelectOption>> {
        panic!("search backend crashed")
    }
}

fn option(value: &str) -> SelectOption {
    SelectOption::new(value, value.to_uppercase())
}

fn geo_grid(
    cities: Arc<GatedSource>,
    policy: StaleResponsePolicy,
    recorder: Arc<Recorder>,
) -> EditableGrid {
    let config = GridConfig::new(vec![
        ColumnDef::new("province", "Province", ColumnKind::Select).editable(),
        ColumnDef::new("city", "City", ColumnKind::Select)
            .editable()
            .with_dependent_source("province", cities),
    ])
    .with_options(GridOptions {
        stale_responses: policy,
        ..GridOptions::default()
    });
    EditableGrid::new(config, vec![Row::new().with("id", "1")], recorder)
}

fn labels(options: &[SelectOption]) -> Vec<&str> {
    options.iter().map(|opt| opt.label.as_str()).collect()
}

#[tokio::test]
async fn dependent_options_follow_the_prerequisite() {
    let cities = Arc::new(GatedSource::default());
    let recorder = Arc::new(Recorder::default());
    let mut grid = geo_grid(cities.clone(), StaleResponsePolicy::Discard, recorder);

    grid.edit_row(0).expect("edit");
    let gd = cities.gate("gd");
    grid.update_cell("province", "gd").expect("province");
    assert!(grid.is_loading("city"));
    assert!(!grid.is_cell_editable(0, "city"));

    gd.send(Ok(vec![option("guangzhou"), option("shenzhen")]))
        .expect("release");
    assert_eq!(grid.next_resolution().await, Some(Resolution::Applied));
    assert!(!grid.is_loading("city"));
    assert_eq!(labels(grid.options_for("city")), vec!["GUANGZHOU", "SHENZHEN"]);
    assert!(grid.is_cell_editable(0, "city"));

    grid.update_cell("city", "shenzhen").expect("city");
    assert_eq!(grid.display(0, "city"), "SHENZHEN");
}

#[tokio::test]
async fn superseded_response_is_discarded_by_default() {
    let cities = Arc::new(GatedSource::default());
    let recorder = Arc::new(Recorder::default());
    let mut grid = geo_grid(cities.clone(), StaleResponsePolicy::Discard, recorder);

    grid.edit_row(0).expect("edit");
    let gd = cities.gate("gd");
    let gx = cities.gate("gx");
    grid.update_cell("province", "gd").expect("gd");
    grid.update_cell("province", "gx").expect("gx");

    gx.send(Ok(vec![option("nanning")])).expect("release gx");
    assert_eq!(grid.next_resolution().await, Some(Resolution::Applied));
    gd.send(Ok(vec![option("guangzhou")])).expect("release gd");
    assert_eq!(grid.next_resolution().await, Some(Resolution::Discarded));

    assert_eq!(labels(grid.options_for("city")), vec!["NANNING"]);
    assert!(!grid.any_loading());
}

#[tokio::test]
async fn last_resolved_wins_reproduces_the_race() {
    let cities = Arc::new(GatedSource::default());
    let recorder = Arc::new(Recorder::default());
    let mut grid = geo_grid(cities.clone(), StaleResponsePolicy::LastResolvedWins, recorder);

    grid.edit_row(0).expect("edit");
    let gd = cities.gate("gd");
    let gx = cities.gate("gx");
    grid.update_cell("province", "gd").expect("gd");
    grid.update_cell("province", "gx").expect("gx");

    gx.send(Ok(vec![option("nanning")])).expect("release gx");
    grid.next_resolution().await;
    gd.send(Ok(vec![option("guangzhou")])).expect("release gd");
    assert_eq!(grid.next_resolution().await, Some(Resolution::Applied));

    assert_eq!(labels(grid.options_for("city")), vec!["GUANGZHOU"]);
}

#[tokio::test]
async fn failed_fetch_keeps_existing_options() {
    let cities = Arc::new(GatedSource::default());
    let recorder = Arc::new(Recorder::default());
    let mut grid = geo_grid(cities.clone(), StaleResponsePolicy::Discard, recorder.clone());

    grid.edit_row(0).expect("edit");
    let gd = cities.gate("gd");
    grid.update_cell("province", "gd").expect("gd");
    gd.send(Ok(vec![option("guangzhou")])).expect("release");
    grid.settle().await;
    grid.save_row().expect("save");
    recorder.take();

    let offline = cities.gate("gd");
    grid.edit_row(0).expect("edit again");
    assert!(grid.is_loading("city"), "editing refreshes city options");
    offline.send(Err(anyhow!("offline"))).expect("release");
    assert_eq!(grid.next_resolution().await, Some(Resolution::Failed));

    assert!(!grid.is_loading("city"));
    assert_eq!(labels(grid.options_for("city")), vec!["GUANGZHOU"]);
    assert!(grid.is_cell_editable(0, "city"));
    assert!(recorder.take().is_empty(), "fetch failures are silent");
}

#[tokio::test]
async fn city_stays_locked_until_new_province_resolves() {
    let cities = Arc::new(GatedSource::default());
    let recorder = Arc::new(Recorder::default());
    let mut grid = geo_grid(cities.clone(), StaleResponsePolicy::Discard, recorder);

    grid.edit_row(0).expect("edit");
    let gd = cities.gate("gd");
    grid.update_cell("province", "gd").expect("gd");
    gd.send(Ok(vec![option("guangzhou")])).expect("release gd");
    grid.settle().await;

    let gx = cities.gate("gx");
    grid.update_cell("province", "gx").expect("gx");
    assert!(grid.is_loading("city"));
    assert!(!grid.is_cell_editable(0, "city"));
    assert!(grid.options_for("city").is_empty());
    let err = grid.update_cell("city", "guangzhou").expect_err("gx pending");
    assert!(matches!(err, GridError::OptionsPending { .. }));

    gx.send(Ok(vec![option("nanning")])).expect("release gx");
    grid.settle().await;
    assert!(grid.is_cell_editable(0, "city"));
    assert_eq!(labels(grid.options_for("city")), vec!["NANNING"]);
    grid.update_cell("city", "nanning").expect("city");
    grid.save_row().expect("save");
    assert_eq!(grid.rows()[0].get("city"), Some(&CellValue::from("nanning")));
}

#[tokio::test]
async fn loading_is_tracked_per_column() {
    let cities = Arc::new(GatedSource::default());
    let products = Arc::new(GatedSource::default());
    let config = GridConfig::new(vec![
        ColumnDef::new("province", "Province", ColumnKind::Select).editable(),
        ColumnDef::new("city", "City", ColumnKind::Select)
            .editable()
            .with_dependent_source("province", cities.clone()),
        ColumnDef::new("category", "Category", ColumnKind::Select).editable(),
        ColumnDef::new("product", "Product", ColumnKind::Select)
            .editable()
            .with_dependent_source("category", products.clone()),
    ]);
    let mut grid = EditableGrid::new(config, vec![Row::new()], Arc::new(NoopObserver));

    grid.edit_row(0).expect("edit");
    let city_gate = cities.gate("gd");
    let product_gate = products.gate("food");
    grid.update_cell("province", "gd").expect("province");
    grid.update_cell("category", "food").expect("category");
    assert!(grid.is_loading("city") && grid.is_loading("product"));

    city_gate.send(Ok(vec![option("guangzhou")])).expect("city");
    grid.next_resolution().await;
    assert!(!grid.is_loading("city"));
    assert!(grid.is_loading("product"));
    assert!(grid.any_loading());

    product_gate.send(Ok(vec![option("rice")])).expect("product");
    grid.settle().await;
    assert!(!grid.any_loading());
    assert_eq!(grid.in_flight(), 0);
}

#[tokio::test]
async fn editing_a_dependent_column_too_early_warns() {
    let cities = Arc::new(GatedSource::default());
    let recorder = Arc::new(Recorder::default());
    let mut grid = geo_grid(cities, StaleResponsePolicy::Discard, recorder.clone());

    grid.edit_row(0).expect("edit");
    let err = grid.update_cell("city", "guangzhou").expect_err("no province");
    assert!(matches!(err, GridError::DependencyNotSatisfied { .. }));

    let events = recorder.take();
    let [GridNotification::Notice(notice)] = events.as_slice() else {
        panic!("expected a single notice, got {events:?}");
    };
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(notice.code, Some(ErrorCode::DependencyNotSatisfied));
    assert!(notice.message.contains("Province"));
}

#[tokio::test]
async fn autocomplete_search_replaces_options() {
    let config = GridConfig::new(vec![ColumnDef::new(
        "fruit",
        "Fruit",
        ColumnKind::AutocompleteSelect,
    )
    .editable()
    .with_search_source(Arc::new(FruitSearch))]);
    let mut grid = EditableGrid::new(config, vec![Row::new()], Arc::new(NoopObserver));

    grid.edit_row(0).expect("edit");
    assert!(grid.is_loading("fruit"), "editing issues an initial search");
    grid.settle().await;
    assert_eq!(grid.options_for("fruit").len(), 4);

    grid.search("fruit", "AN").expect("search");
    grid.settle().await;
    assert_eq!(
        labels(grid.options_for("fruit")),
        vec!["Banana", "Orange", "Mango"]
    );

    grid.cancel_edit().expect("cancel");
    assert!(grid.options_for("fruit").is_empty());
}

#[tokio::test]
async fn narrowed_search_results_keep_the_chosen_value_valid() {
    let config = GridConfig::new(vec![ColumnDef::new(
        "fruit",
        "Fruit",
        ColumnKind::AutocompleteSelect,
    )
    .editable()
    .with_search_source(Arc::new(QueryOnlySearch))]);
    let mut grid = EditableGrid::new(
        config,
        vec![Row::new().with("fruit", "3")],
        Arc::new(NoopObserver),
    );

    grid.edit_row(0).expect("edit");
    grid.settle().await;
    assert!(grid.options_for("fruit").is_empty());
    grid.save_row().expect("unchanged row commits");

    grid.edit_row(0).expect("edit again");
    grid.search("fruit", "app").expect("search");
    grid.settle().await;
    grid.update_cell("fruit", "1").expect("pick apple");
    grid.search("fruit", "ban").expect("search");
    grid.settle().await;
    assert_eq!(labels(grid.options_for("fruit")), vec!["Banana"]);

    grid.save_row().expect("chosen value commits");
    assert_eq!(grid.rows()[0].get("fruit"), Some(&CellValue::from("1")));
}

#[tokio::test]
async fn panicking_source_still_settles() {
    let config = GridConfig::new(vec![ColumnDef::new(
        "fruit",
        "Fruit",
        ColumnKind::AutocompleteSelect,
    )
    .editable()
    .with_search_source(Arc::new(PanickingSearch))]);
    let mut grid = EditableGrid::new(config, vec![Row::new()], Arc::new(NoopObserver));

    grid.edit_row(0).expect("edit");
    let resolution = tokio::time::timeout(std::time::Duration::from_secs(5), grid.next_resolution())
        .await
        .expect("resolution arrives");
    assert_eq!(resolution, Some(Resolution::Failed));
    assert_eq!(grid.in_flight(), 0);
    assert!(!grid.is_loading("fruit"));
}

#[test]
fn fetches_without_a_runtime_fail_quietly() {
    let config = GridConfig::new(vec![ColumnDef::new(
        "fruit",
        "Fruit",
        ColumnKind::AutocompleteSelect,
    )
    .editable()
    .with_search_source(Arc::new(FruitSearch))]);
    let mut grid = EditableGrid::new(config, vec![Row::new()], Arc::new(NoopObserver));

    grid.edit_row(0).expect("edit");
    assert_eq!(grid.in_flight(), 1);
    assert_eq!(grid.apply_ready(), 1);
    assert_eq!(grid.in_flight(), 0);
    assert!(!grid.is_loading("fruit"));
}

#[test]
fn copy_notifies_with_the_collection_before_insertion() {
    let recorder = Arc::new(Recorder::default());
    let config = GridConfig::new(vec![ColumnDef::text("name", "Name").editable()]);
    let rows = vec![Row::new().with("id", "1").with("name", "Al")];
    let mut grid = EditableGrid::new(config, rows.clone(), recorder.clone());

    grid.copy_row(0).expect("copy");
    assert_eq!(grid.rows().len(), 2);
    assert_eq!(
        recorder.take(),
        vec![
            GridNotification::Copied {
                rows: rows.clone(),
                source_index: 0,
            },
            GridNotification::Notice(Notice::success("Row copied")),
        ]
    );

    grid.cancel_edit().expect("cancel");
    assert_eq!(recorder.take(), vec![GridNotification::Saved { rows }]);
}

#[test]
fn sync_discards_session_without_cancel_cleanup() {
    let recorder = Arc::new(Recorder::default());
    let config = GridConfig::new(vec![ColumnDef::text("name", "Name").editable()]);
    let rows = vec![Row::new().with("id", "1").with("name", "Al")];
    let mut grid = EditableGrid::new(config, rows.clone(), recorder.clone());

    grid.copy_row(0).expect("copy");
    recorder.take();
    grid.sync_rows(rows.clone());
    assert_eq!(grid.mode(), GridMode::Idle);
    assert_eq!(grid.rows(), rows.as_slice());
    assert!(recorder.take().is_empty());
}

#[test]
fn delete_notifies_delete_then_save() {
    let recorder = Arc::new(Recorder::default());
    let config = GridConfig::new(vec![ColumnDef::text("name", "Name")]);
    let rows = vec![
        Row::new().with("id", "1").with("name", "Al"),
        Row::new().with("id", "2").with("name", "Bo"),
    ];
    let mut grid = EditableGrid::new(config, rows.clone(), recorder.clone());

    assert!(grid.delete_row(0).expect("delete"));
    assert_eq!(
        recorder.take(),
        vec![
            GridNotification::Deleted { row_index: 0 },
            GridNotification::Saved {
                rows: vec![rows[1].clone()],
            },
        ]
    );
}

#[test]
fn declined_delete_is_a_no_op() {
    let recorder = Arc::new(Recorder {
        decline_deletes: true,
        ..Recorder::default()
    });
    let config = GridConfig::new(vec![ColumnDef::text("name", "Name")]);
    let rows = vec![Row::new().with("id", "1").with("name", "Al")];
    let mut grid = EditableGrid::new(config, rows.clone(), recorder.clone());

    assert!(!grid.delete_row(0).expect("declined"));
    assert_eq!(grid.rows(), rows.as_slice());
    assert!(recorder.take().is_empty());
}

#[test]
fn deferred_mode_publishes_on_save_all() {
    let recorder = Arc::new(Recorder::default());
    let config = GridConfig::new(vec![ColumnDef::text("name", "Name").editable()]).with_options(
        GridOptions {
            auto_save: false,
            ..GridOptions::default()
        },
    );
    let mut grid = EditableGrid::new(config, vec![Row::new().with("id", "1")], recorder.clone());

    grid.edit_row(0).expect("edit");
    grid.update_cell("name", "Zed").expect("update");
    grid.save_row().expect("save");
    assert!(recorder.take().is_empty());

    grid.save_all();
    let events = recorder.take();
    assert!(matches!(
        events.as_slice(),
        [GridNotification::Saved { rows }] if rows[0].get("name") == Some(&CellValue::from("Zed"))
    ));
}

#[test]
fn display_uses_labels_and_placeholder() {
    let config = GridConfig::new(vec![
        ColumnDef::new("job", "Job", ColumnKind::Select)
            .editable()
            .with_options(vec![SelectOption::new("1", "react"), SelectOption::new("2", "vue")]),
        ColumnDef::text("note", "Note"),
    ]);
    let mut grid = EditableGrid::new(
        config,
        vec![Row::new().with("job", "2")],
        Arc::new(NoopObserver),
    );
    assert_eq!(grid.display(0, "job"), "vue");
    assert_eq!(grid.display(0, "note"), "--");

    grid.edit_row(0).expect("edit");
    grid.update_cell("job", "1").expect("update");
    assert_eq!(grid.display(0, "job"), "react");
}
