//! Relevance and project classification stages
//!
//! Both passes only visit records they have not classified before, so a
//! re-run picks up exactly where an interrupted one stopped. Relevance
//! fails open, project matching fails closed.

use crate::prompts::{classification_input, project_prompt, RELEVANCE_PROMPT};
use crate::StageReport;
use secdigest_common::config::ProjectConfig;
use secdigest_common::errors::{AppError, Result};
use secdigest_common::metrics::{record_processed, ModelTimer};
use secdigest_common::{DependentField, ModelClient, PaperPatch, PaperQuery, PaperRecord, PaperStore, Tag};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

fn one_liner(record: &PaperRecord) -> &str {
    record.one_liner.as_deref().unwrap_or_default()
}

fn parse_relevance(value: &Value) -> Result<bool> {
    value
        .get("relevant")
        .and_then(Value::as_bool)
        .ok_or_else(|| AppError::MissingField { field: "relevant".into() })
}

/// Keep catalog ids only, first occurrence wins
fn parse_projects(value: &Value, catalog: &[ProjectConfig]) -> Result<Vec<String>> {
    let items = value
        .get("projects")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::MissingField { field: "projects".into() })?;

    let known: HashSet<&str> = catalog.iter().map(|p| p.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for id in items.iter().filter_map(Value::as_str) {
        if !known.contains(id) {
            debug!(id, "Dropping unknown project id");
            continue;
        }
        if seen.insert(id) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

/// Decide relevance for summarized records in the window that have none yet.
///
/// `general` records are marked irrelevant without a model call; any model
/// or parse failure marks the record relevant.
#[instrument(skip_all, fields(window = pull_window))]
pub async fn classify_relevance(
    store: &mut PaperStore,
    model: &dyn ModelClient,
    pull_window: &str,
    request_delay: Duration,
) -> Result<StageReport> {
    let pending: Vec<PaperRecord> = store
        .find(&PaperQuery::new().published_gte(pull_window).summarized(true))
        .into_iter()
        .filter(|r| r.relevant.is_none())
        .collect();

    let mut report = StageReport::default();
    let mut submitted = false;

    for record in &pending {
        report.processed += 1;

        let relevant = if record.tag == Some(Tag::General) {
            false
        } else {
            if submitted {
                tokio::time::sleep(request_delay).await;
            }
            submitted = true;

            let timer = ModelTimer::start("relevance");
            let reply = model
                .complete_json(RELEVANCE_PROMPT, &classification_input(&record.title, one_liner(record)))
                .await;
            timer.finish(reply.is_ok());

            match reply.and_then(|v| parse_relevance(&v)) {
                Ok(relevant) => relevant,
                Err(e) => {
                    warn!(
                        id = %record.id,
                        code = e.code().as_code(),
                        error = %e,
                        "Relevance check failed, keeping paper"
                    );
                    report.skipped += 1;
                    true
                }
            }
        };

        store.update(&record.id, PaperPatch::new().relevant(relevant))?;
        debug!(id = %record.id, relevant, "Classified relevance");
        report.updated += 1;
    }

    record_processed("relevance", report.updated);
    info!(
        processed = report.processed,
        failed_open = report.skipped,
        "Relevance classification finished"
    );
    Ok(report)
}

/// Match relevant records in the window without projects against the
/// catalog. Failures record an empty list.
#[instrument(skip_all, fields(window = pull_window, catalog = catalog.len()))]
pub async fn classify_projects(
    store: &mut PaperStore,
    model: &dyn ModelClient,
    catalog: &[ProjectConfig],
    pull_window: &str,
    request_delay: Duration,
) -> Result<StageReport> {
    let pending: Vec<PaperRecord> = store
        .find(&PaperQuery::new().published_gte(pull_window).relevant(true))
        .into_iter()
        .filter(|r| r.projects.is_none())
        .collect();

    let system = project_prompt(catalog);
    let mut report = StageReport::default();
    let mut submitted = false;

    for record in &pending {
        report.processed += 1;

        let projects = if catalog.is_empty() {
            Vec::new()
        } else {
            if submitted {
                tokio::time::sleep(request_delay).await;
            }
            submitted = true;

            let timer = ModelTimer::start("projects");
            let reply = model
                .complete_json(&system, &classification_input(&record.title, one_liner(record)))
                .await;
            timer.finish(reply.is_ok());

            match reply.and_then(|v| parse_projects(&v, catalog)) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(
                        id = %record.id,
                        code = e.code().as_code(),
                        error = %e,
                        "Project matching failed"
                    );
                    report.skipped += 1;
                    Vec::new()
                }
            }
        };

        debug!(id = %record.id, ?projects, "Matched projects");
        store.update(&record.id, PaperPatch::new().projects(projects))?;
        report.updated += 1;
    }

    record_processed("projects", report.updated);
    info!(
        processed = report.processed,
        failed = report.skipped,
        "Project classification finished"
    );
    Ok(report)
}

/// Forget project matches in the window so the next pass redoes them
pub fn reclassify_projects(store: &mut PaperStore, pull_window: &str) -> Result<usize> {
    store.clear_field(pull_window, DependentField::Projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secdigest_common::llm::MockModel;
    use secdigest_common::Summary;
    use serde_json::json;
    use tempfile::TempDir;

    const WINDOW: &str = "2026-01-01T00:00:00Z";

    fn summarized(store: &mut PaperStore, id: &str, tag: Tag) {
        store
            .insert(PaperRecord::discovered(
                id,
                format!("http://arxiv.org/pdf/{}.pdf", id),
                "2026-01-15T10:30:00Z",
                format!("Paper {}", id),
                vec![],
            ))
            .unwrap();
        store
            .update(
                id,
                PaperPatch::new().summary(Summary {
                    points: vec!["p".into()],
                    one_liner: format!("One liner {}", id),
                    emoji: "🔍".into(),
                    tag,
                    affiliations: vec![],
                    interest_score: 5,
                }),
            )
            .unwrap();
    }

    fn store() -> (TempDir, PaperStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PaperStore::open(dir.path().join("papers.json")).unwrap();
        (dir, store)
    }

    fn catalog() -> Vec<ProjectConfig> {
        vec![
            ProjectConfig { id: "pyrit".into(), description: "Red teaming automation".into() },
            ProjectConfig { id: "guard".into(), description: "Prompt injection filters".into() },
        ]
    }

    #[tokio::test]
    async fn test_general_short_circuits() {
        let (_dir, mut store) = store();
        summarized(&mut store, "g", Tag::General);
        let model = MockModel::new();

        classify_relevance(&mut store, &model, WINDOW, Duration::ZERO).await.unwrap();
        assert_eq!(store.get("g").unwrap().relevant, Some(false));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_relevance_from_model_and_fail_open() {
        let (_dir, mut store) = store();
        summarized(&mut store, "a", Tag::Security);
        summarized(&mut store, "b", Tag::Cyber);
        summarized(&mut store, "c", Tag::Security);
        let model = MockModel::new()
            .respond(json!({"relevant": false}))
            .fail("timeout")
            .respond(json!({"relevant": "maybe"}));

        let report = classify_relevance(&mut store, &model, WINDOW, Duration::ZERO).await.unwrap();

        assert_eq!(report.updated, 3);
        assert_eq!(store.get("a").unwrap().relevant, Some(false));
        assert_eq!(store.get("b").unwrap().relevant, Some(true));
        assert_eq!(store.get("c").unwrap().relevant, Some(true));
        assert!(model.calls()[0].user.contains("Title: Paper a"));
        assert!(model.calls()[0].user.contains("One liner a"));
    }

    #[tokio::test]
    async fn test_relevance_never_revisits() {
        let (_dir, mut store) = store();
        summarized(&mut store, "a", Tag::Security);
        let model = MockModel::new().with_fallback(json!({"relevant": true}));

        classify_relevance(&mut store, &model, WINDOW, Duration::ZERO).await.unwrap();
        let second = classify_relevance(&mut store, &model, WINDOW, Duration::ZERO).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_projects_strip_hallucinations_and_duplicates() {
        let (_dir, mut store) = store();
        summarized(&mut store, "a", Tag::Security);
        store.update("a", PaperPatch::new().relevant(true)).unwrap();

        let model = MockModel::new().respond(json!({"projects": ["guard", "skynet", "guard", 7]}));
        classify_projects(&mut store, &model, &catalog(), WINDOW, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.get("a").unwrap().projects, Some(vec!["guard".to_string()]));
        assert!(model.calls()[0].system.contains("- pyrit: Red teaming automation"));
    }

    #[tokio::test]
    async fn test_projects_fail_closed_and_skip_irrelevant() {
        let (_dir, mut store) = store();
        summarized(&mut store, "a", Tag::Security);
        summarized(&mut store, "b", Tag::Security);
        store.update("a", PaperPatch::new().relevant(true)).unwrap();
        store.update("b", PaperPatch::new().relevant(false)).unwrap();

        let model = MockModel::new().fail("500");
        classify_projects(&mut store, &model, &catalog(), WINDOW, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.get("a").unwrap().projects, Some(vec![]));
        assert_eq!(store.get("b").unwrap().projects, None);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_catalog_needs_no_model() {
        let (_dir, mut store) = store();
        summarized(&mut store, "a", Tag::Security);
        store.update("a", PaperPatch::new().relevant(true)).unwrap();

        let model = MockModel::new();
        classify_projects(&mut store, &model, &[], WINDOW, Duration::ZERO).await.unwrap();
        assert_eq!(store.get("a").unwrap().projects, Some(vec![]));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_reclassify_clears_then_reruns() {
        let (_dir, mut store) = store();
        summarized(&mut store, "a", Tag::Security);
        store
            .update("a", PaperPatch::new().relevant(true).projects(vec!["pyrit".into()]))
            .unwrap();

        assert_eq!(reclassify_projects(&mut store, WINDOW).unwrap(), 1);
        assert_eq!(store.get("a").unwrap().projects, None);
        assert_eq!(store.get("a").unwrap().relevant, Some(true));

        let model = MockModel::new().respond(json!({"projects": ["guard"]}));
        classify_projects(&mut store, &model, &catalog(), WINDOW, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(store.get("a").unwrap().projects, Some(vec!["guard".to_string()]));
    }
}
