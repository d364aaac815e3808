//! Apply a diff, one action at a time.
//!
//! Action failures are logged and recorded but never stop the pass: the next
//! acquisition inspects the table again and retries whatever is still wrong.
//! Only a lost connection ends a pass early.

use crate::{Action, Error, Observed, SchemaBackend, TableDiff, diff, inspect};
use mend_db_schema::{Schema, TableSchema};
use tracing::Instrument;

/// How a single action went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    pub action: Action,
    pub outcome: Outcome,
}

/// Everything attempted during one pass over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationReport {
    pub table: String,
    pub actions: Vec<ActionReport>,
}

impl ReconciliationReport {
    fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            actions: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions
            .iter()
            .filter(|r| r.outcome == Outcome::Applied)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed(_)))
    }

    /// No action was needed, or every action applied.
    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }
}

impl std::fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "{}: up to date", self.table);
        }
        writeln!(
            f,
            "{}: {} applied, {} failed",
            self.table,
            self.succeeded().count(),
            self.failed().count()
        )?;
        for report in &self.actions {
            match &report.outcome {
                Outcome::Applied => writeln!(f, "  ok    {}", report.action)?,
                Outcome::Failed(reason) => {
                    writeln!(f, "  FAIL  {}", report.action)?;
                    writeln!(f, "        {}", reason)?;
                }
            }
        }
        Ok(())
    }
}

/// Apply every action in `diff`, in order.
///
/// A failing action is recorded and the pass moves on. If the backend
/// reports its connection closed after a failure, the remaining actions are
/// abandoned and [`Error::ConnectionLost`] carries what was attempted.
pub async fn reconcile<B: SchemaBackend>(
    backend: &B,
    diff: &TableDiff,
) -> Result<ReconciliationReport, Error> {
    let mut report = ReconciliationReport::new(&diff.table);

    for action in &diff.actions {
        match backend.apply(&diff.table, action).await {
            Ok(()) => {
                tracing::info!(table = %diff.table, %action, "applied");
                report.actions.push(ActionReport {
                    action: action.clone(),
                    outcome: Outcome::Applied,
                });
            }
            Err(e) => {
                tracing::warn!(table = %diff.table, %action, error = %e, "action failed");
                report.actions.push(ActionReport {
                    action: action.clone(),
                    outcome: Outcome::Failed(e.to_string()),
                });
                if backend.is_closed() {
                    let attempted = report.actions.len();
                    tracing::error!(
                        table = %diff.table,
                        attempted,
                        planned = diff.actions.len(),
                        "connection lost, abandoning pass"
                    );
                    return Err(Error::ConnectionLost {
                        table: diff.table.clone(),
                        attempted,
                        planned: diff.actions.len(),
                        report: Box::new(report),
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    Ok(report)
}

/// One full pass over a single table: inspect, diff, apply.
pub async fn reconcile_table<B: SchemaBackend>(
    backend: &B,
    expected: &TableSchema,
) -> Result<ReconciliationReport, Error> {
    let span = tracing::info_span!("mend.reconcile", table = %expected.name);
    async {
        let observed = inspect(backend, &expected.name).await?;
        if observed == Observed::NotFound {
            tracing::info!("table missing, creating");
        }

        let diff = diff(expected, &observed);
        if diff.is_empty() {
            tracing::debug!("up to date");
            return Ok(ReconciliationReport::new(&expected.name));
        }

        tracing::info!(actions = diff.actions.len(), "reconciling");
        let report = reconcile(backend, &diff).await?;
        if report.is_clean() {
            tracing::info!(applied = report.actions.len(), "reconciled");
        } else {
            tracing::warn!(
                applied = report.succeeded().count(),
                failed = report.failed().count(),
                "reconciled with failures"
            );
        }
        Ok::<_, Error>(report)
    }
    .instrument(span)
    .await
}

/// Reconcile every table in `schema`, in registration order.
///
/// Stops at the first table whose inspection fails or whose connection is
/// lost.
pub async fn reconcile_schema<B: SchemaBackend>(
    backend: &B,
    schema: &Schema,
) -> Result<Vec<ReconciliationReport>, Error> {
    let mut reports = Vec::with_capacity(schema.tables.len());
    for table in schema.iter_tables() {
        reports.push(reconcile_table(backend, table).await?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use mend_db_schema::{ColumnSpec, SqlType};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct FakeError(String);

    /// Backend that fails chosen actions and records what it was asked to do.
    #[derive(Default)]
    struct FakeBackend {
        table: Option<TableSchema>,
        fail_describe: bool,
        fail_at: Vec<usize>,
        close_on_failure: bool,
        closed: AtomicBool,
        applied: Mutex<Vec<String>>,
    }

    impl SchemaBackend for FakeBackend {
        type Error = FakeError;

        fn describe<'a>(
            &'a self,
            _table: &'a str,
        ) -> BoxFuture<'a, Result<Option<TableSchema>, FakeError>> {
            Box::pin(async move {
                if self.fail_describe {
                    return Err(FakeError("permission denied for schema public".into()));
                }
                Ok(self.table.clone())
            })
        }

        fn apply<'a>(
            &'a self,
            _table: &'a str,
            action: &'a Action,
        ) -> BoxFuture<'a, Result<(), FakeError>> {
            Box::pin(async move {
                let mut applied = self.applied.lock().unwrap();
                let index = applied.len();
                applied.push(action.to_string());
                if self.fail_at.contains(&index) {
                    if self.close_on_failure {
                        self.closed.store(true, Ordering::SeqCst);
                    }
                    return Err(FakeError(format!("action {index} rejected")));
                }
                Ok(())
            })
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn four_actions() -> TableDiff {
        let col = |name: &str| ColumnSpec::new(name, SqlType::Text);
        TableDiff {
            table: "guarantees".into(),
            actions: vec![
                Action::DropColumn(col("legacy_field")),
                Action::AddColumn {
                    column: col("beneficiary"),
                    after: Some("anti_fake_code".into()),
                },
                Action::AddColumn {
                    column: col("applicant"),
                    after: Some("beneficiary".into()),
                },
                Action::ModifyColumn {
                    from: col("guarantor"),
                    to: col("guarantor").not_null(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_failed_action_does_not_stop_the_pass() {
        let backend = FakeBackend {
            fail_at: vec![1],
            ..Default::default()
        };
        let report = reconcile(&backend, &four_actions()).await.unwrap();

        assert_eq!(backend.applied.lock().unwrap().len(), 4);
        assert_eq!(report.actions.len(), 4);
        assert_eq!(report.succeeded().count(), 3);
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].action, four_actions().actions[1]);
        assert_eq!(failed[0].outcome, Outcome::Failed("action 1 rejected".into()));
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_lost_connection_abandons_the_pass() {
        let backend = FakeBackend {
            fail_at: vec![1],
            close_on_failure: true,
            ..Default::default()
        };
        let err = reconcile(&backend, &four_actions()).await.unwrap_err();

        assert_eq!(backend.applied.lock().unwrap().len(), 2);
        match err {
            Error::ConnectionLost {
                table,
                attempted,
                planned,
                report,
                ..
            } => {
                assert_eq!(table, "guarantees");
                assert_eq!((attempted, planned), (2, 4));
                assert_eq!(report.succeeded().count(), 1);
                assert_eq!(report.failed().count(), 1);
            }
            other => panic!("expected ConnectionLost, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inspection_failure_is_fatal() {
        let backend = FakeBackend {
            fail_describe: true,
            ..Default::default()
        };
        let expected = TableSchema::new("guarantees").column(ColumnSpec::new("id", SqlType::Integer));
        let err = reconcile_table(&backend, &expected).await.unwrap_err();

        assert!(matches!(err, Error::InspectionFailed { ref table, .. } if table == "guarantees"));
        assert!(backend.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_created() {
        let backend = FakeBackend::default();
        let expected = TableSchema::new("guarantees").column(ColumnSpec::new("id", SqlType::Integer));
        let report = reconcile_table(&backend, &expected).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(*backend.applied.lock().unwrap(), vec!["+ table guarantees"]);
    }

    #[tokio::test]
    async fn test_matching_table_applies_nothing() {
        let expected = TableSchema::new("guarantees").column(ColumnSpec::new("id", SqlType::Integer));
        let backend = FakeBackend {
            table: Some(expected.clone()),
            ..Default::default()
        };
        let report = reconcile_table(&backend, &expected).await.unwrap();

        assert!(report.actions.is_empty());
        assert_eq!(report.to_string(), "guarantees: up to date");
        assert!(backend.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_report_display() {
        let diff = four_actions();
        let report = ReconciliationReport {
            table: "guarantees".into(),
            actions: vec![
                ActionReport {
                    action: diff.actions[0].clone(),
                    outcome: Outcome::Applied,
                },
                ActionReport {
                    action: diff.actions[3].clone(),
                    outcome: Outcome::Failed("column \"guarantor\" contains null values".into()),
                },
            ],
        };
        insta::assert_snapshot!(report.to_string(), @r#"
        guarantees: 1 applied, 1 failed
          ok    - legacy_field
          FAIL  ~ guarantor: text -> text NOT NULL
                column "guarantor" contains null values
        "#);
    }
}
