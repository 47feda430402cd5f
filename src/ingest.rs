//! Validation and bulk insertion of raw report rows.
//!
//! Rows arrive either from an uploaded CSV file or from the `reports` array of
//! an external API. Each row is checked on its own; a bad row is recorded and
//! skipped, it never stops the import.

use std::num::{IntErrorKind, ParseIntError};

use anyhow::{Context as _, Result};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::CommitMode,
    metrics::{INGEST_ROWS_REJECTED, REPORTS_CREATED},
    risk,
    store::{NewReport, ReportStore},
};

/// The fields every row must carry.
pub const REQUIRED_FIELDS: [&str; 4] = [
    "domain_name",
    "abuse_type",
    "report_source",
    "confidence_score",
];

/// One unvalidated row, as a JSON value. Usually an object keyed by column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(Value);

impl RawRow {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl From<Value> for RawRow {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Map<String, Value>> for RawRow {
    fn from(map: Map<String, Value>) -> Self {
        Self(Value::Object(map))
    }
}

/// Why a row was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Missing one or more required columns")]
    MissingColumns,
    #[error("Invalid confidence score (must be a number)")]
    InvalidScore,
    #[error("Confidence score is not between 0 and 100.")]
    ScoreOutOfRange,
}

/// A refused row, echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// Zero-based position of the row in the import.
    pub index: usize,
    pub row: RawRow,
    pub error: String,
}

/// Outcome of one import.
#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub imported: usize,
    pub errors: Vec<RowError>,
}

impl IngestSummary {
    fn reject(&mut self, index: usize, row: RawRow, reason: Rejection) {
        debug!(index, %reason, "rejected row");
        counter!(INGEST_ROWS_REJECTED).increment(1);
        self.errors.push(RowError {
            index,
            row,
            error: reason.to_string(),
        });
    }
}

/// A required text field, trimmed. `null`, non-string and blank values all
/// count as missing.
fn text_field(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a confidence score. JSON numbers are truncated toward zero; strings
/// must hold an integer. Numbers too large to represent are out of range, not
/// invalid.
fn parse_score(value: &Value) -> Result<i64, Rejection> {
    match value {
        Value::Number(n) => {
            if let Some(score) = n.as_i64() {
                return Ok(score);
            }
            match n.as_f64().map(f64::trunc) {
                Some(score) if (0.0..=100.0).contains(&score) => Ok(score as i64),
                Some(_) => Err(Rejection::ScoreOutOfRange),
                None => Err(Rejection::InvalidScore),
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map_err(|e: ParseIntError| match e.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => Rejection::ScoreOutOfRange,
            _ => Rejection::InvalidScore,
        }),
        _ => Err(Rejection::InvalidScore),
    }
}

/// Check one row and turn it into a classified report.
///
/// Shared by the single-report endpoint and bulk imports, so both produce
/// identical records from identical fields.
pub fn validate_row(row: &RawRow) -> Result<NewReport, Rejection> {
    let [domain_name, abuse_type, report_source, score] = REQUIRED_FIELDS.map(|key| row.get(key));
    let (Some(domain_name), Some(abuse_type), Some(report_source), Some(score)) = (
        domain_name.and_then(text_field),
        abuse_type.and_then(text_field),
        report_source.and_then(text_field),
        score.filter(|v| !v.is_null()),
    ) else {
        return Err(Rejection::MissingColumns);
    };

    let confidence_score = parse_score(score)?;
    if !(0..=100).contains(&confidence_score) {
        return Err(Rejection::ScoreOutOfRange);
    }

    Ok(NewReport {
        domain_name: domain_name.to_owned(),
        abuse_type: abuse_type.to_owned(),
        report_source: report_source.to_owned(),
        confidence_score,
        risk: risk::classify(abuse_type, confidence_score, domain_name),
    })
}

/// Decode a CSV upload into rows keyed by the header line.
///
/// Short records simply lack the trailing columns; extra fields are dropped.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let text = std::str::from_utf8(bytes).context("file is not valid UTF-8")?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .context("failed to read CSV header")?
        .clone();

    reader
        .records()
        .map(|record| {
            let record = record.context("malformed CSV record")?;
            let row: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .map(|(k, v)| (k.to_owned(), Value::String(v.to_owned())))
                .collect();
            Ok(RawRow::from(row))
        })
        .collect()
}

/// Validates, classifies and stores rows.
pub struct Ingestor<'a> {
    store: &'a ReportStore,
    mode: CommitMode,
}

impl<'a> Ingestor<'a> {
    pub const fn new(store: &'a ReportStore, mode: CommitMode) -> Self {
        Self { store, mode }
    }

    /// Import every valid row. Refused rows come back in the summary.
    ///
    /// A store failure ends the import with an error. In [`CommitMode::Batch`]
    /// nothing from this call is kept; in [`CommitMode::PerRow`] the rows
    /// inserted before the failure stay.
    #[tracing::instrument(skip_all, fields(rows = rows.len(), mode = ?self.mode))]
    pub async fn ingest(&self, rows: Vec<RawRow>) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        let mut tx = match self.mode {
            CommitMode::Batch => Some(self.store.begin().await?),
            CommitMode::PerRow => None,
        };

        for (index, row) in rows.into_iter().enumerate() {
            let report = match validate_row(&row) {
                Ok(report) => report,
                Err(reason) => {
                    summary.reject(index, row, reason);
                    continue;
                }
            };

            let id = match tx.as_mut() {
                Some(tx) => tx.insert(&report).await,
                None => self.store.insert(&report).await,
            }
            .with_context(|| format!("failed to store row {index}"))?;

            debug!(index, id, "stored row");
            summary.imported += 1;
        }

        if let Some(tx) = tx {
            tx.commit().await?;
        }

        counter!(REPORTS_CREATED).increment(summary.imported as u64);
        info!(
            imported = summary.imported,
            rejected = summary.errors.len(),
            "import finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> RawRow {
        RawRow::from(value)
    }

    fn valid(domain: &str) -> RawRow {
        row(json!({
            "domain_name": domain,
            "abuse_type": "Spam",
            "report_source": "unit-test",
            "confidence_score": "40",
        }))
    }

    #[test]
    fn validate_trims_and_classifies() {
        let report = validate_row(&row(json!({
            "domain_name": "  secure-pay.example ",
            "abuse_type": " Spam",
            "report_source": "feed ",
            "confidence_score": 12,
        })))
        .expect("row should be valid");

        assert_eq!(report.domain_name, "secure-pay.example");
        assert_eq!(report.abuse_type, "Spam");
        assert_eq!(report.report_source, "feed");
        assert_eq!(report.confidence_score, 12);
        assert_eq!(report.risk.score(), 100);
    }

    #[test]
    fn validate_missing_fields() {
        let cases = [
            json!({"abuse_type": "Spam", "report_source": "x", "confidence_score": 1}),
            json!({"domain_name": "a.com", "abuse_type": "Spam", "report_source": "x"}),
            json!({
                "domain_name": "a.com", "abuse_type": "Spam", "report_source": "x",
                "confidence_score": null,
            }),
            json!({
                "domain_name": "   ", "abuse_type": "Spam", "report_source": "x",
                "confidence_score": 1,
            }),
            json!({
                "domain_name": 7, "abuse_type": "Spam", "report_source": "x",
                "confidence_score": 1,
            }),
            json!(["a.com", "Spam", "x", 1]),
        ];
        for case in cases {
            assert_eq!(
                validate_row(&row(case.clone())),
                Err(Rejection::MissingColumns),
                "{case}"
            );
        }
    }

    #[test]
    fn validate_score() {
        let with_score = |score: Value| {
            row(json!({
                "domain_name": "a.com",
                "abuse_type": "Spam",
                "report_source": "x",
                "confidence_score": score,
            }))
        };

        assert_eq!(validate_row(&with_score(json!("abc"))), Err(Rejection::InvalidScore));
        assert_eq!(validate_row(&with_score(json!(""))), Err(Rejection::InvalidScore));
        assert_eq!(validate_row(&with_score(json!(true))), Err(Rejection::InvalidScore));
        assert_eq!(validate_row(&with_score(json!(101))), Err(Rejection::ScoreOutOfRange));
        assert_eq!(validate_row(&with_score(json!("-1"))), Err(Rejection::ScoreOutOfRange));

        assert_eq!(validate_row(&with_score(json!("12.5"))), Err(Rejection::InvalidScore));
        assert_eq!(validate_row(&with_score(json!(1e20))), Err(Rejection::ScoreOutOfRange));
        assert_eq!(validate_row(&with_score(json!(-0.5e3))), Err(Rejection::ScoreOutOfRange));
        assert_eq!(
            validate_row(&with_score(json!(u64::MAX))),
            Err(Rejection::ScoreOutOfRange)
        );
        assert_eq!(
            validate_row(&with_score(json!("18446744073709551615"))),
            Err(Rejection::ScoreOutOfRange)
        );

        let score = |value: Value| validate_row(&with_score(value)).map(|r| r.confidence_score);
        assert_eq!(score(json!(0)), Ok(0));
        assert_eq!(score(json!(" 100 ")), Ok(100));
        assert_eq!(score(json!(95.0)), Ok(95));
        assert_eq!(score(json!(50.0)), Ok(50));
        assert_eq!(score(json!(12.5)), Ok(12));
    }

    #[test]
    fn csv_rows_keyed_by_header() {
        let rows = parse_csv(
            b"domain_name,abuse_type,report_source,confidence_score\r\n\
              phishing.com,Phishing,csv_import,95\r\n\
              short.net,Spam\r\n",
        )
        .expect("csv should parse");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("confidence_score"), Some(&json!("95")));
        assert_eq!(rows[1].get("abuse_type"), Some(&json!("Spam")));
        assert_eq!(rows[1].get("report_source"), None);
        assert_eq!(validate_row(&rows[1]), Err(Rejection::MissingColumns));
    }

    #[test]
    fn csv_rejects_invalid_utf8() {
        assert!(parse_csv(b"domain_name\n\xff\xfe\n").is_err());
    }

    #[tokio::test]
    async fn ingest_collects_row_errors() -> Result<()> {
        let store = ReportStore::in_memory().await?;
        let rows = parse_csv(
            b"domain_name,abuse_type,report_source,confidence_score\n\
              good.com,Spam,csv_import,60\n\
              bad.com,Spam,csv_import,lots\n",
        )?;

        for mode in [CommitMode::Batch, CommitMode::PerRow] {
            let summary = Ingestor::new(&store, mode).ingest(rows.clone()).await?;
            assert_eq!(summary.imported, 1);
            assert_eq!(summary.errors.len(), 1);
            assert_eq!(summary.errors[0].index, 1);
            assert_eq!(summary.errors[0].row.get("domain_name"), Some(&json!("bad.com")));
            assert_eq!(summary.errors[0].error, Rejection::InvalidScore.to_string());
        }

        let stored = store.list_all().await?;
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r.domain_name == "good.com" && r.risk_score == 50));
        Ok(())
    }

    #[tokio::test]
    async fn ingest_matches_single_path() -> Result<()> {
        let store = ReportStore::in_memory().await?;
        let fields = json!({
            "domain_name": "amazon-refunds.shop",
            "abuse_type": "Spam",
            "report_source": "external",
            "confidence_score": 20,
        });

        let single = validate_row(&row(fields.clone())).expect("row should be valid");
        let id = store.insert(&single).await?;
        _ = Ingestor::new(&store, CommitMode::Batch)
            .ingest(vec![row(fields)])
            .await?;

        let stored = store.list_all().await?;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].risk_score, stored[1].risk_score);
        assert_eq!(stored[0].risk_score, 100);
        Ok(())
    }

    /// A store whose inserts fail for one poisoned domain.
    async fn poisoned_store() -> Result<ReportStore> {
        let store = ReportStore::in_memory().await?;
        _ = sqlx::query(
            "
            CREATE TRIGGER reject_poison BEFORE INSERT ON reports
            WHEN NEW.domain_name = 'poison.example'
            BEGIN
                SELECT RAISE(ABORT, 'poisoned row');
            END;
            ",
        )
        .execute(store.pool())
        .await?;
        Ok(store)
    }

    fn poisoned_batch() -> Vec<RawRow> {
        vec![
            valid("one.example"),
            valid("two.example"),
            valid("poison.example"),
            valid("three.example"),
        ]
    }

    #[tokio::test]
    async fn batch_mode_loses_whole_import_on_store_failure() -> Result<()> {
        let store = poisoned_store().await?;

        let result = Ingestor::new(&store, CommitMode::Batch)
            .ingest(poisoned_batch())
            .await;
        assert!(result.is_err());

        assert!(store.list_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn per_row_mode_keeps_rows_before_store_failure() -> Result<()> {
        let store = poisoned_store().await?;

        let result = Ingestor::new(&store, CommitMode::PerRow)
            .ingest(poisoned_batch())
            .await;
        let err = result.expect_err("store failure should end the import");
        assert!(format!("{err:#}").contains("row 2"));

        let domains: Vec<_> = store
            .list_all()
            .await?
            .into_iter()
            .map(|r| r.domain_name)
            .collect();
        assert_eq!(domains, vec!["one.example", "two.example"]);
        Ok(())
    }
}
