// crates/search/src/maintenance.rs
//! Index integrity checking and repair.

use crate::{SearchResult, SearchStore};
use sqlx::Row;
use tracing::{info, warn};

/// Findings from an integrity pass. Violations are reported, never raised.
#[derive(Debug, Clone)]
pub struct SearchIntegrityReport {
    pub database_integrity: bool,
    pub fts_integrity: bool,
    pub foreign_key_violations: u64,
    pub orphaned_fts_rows: u64,
    pub issues: Vec<String>,
}

impl SearchIntegrityReport {
    pub fn ok(&self) -> bool {
        self.database_integrity
            && self.fts_integrity
            && self.foreign_key_violations == 0
            && self.orphaned_fts_rows == 0
    }
}

/// What a repair pass fixed.
#[derive(Debug, Clone, Default)]
pub struct RepairSummary {
    pub orphaned_fts_removed: u64,
    pub fts_rebuilt: bool,
    pub tags_reconciled: u64,
}

impl SearchStore {
    /// Run the engine's integrity pragma, the FTS self-check, a foreign-key
    /// check, and an orphaned-shadow-row count.
    pub async fn integrity_check(&self) -> SearchResult<SearchIntegrityReport> {
        let mut issues = Vec::new();

        let rows = sqlx::query("PRAGMA integrity_check")
            .fetch_all(&self.pool)
            .await?;
        let mut database_integrity = true;
        for row in rows {
            let message: String = row.try_get(0)?;
            if message != "ok" {
                database_integrity = false;
                issues.push(format!("database integrity: {message}"));
            }
        }

        // The FTS5 self-check raises on a corrupt index; that is a finding,
        // not an error of this call.
        let fts_integrity = match sqlx::query(
            "INSERT INTO posts_fts(posts_fts) VALUES('integrity-check')",
        )
        .execute(&self.pool)
        .await
        {
            Ok(_) => true,
            Err(e) => {
                issues.push(format!("fts integrity: {e}"));
                false
            }
        };

        let fk_rows = sqlx::query("PRAGMA foreign_key_check")
            .fetch_all(&self.pool)
            .await?;
        let foreign_key_violations = fk_rows.len() as u64;
        if foreign_key_violations > 0 {
            issues.push(format!("foreign key violations: {foreign_key_violations}"));
        }

        let orphaned: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM posts_fts WHERE rowid NOT IN (SELECT id FROM posts)",
        )
        .fetch_one(&self.pool)
        .await?;
        let orphaned_fts_rows = orphaned.0 as u64;
        if orphaned_fts_rows > 0 {
            issues.push(format!("orphaned FTS entries: {orphaned_fts_rows}"));
        }

        let report = SearchIntegrityReport {
            database_integrity,
            fts_integrity,
            foreign_key_violations,
            orphaned_fts_rows,
            issues,
        };
        info!(issues = report.issues.len(), "integrity check completed");
        Ok(report)
    }

    /// Repair, in one transaction: delete orphaned shadow rows, rebuild the
    /// full-text index, and reconcile every tag's usage count against the
    /// junction table.
    pub async fn repair(&self) -> SearchResult<RepairSummary> {
        info!("starting search index repair");
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let orphans = sqlx::query(
            "DELETE FROM posts_fts WHERE rowid NOT IN (SELECT id FROM posts)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO posts_fts(posts_fts) VALUES('rebuild')")
            .execute(&mut *tx)
            .await?;

        let reconciled = sqlx::query(
            "UPDATE tags SET usage_count = (
                 SELECT COUNT(*) FROM post_tags WHERE tag_id = tags.id
             )
             WHERE usage_count != (
                 SELECT COUNT(*) FROM post_tags WHERE tag_id = tags.id
             )",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.clear_stats_cache();

        let summary = RepairSummary {
            orphaned_fts_removed: orphans.rows_affected(),
            fts_rebuilt: true,
            tags_reconciled: reconciled.rows_affected(),
        };
        if summary.orphaned_fts_removed > 0 || summary.tags_reconciled > 0 {
            warn!(
                orphans = summary.orphaned_fts_removed,
                tags = summary.tags_reconciled,
                "repair fixed inconsistencies"
            );
        }
        info!("search index repair completed");
        Ok(summary)
    }
}
