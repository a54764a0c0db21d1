//! Edge tables, one logical table per edge kind.

use std::collections::BTreeSet;

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::diesel_models::{EdgeRecord, NewEdge};
use super::pool::{DbError, DbPool};
use super::util::now_rfc3339;
use crate::models::{normalize_name, Edge, EdgeKind};
use crate::schema::edges;
use crate::with_conn;

impl From<EdgeRecord> for Edge {
    fn from(record: EdgeRecord) -> Self {
        Edge {
            kind: EdgeKind::from_str(&record.kind).unwrap_or(EdgeKind::Hyperlink),
            source: record.source,
            target: record.target,
            label: record.label,
        }
    }
}

/// Append-only store for the edges of one kind.
///
/// Batches are deduplicated before insertion; the same edge found again in
/// a later batch is stored again.
#[derive(Clone)]
pub struct EdgeRepository {
    pool: DbPool,
    kind: EdgeKind,
}

impl EdgeRepository {
    pub fn new(pool: DbPool, kind: EdgeKind) -> Self {
        Self { pool, kind }
    }

    /// Persist one source's edge batch atomically. Returns rows written.
    pub async fn insert_batch(&self, batch: &[Edge]) -> Result<usize, DbError> {
        let unique: BTreeSet<&Edge> = batch.iter().filter(|e| e.kind == self.kind).collect();
        if unique.is_empty() {
            return Ok(0);
        }

        let kind = self.kind.as_str();
        let now = now_rfc3339();
        with_conn!(self.pool, conn => {
            conn.transaction::<_, DbError, _>(|conn| {
                Box::pin(async move {
                    let mut inserted = 0;
                    for edge in unique {
                        inserted += diesel::insert_into(edges::table)
                            .values(NewEdge {
                                kind,
                                source: &edge.source,
                                target: &edge.target,
                                label: &edge.label,
                                discovered_at: &now,
                            })
                            .execute(conn)
                            .await?;
                    }
                    Ok(inserted)
                })
            })
            .await
        })
    }

    pub async fn count(&self) -> Result<u64, DbError> {
        let count: i64 = with_conn!(self.pool, conn => {
            edges::table
                .filter(edges::kind.eq(self.kind.as_str()))
                .count()
                .get_result(&mut conn)
                .await?
        });
        Ok(count.max(0) as u64)
    }

    /// All edges of this kind in insertion order.
    pub async fn list(&self) -> Result<Vec<Edge>, DbError> {
        with_conn!(self.pool, conn => {
            edges::table
                .filter(edges::kind.eq(self.kind.as_str()))
                .order(edges::id.asc())
                .select(EdgeRecord::as_select())
                .load(&mut conn)
                .await
                .map(|records| records.into_iter().map(Edge::from).collect())
        })
    }

    /// Edges leaving one community.
    pub async fn from_source(&self, source: &str) -> Result<Vec<Edge>, DbError> {
        let source = normalize_name(source);
        with_conn!(self.pool, conn => {
            edges::table
                .filter(edges::kind.eq(self.kind.as_str()))
                .filter(edges::source.eq(&source))
                .order(edges::id.asc())
                .select(EdgeRecord::as_select())
                .load(&mut conn)
                .await
                .map(|records| records.into_iter().map(Edge::from).collect())
        })
    }
}
