//! Bucket, prefix and bulk deletion.
//!
//! All three share one shape: list every matching key, delete in batches of
//! at most 1000 with a checkpoint before each batch, then optionally delete
//! the bucket once its keys are confirmed gone. Batches run sequentially so
//! counts and progress stay monotonic.

use super::{BulkPlan, JobContext, JobOutcome};
use crate::error::{TaskError, TaskResult};
use crate::progress::{CLEANUP, DELETING, LISTING};
use crate::tracker::Checkpoint;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::ops::ControlFlow;
use stowage_storage::{ContinuationToken, ListingPage};
use tracing::instrument;

/// Why a job stopped before finishing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stop {
    Cancelled,
    Lost,
}

impl Stop {
    pub(crate) fn from_checkpoint(checkpoint: Checkpoint) -> Option<Self> {
        match checkpoint {
            Checkpoint::Continue => None,
            Checkpoint::Stop => Some(Self::Cancelled),
            Checkpoint::Lost => Some(Self::Lost),
        }
    }

    pub(crate) fn outcome(self, partial: Value) -> JobOutcome {
        match self {
            Self::Cancelled => JobOutcome::Cancelled(partial),
            Self::Lost => JobOutcome::Lost(partial),
        }
    }
}

/// Walk every listing page under `prefix`. After each page, `on_page`
/// returns the progress and step to report, and the report doubles as a
/// checkpoint that also refreshes the record's TTL.
pub(crate) async fn walk_listing<F>(
    ctx: &JobContext,
    bucket: &str,
    prefix: Option<&str>,
    mut on_page: F,
) -> TaskResult<ControlFlow<Stop>>
where
    F: FnMut(ListingPage) -> (u8, String),
{
    let reporter = ctx.reporter();
    let page_size = ctx.jobs.list_page_size;
    let mut token: Option<ContinuationToken> = None;

    loop {
        let page = ctx
            .retry
            .run(
                "list_objects",
                || ctx.client.list_objects(bucket, prefix, token.as_ref(), page_size),
                |_| {},
            )
            .await?;

        let truncated = page.is_truncated;
        let next_token = page.next_token.clone();
        let (progress, step) = on_page(page);

        let checkpoint = reporter.report(progress, step).await?;
        if let Some(stop) = Stop::from_checkpoint(checkpoint) {
            return Ok(ControlFlow::Break(stop));
        }

        match next_token {
            Some(next) if truncated => token = Some(next),
            None if truncated => {
                return Err(TaskError::Internal(format!(
                    "listing of bucket '{bucket}' was truncated without a continuation token"
                )));
            }
            _ => return Ok(ControlFlow::Continue(())),
        }
    }
}

/// Append every key under `prefix` to `keys`, skipping any already in `seen`.
pub(crate) async fn collect_keys(
    ctx: &JobContext,
    bucket: &str,
    prefix: Option<&str>,
    keys: &mut Vec<String>,
    seen: &mut HashSet<String>,
) -> TaskResult<ControlFlow<Stop>> {
    walk_listing(ctx, bucket, prefix, |page| {
        for entry in page.entries {
            if seen.insert(entry.key.clone()) {
                keys.push(entry.key);
            }
        }
        (
            LISTING.midpoint(),
            format!("Listing objects... {} found", keys.len()),
        )
    })
    .await
}

/// Delete `keys` in batches. Returns the number of confirmed deletions, or
/// the stop reason with the count so far.
///
/// Keys the store refuses are retried on their own up to the retry limit;
/// any still failing afterwards fail the job with a partial-delete error.
pub(crate) async fn delete_keys(
    ctx: &JobContext,
    bucket: &str,
    keys: &[String],
) -> TaskResult<ControlFlow<(Stop, u64), u64>> {
    let reporter = ctx.reporter();
    let total = keys.len() as u64;
    let batch_size = ctx.jobs.effective_batch_size();
    let mut deleted: u64 = 0;
    let mut processed: u64 = 0;
    let mut failed: Vec<String> = Vec::new();

    let checkpoint = reporter
        .report(DELETING.start, format!("Found {total} objects"))
        .await?;
    if let Some(stop) = Stop::from_checkpoint(checkpoint) {
        return Ok(ControlFlow::Break((stop, deleted)));
    }

    for batch in keys.chunks(batch_size) {
        if let Some(stop) = Stop::from_checkpoint(reporter.checkpoint().await?) {
            tracing::info!(task_id = %ctx.task_id, deleted, total, "Stopping deletion at checkpoint");
            return Ok(ControlFlow::Break((stop, deleted)));
        }

        let mut pending: Vec<String> = batch.to_vec();
        let mut attempt = 1;
        loop {
            let report = ctx
                .retry
                .run(
                    "delete_batch",
                    || ctx.client.delete_batch(bucket, &pending),
                    |_| ctx.events.delete_retried(),
                )
                .await?;

            let confirmed = report.deleted.len() as u64;
            deleted += confirmed;
            ctx.events.objects_deleted(confirmed);

            if report.errors.is_empty() {
                break;
            }
            if let Some(first) = report.errors.first() {
                tracing::warn!(
                    task_id = %ctx.task_id,
                    failed = report.errors.len(),
                    attempt,
                    code = %first.code,
                    key = %first.key,
                    "Store refused some deletions"
                );
            }

            let refused: Vec<String> = report.errors.into_iter().map(|e| e.key).collect();
            if attempt >= ctx.retry.max_attempts {
                failed.extend(refused);
                break;
            }
            attempt += 1;
            ctx.events.delete_retried();
            if !ctx.retry.backoff.is_zero() {
                tokio::time::sleep(ctx.retry.backoff).await;
            }
            pending = refused;
        }

        processed += batch.len() as u64;
        let checkpoint = reporter
            .report(
                DELETING.at(processed, total),
                format!("Deleted {deleted} of {total} objects"),
            )
            .await?;
        if let Some(stop) = Stop::from_checkpoint(checkpoint) {
            return Ok(ControlFlow::Break((stop, deleted)));
        }
    }

    if !failed.is_empty() {
        return Err(TaskError::partial_delete(&failed));
    }
    Ok(ControlFlow::Continue(deleted))
}

/// Delete every object in `bucket`, then the bucket itself.
#[instrument(skip(ctx), fields(task_id = %ctx.task_id))]
pub async fn delete_bucket(ctx: &JobContext, bucket: &str) -> TaskResult<JobOutcome> {
    let mut keys = Vec::new();
    let mut seen = HashSet::new();

    if let ControlFlow::Break(stop) = collect_keys(ctx, bucket, None, &mut keys, &mut seen).await? {
        return Ok(stop.outcome(json!({ "deleted": 0, "bucket": bucket })));
    }

    let deleted = match delete_keys(ctx, bucket, &keys).await? {
        ControlFlow::Continue(deleted) => deleted,
        ControlFlow::Break((stop, deleted)) => {
            return Ok(stop.outcome(json!({ "deleted": deleted, "bucket": bucket })));
        }
    };

    let checkpoint = ctx
        .reporter()
        .report(CLEANUP.start, "Deleting bucket...")
        .await?;
    if let Some(stop) = Stop::from_checkpoint(checkpoint) {
        return Ok(stop.outcome(json!({ "deleted": deleted, "bucket": bucket })));
    }

    ctx.retry
        .run(
            "delete_bucket",
            || ctx.client.delete_bucket(bucket),
            |_| ctx.events.delete_retried(),
        )
        .await?;

    tracing::info!(deleted, bucket = %bucket, "Bucket deleted");
    Ok(JobOutcome::Completed(
        json!({ "deleted": deleted, "bucket": bucket }),
    ))
}

/// Delete every object under a folder prefix.
#[instrument(skip(ctx), fields(task_id = %ctx.task_id))]
pub async fn delete_prefix(ctx: &JobContext, bucket: &str, prefix: &str) -> TaskResult<JobOutcome> {
    let prefix = super::normalize_prefix(prefix)?;
    let mut keys = Vec::new();
    let mut seen = HashSet::new();

    if let ControlFlow::Break(stop) =
        collect_keys(ctx, bucket, Some(&prefix), &mut keys, &mut seen).await?
    {
        return Ok(stop.outcome(json!({ "deleted": 0, "prefix": prefix })));
    }

    let deleted = match delete_keys(ctx, bucket, &keys).await? {
        ControlFlow::Continue(deleted) => deleted,
        ControlFlow::Break((stop, deleted)) => {
            return Ok(stop.outcome(json!({ "deleted": deleted, "prefix": prefix })));
        }
    };

    let checkpoint = ctx.reporter().report(CLEANUP.start, "Finishing...").await?;
    if let Some(stop) = Stop::from_checkpoint(checkpoint) {
        return Ok(stop.outcome(json!({ "deleted": deleted, "prefix": prefix })));
    }

    tracing::info!(deleted, prefix = %prefix, "Prefix deleted");
    Ok(JobOutcome::Completed(
        json!({ "deleted": deleted, "prefix": prefix }),
    ))
}

/// Delete explicit files and every object under the listed folders.
#[instrument(skip(ctx, plan), fields(task_id = %ctx.task_id, folders = plan.folders.len(), files = plan.files.len()))]
pub async fn bulk_delete(ctx: &JobContext, bucket: &str, plan: &BulkPlan) -> TaskResult<JobOutcome> {
    let partial = |deleted: u64| {
        json!({
            "deleted": deleted,
            "folders": plan.folders.len(),
            "files": plan.files.len(),
        })
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut keys: Vec<String> = Vec::new();
    for file in &plan.files {
        if seen.insert(file.clone()) {
            keys.push(file.clone());
        }
    }

    for folder in &plan.folders {
        if let ControlFlow::Break(stop) =
            collect_keys(ctx, bucket, Some(folder), &mut keys, &mut seen).await?
        {
            return Ok(stop.outcome(partial(0)));
        }
    }

    let deleted = match delete_keys(ctx, bucket, &keys).await? {
        ControlFlow::Continue(deleted) => deleted,
        ControlFlow::Break((stop, deleted)) => return Ok(stop.outcome(partial(deleted))),
    };

    tracing::info!(deleted, "Bulk delete finished");
    Ok(JobOutcome::Completed(partial(deleted)))
}
