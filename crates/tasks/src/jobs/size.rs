//! Total size of a bucket or folder.

use super::deletion::{Stop, walk_listing};
use super::{JobContext, JobOutcome};
use crate::error::TaskResult;
use crate::progress::{SIZE_COUNTING, SIZE_SCANNING};
use serde_json::json;
use std::ops::ControlFlow;
use stowage_core::format_size;
use tracing::instrument;

/// Count objects in one listing pass, then sum their sizes in a second pass
/// with progress scaled against the count.
///
/// Objects added between the passes are still summed; progress saturates at
/// the end of the scanning range.
#[instrument(skip(ctx), fields(task_id = %ctx.task_id))]
pub async fn calculate_size(
    ctx: &JobContext,
    bucket: &str,
    prefix: Option<&str>,
) -> TaskResult<JobOutcome> {
    let reporter = ctx.reporter();
    let prefix = prefix.filter(|p| !p.is_empty());

    let checkpoint = reporter
        .report(SIZE_COUNTING.start, "Counting objects...")
        .await?;
    if let Some(stop) = Stop::from_checkpoint(checkpoint) {
        return Ok(stop.outcome(json!({ "size_bytes": 0, "object_count": 0 })));
    }

    let mut total: u64 = 0;
    let counted = walk_listing(ctx, bucket, prefix, |page| {
        total += page.entries.len() as u64;
        (
            SIZE_COUNTING.midpoint(),
            format!("Counting objects... {total} found"),
        )
    })
    .await?;
    if let ControlFlow::Break(stop) = counted {
        return Ok(stop.outcome(json!({ "size_bytes": 0, "object_count": 0 })));
    }

    let checkpoint = reporter
        .report(
            SIZE_SCANNING.start,
            format!("Found {total} objects, calculating size..."),
        )
        .await?;
    if let Some(stop) = Stop::from_checkpoint(checkpoint) {
        return Ok(stop.outcome(json!({ "size_bytes": 0, "object_count": 0 })));
    }

    let mut size_bytes: u64 = 0;
    let mut scanned: u64 = 0;
    if total > 0 {
        let summed = walk_listing(ctx, bucket, prefix, |page| {
            for entry in &page.entries {
                size_bytes = size_bytes.saturating_add(entry.size);
            }
            scanned += page.entries.len() as u64;
            (
                SIZE_SCANNING.at(scanned, total),
                format!("Scanning {scanned}/{total} objects..."),
            )
        })
        .await?;
        if let ControlFlow::Break(stop) = summed {
            return Ok(stop.outcome(
                json!({ "size_bytes": size_bytes, "object_count": scanned }),
            ));
        }
    }

    let size_formatted = format_size(size_bytes);
    tracing::info!(object_count = scanned, size = %size_formatted, "Size calculated");
    Ok(JobOutcome::Completed(json!({
        "size_bytes": size_bytes,
        "size_formatted": size_formatted,
        "object_count": scanned,
    })))
}
